//! Integration tests for the training loop in pretraining

use candle_core::Device;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tinygpt_model::{GPTConfig, GPT};
use tinygpt_pretrain::config::OptimizerHyperparams;
use tinygpt_pretrain::dataloader::{DataLoader, Split};
use tinygpt_pretrain::optimizer::setup_optimizers;
use tinygpt_pretrain::{Trainer, TrainingConfig, TrainingState};

/// Ten-token synthetic corpus with a fixed successor for every token
const CORPUS: [u32; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];

fn tiny_config(seed: u64) -> GPTConfig {
    GPTConfig {
        sequence_len: 4,
        vocab_size: 10,
        n_layer: 1,
        n_head: 2,
        n_embd: 16,
        dropout: 0.0,
        seed: Some(seed),
    }
}

fn loader() -> DataLoader {
    DataLoader::new(CORPUS.to_vec(), CORPUS.to_vec(), 4, 4, Some(0), &Device::Cpu).unwrap()
}

fn training_config(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        eval_interval: 0,
        eval_iters: 10,
        checkpoint_interval: 0,
        log_interval: 0,
        save_path: None,
        quiet: true,
    }
}

fn trainer(epochs: usize) -> Trainer {
    trainer_with(tiny_config(0), epochs)
}

fn trainer_with(config: GPTConfig, epochs: usize) -> Trainer {
    let model = GPT::new(config, &Device::Cpu).unwrap();
    let optimizer = setup_optimizers(
        &model,
        OptimizerHyperparams {
            learning_rate: 1e-2,
            ..OptimizerHyperparams::default()
        },
    )
    .unwrap();
    Trainer::new(model, optimizer, Some(loader()), training_config(epochs))
}

#[test]
fn test_seeded_training_with_dropout_is_deterministic() {
    let config = GPTConfig {
        dropout: 0.2,
        ..tiny_config(1)
    };
    let mut a = trainer_with(config.clone(), 0);
    let mut b = trainer_with(config, 0);

    let (inputs, targets) = loader().get_batch(Split::Train).unwrap();
    let losses_a: Vec<f32> = (0..3)
        .map(|_| a.train_on_batch(&inputs, &targets).unwrap())
        .collect();
    let losses_b: Vec<f32> = (0..3)
        .map(|_| b.train_on_batch(&inputs, &targets).unwrap())
        .collect();
    assert_eq!(losses_a, losses_b);
    assert_eq!(a.model().dropout_state().draws, b.model().dropout_state().draws);
    assert!(a.model().dropout_state().draws > 0);
}

#[test]
fn test_dropout_masks_differ_between_steps() {
    let mut trainer = trainer_with(
        GPTConfig {
            dropout: 0.5,
            ..tiny_config(2)
        },
        0,
    );
    let (inputs, targets) = loader().get_batch(Split::Train).unwrap();
    let first = trainer.model().loss(&inputs, &targets).unwrap();
    let second = trainer.model().loss(&inputs, &targets).unwrap();
    assert_ne!(
        first.to_scalar::<f32>().unwrap(),
        second.to_scalar::<f32>().unwrap()
    );
}

#[test]
fn test_training_lowers_loss() {
    let mut trainer = trainer(100);
    let before = trainer.estimate_loss().unwrap();

    trainer.run().unwrap();
    let after = trainer.estimate_loss().unwrap();

    assert!(after.train < before.train, "train loss {} -> {}", before.train, after.train);
    assert!(after.eval < before.eval, "eval loss {} -> {}", before.eval, after.eval);
}

#[test]
fn test_state_transitions() {
    let mut trainer = trainer(3);
    assert_eq!(trainer.state(), TrainingState::NotStarted);
    assert!(trainer.last_loss().is_infinite());

    let loss = trainer.run().unwrap();

    assert_eq!(trainer.state(), TrainingState::Done);
    assert!(loss.is_finite());
    assert_eq!(trainer.last_loss(), loss);
    assert_eq!(trainer.optimizer().step_count(), 3);
    assert_eq!(trainer.start_epoch(), 3);
}

#[test]
fn test_zero_epochs_takes_no_step() {
    let mut trainer = trainer(0);
    trainer.run().unwrap();
    assert_eq!(trainer.optimizer().step_count(), 0);
    assert_eq!(trainer.state(), TrainingState::Done);
}

#[test]
fn test_estimate_loss_restores_mode() {
    let mut trainer = trainer(1);
    assert!(trainer.model().is_training());
    trainer.estimate_loss().unwrap();
    assert!(trainer.model().is_training());
}

#[test]
fn test_generation_only_mode() {
    let model = GPT::new(tiny_config(0), &Device::Cpu).unwrap();
    let optimizer = setup_optimizers(&model, OptimizerHyperparams::default()).unwrap();
    let mut trainer = Trainer::new(model, optimizer, None, training_config(10));

    let tokens = trainer.generate(12, &mut StdRng::seed_from_u64(0)).unwrap();

    assert_eq!(tokens.len(), 13);
    assert_eq!(tokens[0], 0);
    assert_eq!(trainer.state(), TrainingState::Done);
    assert_eq!(trainer.optimizer().step_count(), 0);
}

#[test]
fn test_training_without_data_fails() {
    let model = GPT::new(tiny_config(0), &Device::Cpu).unwrap();
    let optimizer = setup_optimizers(&model, OptimizerHyperparams::default()).unwrap();
    let mut trainer = Trainer::new(model, optimizer, None, training_config(10));
    assert!(trainer.run().is_err());
}
