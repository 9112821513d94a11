//! Train and sample a small decoder-only language model
//!
//! # Usage
//!
//! ```bash
//! tinygpt \
//!   --train input.txt \
//!   --eval eval.txt \
//!   [--tokenizer tokenizer/default.json] \
//!   [--epochs 5000] \
//!   [--save-checkpoint model.safetensors] \
//!   [--load-checkpoint model.safetensors] \
//!   [--checkpoint-interval 1000] \
//!   [--generate 300]
//! ```
//!
//! The tokenizer is loaded from `--tokenizer` when the file exists, otherwise
//! it is trained on the train and eval files and saved there.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tinygpt_model::{ComputeBackend, GPT};
use tinygpt_pretrain::{
    checkpoint::CheckpointError,
    config::TrainingConfigFile,
    dataloader::{load_or_tokenize, DataLoader},
    optimizer::setup_optimizers,
    train::{Trainer, TrainingConfig},
};
use tinygpt_tokenizer::Tokenizer;

/// Train and sample a small GPT-style language model
#[derive(Parser, Debug)]
#[command(name = "tinygpt")]
#[command(about = "Train and sample a small GPT-style language model", long_about = None)]
struct Args {
    /// Training data file
    #[arg(long, value_name = "PATH")]
    train: Option<PathBuf>,

    /// Eval data file
    #[arg(long, value_name = "PATH")]
    eval: Option<PathBuf>,

    /// Generate output of length N instead of training
    #[arg(long, value_name = "N")]
    generate: Option<usize>,

    /// Tokenizer JSON file
    #[arg(long, value_name = "PATH", default_value = "tokenizer/default.json")]
    tokenizer: PathBuf,

    /// File to checkpoint model parameters to
    #[arg(long, value_name = "PATH")]
    save_checkpoint: Option<PathBuf>,

    /// File to load model parameters from
    #[arg(long, value_name = "PATH")]
    load_checkpoint: Option<PathBuf>,

    /// Number of epochs between checkpoints [default: 1000]
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Number of training epochs [default: 0]
    #[arg(long)]
    epochs: Option<usize>,

    /// Path to training configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Compute backend: cpu, cuda, metal or auto
    #[arg(long, default_value = "cpu")]
    backend: ComputeBackend,

    /// Seed for initialization, batch sampling and generation
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress progress output
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // A bad resume path is fatal before anything is computed
    if let Some(path) = &args.load_checkpoint {
        if !path.is_file() {
            return Err(CheckpointError::NotFound(path.clone()).into());
        }
    }

    // Load configuration from file or use defaults, then apply flag overrides
    let mut config_file = match &args.config {
        Some(path) => TrainingConfigFile::from_file(path).context("Failed to load config file")?,
        None => TrainingConfigFile::default(),
    };
    if let Some(epochs) = args.epochs {
        config_file.training.epochs = epochs;
    }
    if let Some(interval) = args.checkpoint_interval {
        config_file.training.checkpoint_interval = interval;
    }
    if let Some(seed) = args.seed {
        config_file.training.seed = Some(seed);
        config_file.model.seed.get_or_insert(seed);
    }

    let device = args.backend.resolve()?;
    log(&args, format_args!("device: {}", args.backend));

    let tokenizer = get_tokenizer(&args, config_file.training.tokenizer_vocab_size)?;

    let model_config = config_file
        .model
        .to_gpt_config(tokenizer.vocab_size())
        .context("Invalid model configuration")?;
    let model = GPT::new(model_config, &device)?;
    log(
        &args,
        format_args!("model has {} parameters", model.num_parameters()),
    );
    let optimizer = setup_optimizers(&model, config_file.optimizer)?;

    let training_config = TrainingConfig {
        epochs: config_file.training.epochs,
        eval_interval: config_file.training.eval_interval,
        eval_iters: config_file.training.eval_iters,
        checkpoint_interval: config_file.training.checkpoint_interval,
        log_interval: config_file.training.log_interval,
        save_path: args.save_checkpoint.clone(),
        quiet: args.quiet,
    };
    let mut rng = match config_file.training.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // If we are just generating output and not training
    if let Some(length) = args.generate {
        let mut trainer = Trainer::new(model, optimizer, None, training_config);
        if let Some(path) = &args.load_checkpoint {
            trainer.resume_from(path)?;
        }
        let tokens = trainer.generate(length, &mut rng)?;
        println!("{}", tokenizer.decode(&tokens)?);
        return Ok(());
    }

    let (train_path, eval_path) = match (&args.train, &args.eval) {
        (Some(train), Some(eval)) => (train, eval),
        _ => anyhow::bail!("Training requires both --train and --eval data files"),
    };
    let train = load_split(&args, train_path, &tokenizer)?;
    let eval = load_split(&args, eval_path, &tokenizer)?;
    log(&args, format_args!("finished loading preprocessed data"));

    let data = DataLoader::new(
        train,
        eval,
        config_file.training.batch_size,
        model.config().sequence_len,
        config_file.training.seed,
        &device,
    )
    .context("Failed to create data loader")?;

    let mut trainer = Trainer::new(model, optimizer, Some(data), training_config);
    if let Some(path) = &args.load_checkpoint {
        trainer.resume_from(path)?;
    }
    let loss = trainer.run().context("Training failed")?;

    log(&args, format_args!("training finished with loss {loss:.4}"));
    Ok(())
}

fn log(args: &Args, message: std::fmt::Arguments<'_>) {
    if !args.quiet {
        println!("{message}");
    }
}

/// Load the tokenizer, training it on the data files when it does not exist yet
fn get_tokenizer(args: &Args, vocab_size: usize) -> Result<Tokenizer> {
    let files: Vec<&Path> = [&args.train, &args.eval]
        .into_iter()
        .flatten()
        .map(PathBuf::as_path)
        .collect();
    let (tokenizer, trained) =
        Tokenizer::load_or_train(&args.tokenizer, files.as_slice(), vocab_size)
            .with_context(|| format!("Failed to load or train tokenizer {:?}", args.tokenizer))?;
    if trained {
        log(args, format_args!("saving tokenizer to {}", args.tokenizer.display()));
    } else {
        log(args, format_args!("loading tokenizer from {}", args.tokenizer.display()));
    }
    Ok(tokenizer)
}

fn load_split(args: &Args, path: &Path, tokenizer: &Tokenizer) -> Result<Vec<u32>> {
    let (ids, cached) = load_or_tokenize(path, tokenizer)?;
    if !cached {
        log(args, format_args!("tokenized {} into {} tokens", path.display(), ids.len()));
    }
    Ok(ids)
}
