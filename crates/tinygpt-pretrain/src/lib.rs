//! Training and sampling for tinygpt
//!
//! This crate implements the training loop for the decoder-only language
//! model on raw text: token stream loading, random-offset batching, AdamW,
//! checkpointing with resume, and generation-only runs.

pub mod checkpoint;
pub mod config;
pub mod dataloader;
pub mod metrics;
pub mod optimizer;
pub mod train;

pub use checkpoint::{CheckpointError, CheckpointMetadata};
pub use train::{Trainer, TrainingConfig, TrainingState};
