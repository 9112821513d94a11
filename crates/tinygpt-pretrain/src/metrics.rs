//! Training metrics logging

use std::fmt;
use std::path::Path;
use std::time::Instant;

/// Training metrics for a single step
#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    /// Loss value
    pub loss: f32,
    /// Learning rate
    pub learning_rate: f64,
    /// Throughput (tokens per second)
    pub throughput: f32,
    /// Epoch number
    pub epoch: usize,
}

/// Mean losses from one loss estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalLosses {
    /// Mean loss over sampled training batches
    pub train: f32,
    /// Mean loss over sampled evaluation batches
    pub eval: f32,
}

impl fmt::Display for EvalLosses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "train loss {:.4} eval loss {:.4}", self.train, self.eval)
    }
}

/// Metrics logger for training
///
/// Progress goes to stdout unless `quiet` is set; warnings always go to stderr.
pub struct MetricsLogger {
    log_interval: usize,
    quiet: bool,
    steps: usize,
    tokens_since_log: usize,
    last_log: Instant,
}

impl MetricsLogger {
    /// Create a new metrics logger (`log_interval` 0 disables step lines)
    pub fn new(log_interval: usize, quiet: bool) -> Self {
        Self {
            log_interval,
            quiet,
            steps: 0,
            tokens_since_log: 0,
            last_log: Instant::now(),
        }
    }

    /// Log metrics for a training step
    pub fn log_step(
        &mut self,
        epoch: usize,
        loss: f32,
        learning_rate: f64,
        tokens_processed: usize,
    ) {
        self.steps += 1;
        self.tokens_since_log += tokens_processed;

        if self.log_interval == 0 || self.steps % self.log_interval != 0 {
            return;
        }
        let elapsed = self.last_log.elapsed().as_secs_f32();
        let throughput = if elapsed > 0.0 {
            self.tokens_since_log as f32 / elapsed
        } else {
            0.0
        };
        let metrics = TrainingMetrics {
            loss,
            learning_rate,
            throughput,
            epoch,
        };
        self.print_metrics(&metrics);
        self.tokens_since_log = 0;
        self.last_log = Instant::now();
    }

    /// Log a loss estimate
    pub fn log_eval(&self, epoch: usize, losses: &EvalLosses) {
        self.info(format_args!("step {epoch} {losses}"));
    }

    /// Log a checkpoint write
    pub fn log_checkpoint(&self, epoch: usize, path: &Path) {
        self.info(format_args!("checkpointing at epoch {epoch} to {}", path.display()));
    }

    /// Print a progress line unless quiet
    pub fn info(&self, message: fmt::Arguments<'_>) {
        if !self.quiet {
            println!("{message}");
        }
    }

    /// Print a warning to stderr
    pub fn warn(&self, message: fmt::Arguments<'_>) {
        eprintln!("Warning: {message}");
    }

    /// Print metrics to stdout
    fn print_metrics(&self, metrics: &TrainingMetrics) {
        self.info(format_args!(
            "Step {}: loss={:.6}, lr={:.2e}, throughput={:.2} tokens/s",
            metrics.epoch, metrics.loss, metrics.learning_rate, metrics.throughput
        ));
    }

    /// Number of steps logged so far
    pub fn steps(&self) -> usize {
        self.steps
    }
}
