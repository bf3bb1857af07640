pub mod callbacks;
pub mod experiment;
pub mod monitor;
pub mod scheduler;

use crate::error::{Error, Result};
use scheduler::{LearningRateScheduler, SchedulerKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use experiment::{Experiment, Phase};
pub use monitor::{Monitor, TrainingMonitor};

/// Experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Number of training epochs
    pub n_epoch: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Learning rate scheduler type
    pub lr_scheduler: SchedulerKind,
    /// Plateau scheduler: multiplicative reduction
    pub lr_factor: f64,
    /// Plateau scheduler: epochs without improvement before a reduction
    pub lr_patience: usize,
    /// Plateau scheduler: floor
    pub min_lr: f64,
    /// Plateau scheduler: epochs to wait after a reduction
    pub lr_cooldown: usize,
    /// Weight of the KL term for variational models
    pub kl_weight: f64,
    /// k-means cluster count
    pub n_clusters: usize,
    /// k-means restarts, lowest inertia wins
    pub kmeans_n_init: usize,
    /// k-means Lloyd iterations per restart
    pub kmeans_max_iter: usize,
    /// Early stopping patience on the epoch loss (0 = disabled)
    pub early_stopping_patience: usize,
    /// Smallest loss decrease that resets early stopping
    pub early_stopping_min_delta: f64,
    /// Reshuffle samples every epoch
    pub shuffle: bool,
    /// Random seed for shuffling and k-means
    pub seed: u64,
    /// 0 = quiet, 1 = per-epoch progress logging
    pub verbose: u8,
    /// Log the loss every this many epochs when verbose
    pub log_every: usize,
    /// Show a progress bar
    pub progress_bar: bool,
    /// Loss history JSON written when training ends
    pub loss_log: Option<PathBuf>,
    /// Also rewrite the loss history every this many epochs (0 = end only)
    pub loss_log_every: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            n_epoch: 3000,
            batch_size: 32,
            learning_rate: 1e-4,
            lr_scheduler: SchedulerKind::Plateau,
            lr_factor: 0.1,
            lr_patience: 10,
            min_lr: 1e-5,
            lr_cooldown: 0,
            kl_weight: 1.0,
            n_clusters: 5,
            kmeans_n_init: 10,
            kmeans_max_iter: 300,
            early_stopping_patience: 0,
            early_stopping_min_delta: 1e-4,
            shuffle: true,
            seed: 2026,
            verbose: 0,
            log_every: 100,
            progress_bar: true,
            loss_log: None,
            loss_log_every: 0,
        }
    }
}

impl ExperimentConfig {
    /// Create configuration for quick testing
    pub fn quick_test() -> Self {
        Self {
            n_epoch: 5,
            batch_size: 8,
            learning_rate: 1e-3,
            n_clusters: 2,
            kmeans_n_init: 4,
            progress_bar: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_epoch == 0 {
            return Err(Error::config("n_epoch must be positive"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be positive"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate must be positive"));
        }
        if !(0.0..1.0).contains(&self.lr_factor) {
            return Err(Error::config("lr_factor must be in [0, 1)"));
        }
        if !(self.early_stopping_min_delta >= 0.0) {
            return Err(Error::config("early_stopping_min_delta must be non-negative"));
        }
        if self.n_clusters < 2 {
            return Err(Error::config("n_clusters must be at least 2"));
        }
        if self.kmeans_n_init == 0 || self.kmeans_max_iter == 0 {
            return Err(Error::config("kmeans_n_init and kmeans_max_iter must be positive"));
        }
        Ok(())
    }

    pub fn scheduler(&self) -> LearningRateScheduler {
        match self.lr_scheduler {
            SchedulerKind::Constant => LearningRateScheduler::constant(self.learning_rate),
            SchedulerKind::Plateau => LearningRateScheduler::reduce_on_plateau(
                self.learning_rate,
                self.lr_factor,
                self.lr_patience,
                self.min_lr,
            )
            .with_cooldown(self.lr_cooldown),
        }
    }
}

/// Training state
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    /// Lowest epoch loss seen
    pub best_loss: Option<f64>,
    /// Number of epochs without improvement
    pub epochs_without_improvement: usize,
    /// Epoch-mean loss per epoch
    pub loss_history: Vec<f64>,
    /// Learning rate used per epoch
    pub lr_history: Vec<f64>,
}

impl TrainingState {
    /// Create new training state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch loss
    pub fn record_loss(&mut self, loss: f64) {
        self.epoch += 1;
        self.loss_history.push(loss);

        match self.best_loss {
            Some(best) if loss >= best => self.epochs_without_improvement += 1,
            _ => {
                self.best_loss = Some(loss);
                self.epochs_without_improvement = 0;
            }
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.n_epoch, 3000);
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.n_clusters, 5);
        assert_eq!(config.lr_scheduler, SchedulerKind::Plateau);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{"n_epoch": 10, "lr_scheduler": "constant"}"#).unwrap();
        assert_eq!(config.n_epoch, 10);
        assert_eq!(config.batch_size, 32);
        assert!(matches!(config.scheduler(), LearningRateScheduler::Constant { .. }));
    }

    #[test]
    fn test_scheduler_carries_cooldown() {
        let config: ExperimentConfig = serde_json::from_str(r#"{"lr_cooldown": 4}"#).unwrap();
        assert_eq!(config.early_stopping_min_delta, 1e-4);
        assert_eq!(config.loss_log_every, 0);
        assert!(matches!(
            config.scheduler(),
            LearningRateScheduler::ReduceOnPlateau { cooldown: 4, .. }
        ));
    }

    #[test]
    fn test_validate_rejects_negative_min_delta() {
        let config = ExperimentConfig {
            early_stopping_min_delta: -1.0,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_single_cluster() {
        let config = ExperimentConfig {
            n_clusters: 1,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_state_tracks_best_loss() {
        let mut state = TrainingState::new();
        state.record_loss(1.0);
        state.record_loss(1.5);
        state.record_loss(0.5);
        state.record_loss(0.7);
        assert_eq!(state.epoch, 4);
        assert_eq!(state.best_loss, Some(0.5));
        assert_eq!(state.epochs_without_improvement, 1);
        assert_eq!(state.last_loss(), Some(0.7));
    }
}
