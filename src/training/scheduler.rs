use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Smallest learning-rate change that counts as a reduction
const LR_EPSILON: f64 = 1e-8;

/// Scheduler selection in [`crate::training::ExperimentConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Constant,
    #[default]
    Plateau,
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "plateau" | "reduce_on_plateau" => Ok(Self::Plateau),
            other => Err(format!("unknown scheduler `{}` (expected constant or plateau)", other)),
        }
    }
}

/// Learning rate schedulers stepped once per epoch with the epoch loss
#[derive(Debug, Clone)]
pub enum LearningRateScheduler {
    /// Constant learning rate
    Constant { lr: f64 },
    /// Reduce on plateau (minimizing, relative threshold)
    ReduceOnPlateau {
        lr: f64,
        factor: f64,
        patience: usize,
        threshold: f64,
        min_lr: f64,
        cooldown: usize,
        cooldown_counter: usize,
        best: f64,
        num_bad_epochs: usize,
    },
}

impl LearningRateScheduler {
    /// Create constant scheduler
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Create reduce on plateau scheduler with a 1e-4 relative threshold
    pub fn reduce_on_plateau(lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self::ReduceOnPlateau {
            lr,
            factor,
            patience,
            threshold: 1e-4,
            min_lr,
            cooldown: 0,
            cooldown_counter: 0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }
    }

    /// Epochs to wait after a reduction before counting bad epochs again
    pub fn with_cooldown(mut self, epochs: usize) -> Self {
        if let Self::ReduceOnPlateau { cooldown, .. } = &mut self {
            *cooldown = epochs;
        }
        self
    }

    /// Get current learning rate
    pub fn get_lr(&self) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::ReduceOnPlateau { lr, .. } => lr,
        }
    }

    /// Step the scheduler with the latest loss and return the new rate
    pub fn step_with_metric(&mut self, metric: f64) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::ReduceOnPlateau {
                lr,
                factor,
                patience,
                threshold,
                min_lr,
                cooldown,
                cooldown_counter,
                best,
                num_bad_epochs,
            } => {
                if metric < *best * (1.0 - *threshold) {
                    *best = metric;
                    *num_bad_epochs = 0;
                } else {
                    *num_bad_epochs += 1;
                }

                if *cooldown_counter > 0 {
                    *cooldown_counter -= 1;
                    *num_bad_epochs = 0;
                }

                if *num_bad_epochs > *patience {
                    let new_lr = (*lr * *factor).max(*min_lr);
                    if *lr - new_lr > LR_EPSILON {
                        tracing::info!("Reducing learning rate to {:.2e}", new_lr);
                        *lr = new_lr;
                    }
                    *cooldown_counter = *cooldown;
                    *num_bad_epochs = 0;
                }

                *lr
            }
        }
    }
}

impl Default for LearningRateScheduler {
    fn default() -> Self {
        Self::constant(1e-4)
    }
}
