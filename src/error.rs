//! Error types shared by the model, data and evaluation layers.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between loading a cohort and scoring its clusters.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or contradictory hyperparameters, detected at construction.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A tensor or dataset width disagrees with what a model expects.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A clustering or agreement metric is undefined for the given labels.
    #[error("metric `{metric}` is undefined: {reason}")]
    DegenerateMetric { metric: String, reason: String },

    /// Training produced a non-finite loss.
    #[error("non-finite loss ({value}) at epoch {epoch}")]
    NumericInstability { epoch: usize, value: f64 },

    /// The dataset has no samples or no features.
    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    /// An operation was called in the wrong experiment phase.
    #[error("experiment is {actual}, expected {expected}")]
    InvalidPhase {
        expected: &'static str,
        actual: &'static str,
    },

    /// Malformed input data.
    #[error("parse error: {0}")]
    Parse(String),

    /// Tensor data could not be converted back to host values.
    #[error("tensor conversion failed: {0}")]
    Tensor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a degenerate-metric error.
    pub fn degenerate(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DegenerateMetric {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    /// Create a shape-mismatch error.
    pub fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
