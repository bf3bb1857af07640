//! # omics-ae: autoencoder representations of gene-expression cohorts
//!
//! Compresses each sample of an expression matrix into a latent code with a
//! convolutional or fully-connected autoencoder (optionally variational or
//! vector-quantized), clusters the codes with k-means and scores the
//! clusters against known cancer subtypes.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use omics_ae::data::{DataConfig, TabularDataset};
//! use omics_ae::model::AutoencoderConfig;
//! use omics_ae::training::{Experiment, ExperimentConfig};
//! use omics_ae::TrainingBackend;
//!
//! let dataset = TabularDataset::from_config(&DataConfig::default()).unwrap();
//! let mut experiment = Experiment::<TrainingBackend>::new(
//!     &dataset,
//!     AutoencoderConfig::cnn(),
//!     ExperimentConfig::default(),
//!     Default::default(),
//! )
//! .unwrap();
//!
//! let report = experiment.run().unwrap();
//! println!("ARI: {:.4}", report.adjusted_rand_index());
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod training;
pub mod utils;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub use data::{DatasetProvider, ExpressionMatrix, InMemoryDataset, Metadata};
pub use error::{Error, Result};
pub use evaluation::EvaluationReport;
pub use model::{Architecture, Autoencoder, AutoencoderConfig};
pub use training::{Experiment, ExperimentConfig, Phase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - autoencoder subtype discovery for expression cohorts",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let info = info();
        assert!(info.contains("omics-ae"));
        assert!(info.contains(VERSION));
    }
}
