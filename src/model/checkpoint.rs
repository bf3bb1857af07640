use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use anyhow::{Context, Result};
use tracing::info;

use crate::data::FittedPreprocessor;
use crate::error::Error;
use crate::model::{Autoencoder, AutoencoderConfig};

/// Sidecar written next to the model weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Crate version that wrote the checkpoint
    pub version: String,
    /// Hyperparameters needed to rebuild the model
    pub model_config: AutoencoderConfig,
    /// Width the model was built for
    pub input_shape: usize,
    /// Feature (gene) order the model was trained on
    pub feature_names: Vec<String>,
    /// Epochs actually run
    pub epochs_trained: usize,
    /// Mean loss of the last epoch
    pub final_loss: Option<f64>,
    /// Clustering agreement after training, when evaluated
    pub adjusted_rand_index: Option<f64>,
    /// Preprocessing fitted on the training cohort
    #[serde(default)]
    pub preprocessing: Option<FittedPreprocessor>,
    /// Seconds since the Unix epoch
    pub created_unix: u64,
}

impl CheckpointMetadata {
    pub fn new(model_config: AutoencoderConfig, feature_names: Vec<String>) -> Self {
        let created_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_config,
            input_shape: feature_names.len(),
            feature_names,
            epochs_trained: 0,
            final_loss: None,
            adjusted_rand_index: None,
            preprocessing: None,
            created_unix,
        }
    }

    /// Fail with `ShapeMismatch` when a dataset has a different width.
    pub fn check_width(&self, features: usize) -> crate::Result<()> {
        if features != self.input_shape {
            return Err(Error::shape("checkpoint input", self.input_shape, features));
        }
        Ok(())
    }
}

/// Saves and restores autoencoders with their metadata sidecar
pub struct ModelSaver;

impl ModelSaver {
    /// Save model weights to `path` and metadata to `path` with a `.json` extension
    pub fn save<B: Backend, P: AsRef<Path>>(
        model: &Autoencoder<B>,
        path: P,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let record = model.clone().into_record();
        CompactRecorder::new()
            .record(record, path.to_path_buf())
            .context("Failed to save model")?;

        let metadata_path = path.with_extension("json");
        let metadata_json = serde_json::to_string_pretty(metadata)
            .context("Failed to serialize metadata")?;
        fs::write(&metadata_path, metadata_json)
            .context("Failed to write metadata file")?;

        info!("Saved model: {:?}", path);
        Ok(())
    }

    /// Read only the metadata sidecar
    pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<CheckpointMetadata> {
        let metadata_path = path.as_ref().with_extension("json");
        let metadata_json = fs::read_to_string(&metadata_path)
            .with_context(|| format!("Failed to read metadata file {:?}", metadata_path))?;
        let metadata = serde_json::from_str(&metadata_json)
            .context("Failed to parse metadata")?;
        Ok(metadata)
    }

    /// Rebuild the model from its sidecar config and load the weights
    pub fn load<B: Backend, P: AsRef<Path>>(
        path: P,
        device: &B::Device,
    ) -> Result<(Autoencoder<B>, CheckpointMetadata)> {
        let path = path.as_ref();
        info!("Loading model from {:?}", path);

        let metadata = Self::load_metadata(path)?;

        let record = CompactRecorder::new()
            .load(path.to_path_buf(), device)
            .context("Failed to load model")?;

        let model = metadata
            .model_config
            .init::<B>(metadata.input_shape, device)
            .context("Checkpoint config no longer builds")?
            .load_record(record);

        info!(
            "Loaded {} model trained for {} epochs",
            metadata.model_config.architecture, metadata.epochs_trained
        );
        Ok((model, metadata))
    }

    /// Load a model for a dataset of `features` columns, failing with
    /// `ShapeMismatch` before touching the weights if the widths differ
    pub fn load_for_dataset<B: Backend, P: AsRef<Path>>(
        path: P,
        features: usize,
        device: &B::Device,
    ) -> Result<(Autoencoder<B>, CheckpointMetadata)> {
        let metadata = Self::load_metadata(path.as_ref())?;
        metadata.check_width(features)?;
        Self::load(path, device)
    }
}
