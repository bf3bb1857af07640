use crate::data::{BatchLoader, DatasetProvider, ExpressionMatrix, Metadata};
use crate::error::{Error, Result};
use crate::evaluation::{self, EvaluationReport, KMeans};
use crate::model::checkpoint::CheckpointMetadata;
use crate::model::loss::AutoencoderLoss;
use crate::model::{Autoencoder, AutoencoderConfig};
use crate::training::monitor::{Monitor, TrainingMonitor};
use crate::training::scheduler::LearningRateScheduler;
use crate::training::ExperimentConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

/// Lifecycle of an [`Experiment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructed,
    Training,
    Evaluated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Constructed => "constructed",
            Phase::Training => "training",
            Phase::Evaluated => "evaluated",
        }
    }
}

/// Trains an autoencoder on one cohort, then clusters its latent codes and
/// scores them against the subtypes
pub struct Experiment<B: AutodiffBackend> {
    config: ExperimentConfig,
    model_config: AutoencoderConfig,
    device: B::Device,
    data: ExpressionMatrix,
    metadata: Metadata,
    model: Autoencoder<B>,
    optimizer: AdamConfig,
    scheduler: LearningRateScheduler,
    loader: BatchLoader,
    monitor: Box<dyn Monitor>,
    phase: Phase,
    latent: Option<Vec<Vec<f32>>>,
    report: Option<EvaluationReport>,
    metric: Option<f64>,
}

impl<B: AutodiffBackend> Experiment<B> {
    /// Load the dataset, build the model and attach optimizer, scheduler,
    /// batch loader and monitor
    pub fn new<P: DatasetProvider + ?Sized>(
        provider: &P,
        model_config: AutoencoderConfig,
        config: ExperimentConfig,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;

        let (data, metadata) = provider.load()?;
        if data.is_empty() {
            return Err(Error::EmptyDataset("provider returned no samples or no features".into()));
        }
        if metadata.feature_names.len() != data.n_features() {
            return Err(Error::shape(
                "feature names",
                data.n_features(),
                metadata.feature_names.len(),
            ));
        }
        if metadata.subtypes.len() != data.n_samples() {
            return Err(Error::shape(
                "subtype labels",
                data.n_samples(),
                metadata.subtypes.len(),
            ));
        }

        let input_shape = metadata.feature_names.len();
        info!(
            "Input shape: {} ({} samples, {} with a subtype)",
            input_shape,
            data.n_samples(),
            metadata.labelled()
        );

        let model = model_config.init::<B>(input_shape, &device)?;
        debug!("Built {} autoencoder with {} parameters", model_config.architecture, model.num_params());

        let loader = BatchLoader::new(data.n_samples(), config.batch_size, config.shuffle, config.seed);
        let monitor: Box<dyn Monitor> = Box::new(TrainingMonitor::from_config(&config));

        Ok(Self {
            optimizer: AdamConfig::new(),
            scheduler: config.scheduler(),
            loader,
            monitor,
            config,
            model_config,
            device,
            data,
            metadata,
            model,
            phase: Phase::Constructed,
            latent: None,
            report: None,
            metric: None,
        })
    }

    /// Replace the monitor
    pub fn with_monitor(mut self, monitor: Box<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &Autoencoder<B> {
        &self.model
    }

    pub fn model_config(&self) -> &AutoencoderConfig {
        &self.model_config
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn data(&self) -> &ExpressionMatrix {
        &self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn losses(&self) -> &[f64] {
        self.monitor.losses()
    }

    /// Latent codes in sample order, after `run`
    pub fn latent(&self) -> Option<&[Vec<f32>]> {
        self.latent.as_deref()
    }

    pub fn report(&self) -> Option<&EvaluationReport> {
        self.report.as_ref()
    }

    /// Adjusted Rand index of the final clustering, after `run`
    pub fn metric(&self) -> Option<f64> {
        self.metric
    }

    /// Train, then evaluate once
    pub fn run(&mut self) -> Result<&EvaluationReport> {
        if self.phase != Phase::Constructed {
            return Err(Error::InvalidPhase {
                expected: Phase::Constructed.as_str(),
                actual: self.phase.as_str(),
            });
        }

        self.phase = Phase::Training;
        self.train()?;

        let report = self.evaluate()?;
        self.metric = Some(report.adjusted_rand_index());
        self.report = Some(report);
        self.phase = Phase::Evaluated;

        self.report
            .as_ref()
            .ok_or_else(|| Error::degenerate("experiment", "evaluation produced no report"))
    }

    fn train(&mut self) -> Result<()> {
        let mut optimizer = self.optimizer.init::<B, Autoencoder<B>>();
        let loss_fn = AutoencoderLoss::new(self.config.kl_weight);
        let mut model = self.model.clone();

        let progress = if self.config.progress_bar {
            let bar = ProgressBar::new(self.config.n_epoch as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        info!(
            "Training for up to {} epochs ({} batches per epoch)",
            self.config.n_epoch,
            self.loader.n_batches()
        );
        self.monitor.on_train_begin();

        for epoch in 0..self.config.n_epoch {
            let lr = self.scheduler.get_lr();
            let mut running_loss = 0.0;
            let mut count = 0usize;

            for batch in self.loader.epoch_tensors::<B>(&self.data, &self.device) {
                let output = model.forward(batch.clone());
                let loss = loss_fn.forward(&output, batch);
                let value: f64 = loss.clone().into_scalar().elem();
                if !value.is_finite() {
                    progress.abandon();
                    return Err(Error::NumericInstability { epoch, value });
                }

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(lr, model, grads);
                running_loss += value;
                count += 1;
            }

            let train_loss = running_loss / count.max(1) as f64;
            self.monitor.record_lr(lr);
            self.monitor.append_loss(train_loss);
            self.monitor.callbacks(epoch);
            self.scheduler.step_with_metric(train_loss);

            progress.set_message(format!("loss {:.6}", train_loss));
            progress.inc(1);

            if self.monitor.should_stop() {
                info!("Stopping after epoch {}", epoch + 1);
                break;
            }
        }

        progress.finish_and_clear();
        self.monitor.on_train_end();
        self.model = model;
        Ok(())
    }

    fn evaluate(&mut self) -> Result<EvaluationReport> {
        let latent = self.encode(&self.data)?;

        let kmeans = KMeans::new(self.config.n_clusters)
            .with_n_init(self.config.kmeans_n_init)
            .with_max_iter(self.config.kmeans_max_iter)
            .with_seed(self.config.seed);
        let report = evaluation::evaluate(&latent, &self.metadata.subtypes, &kmeans)?;

        self.latent = Some(latent);
        Ok(report)
    }

    /// Latent codes of `matrix` in one gradient-free pass with dropout off
    pub fn encode(&self, matrix: &ExpressionMatrix) -> Result<Vec<Vec<f32>>> {
        self.model.check_input(matrix.n_features())?;
        let model = self.model.valid();
        let input = matrix.to_tensor::<B>(&self.device).inner();
        latent_rows(model.encode(input))
    }

    /// Sidecar metadata describing the trained model
    pub fn checkpoint_metadata(&self) -> CheckpointMetadata {
        let mut metadata =
            CheckpointMetadata::new(self.model_config.clone(), self.metadata.feature_names.clone());
        metadata.epochs_trained = self.monitor.losses().len();
        metadata.final_loss = self.monitor.losses().last().copied();
        metadata.adjusted_rand_index = self.metric;
        metadata.preprocessing = self.metadata.preprocessing.clone();
        metadata
    }
}

/// Split a `[n, latent_dim]` tensor into host rows
pub fn latent_rows<B: Backend>(latent: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, width] = latent.dims();
    let values = latent
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{:?}", e)))?;
    Ok(values.chunks(width.max(1)).map(<[f32]>::to_vec).collect())
}
