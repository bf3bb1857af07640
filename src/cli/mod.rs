use crate::data::{Cohort, DataConfig};
use crate::model::{Architecture, AutoencoderConfig};
use crate::training::scheduler::SchedulerKind;
use crate::training::ExperimentConfig;
use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// omics-ae: autoencoder subtype discovery for gene-expression cohorts
#[derive(Parser, Debug)]
#[command(name = "omics-ae")]
#[command(about = "Autoencoder representations and subtype clustering for expression cohorts")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train an autoencoder, cluster its latent codes and score them
    Train(TrainArgs),

    /// Write latent codes for a dataset with a saved model
    Encode(EncodeArgs),

    /// Print the derived layer shapes of an architecture without training
    Probe(ProbeArgs),
}

/// Where the cohort lives and how it is prepared
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Data configuration file (JSON)
    #[arg(long)]
    pub data_config: Option<PathBuf>,

    /// Root directory of the cohorts
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Cohort (brca, cptac, custom)
    #[arg(long)]
    pub cohort: Option<Cohort>,

    /// Expression matrix (CSV or TSV, optionally gzipped)
    #[arg(short, long)]
    pub expression: Option<PathBuf>,

    /// Patient subtype table
    #[arg(short, long)]
    pub subtypes: Option<PathBuf>,

    /// Keep only the most variable genes
    #[arg(long)]
    pub max_features: Option<usize>,

    /// Skip the log1p transform
    #[arg(long)]
    pub no_log: bool,
}

impl DataArgs {
    /// Data configuration file with command-line overrides applied
    pub fn data_config(&self) -> Result<DataConfig> {
        let mut config = match &self.data_config {
            Some(path) => read_json(path)?,
            None => DataConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(cohort) = self.cohort {
            config.cohort = cohort;
        }
        if let Some(path) = &self.expression {
            config.expression_path = Some(path.clone());
        }
        if let Some(path) = &self.subtypes {
            config.subtypes_path = Some(path.clone());
        }
        if self.max_features.is_some() {
            config.max_features = self.max_features;
        }
        if self.no_log {
            config.log_transform = false;
        }
        Ok(config)
    }
}

/// Autoencoder selection and overrides
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Autoencoder configuration file (JSON)
    #[arg(long)]
    pub model_config: Option<PathBuf>,

    /// Architecture (cnn, mlp)
    #[arg(short, long)]
    pub architecture: Option<Architecture>,

    /// Latent dimension
    #[arg(long)]
    pub latent_dim: Option<usize>,

    /// Encoder stages
    #[arg(long)]
    pub num_layers: Option<usize>,

    /// Dropout rate
    #[arg(long)]
    pub dropout: Option<f64>,

    /// Variational autoencoder
    #[arg(long)]
    pub variational: bool,

    /// Vector-quantized latent space
    #[arg(long, conflicts_with = "variational")]
    pub quantized: bool,
}

impl ModelArgs {
    /// Model configuration: file, else the architecture preset, then overrides
    pub fn model_config(&self) -> Result<AutoencoderConfig> {
        let mut config = match &self.model_config {
            Some(path) => AutoencoderConfig::load(path)
                .map_err(|e| anyhow!("Failed to read model config {:?}: {:?}", path, e))?,
            None => match self.architecture {
                Some(Architecture::Cnn) => AutoencoderConfig::cnn(),
                _ => AutoencoderConfig::mlp(),
            },
        };

        if let Some(architecture) = self.architecture {
            config.architecture = architecture;
        }
        if let Some(latent_dim) = self.latent_dim {
            config.latent_dim = latent_dim;
        }
        if let Some(num_layers) = self.num_layers {
            config.num_layers = num_layers;
        }
        if let Some(dropout) = self.dropout {
            config.dropout = dropout;
        }
        if self.variational {
            config.variational = true;
        }
        if self.quantized {
            config.quantized = true;
        }
        Ok(config)
    }
}

/// Training arguments
#[derive(Parser, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Experiment configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for the report, embeddings and checkpoint
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Number of training epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Learning rate scheduler (constant, plateau)
    #[arg(long)]
    pub scheduler: Option<SchedulerKind>,

    /// k-means cluster count
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Early stopping patience (0 disables)
    #[arg(long)]
    pub patience: Option<usize>,

    /// Quick test mode (fewer epochs)
    #[arg(long)]
    pub quick: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl TrainArgs {
    /// Experiment configuration file with command-line overrides applied
    pub fn experiment_config(&self, verbose: u8) -> Result<ExperimentConfig> {
        let mut config = match (&self.config, self.quick) {
            (Some(path), _) => read_json(path)?,
            (None, true) => ExperimentConfig::quick_test(),
            (None, false) => ExperimentConfig::default(),
        };

        if let Some(epochs) = self.epochs {
            config.n_epoch = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(kind) = self.scheduler {
            config.lr_scheduler = kind;
        }
        if let Some(k) = self.clusters {
            config.n_clusters = k;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(patience) = self.patience {
            config.early_stopping_patience = patience;
        }
        if self.no_progress {
            config.progress_bar = false;
        }
        config.verbose = config.verbose.max(verbose);
        Ok(config)
    }
}

/// Encoding arguments
#[derive(Parser, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Model checkpoint (without extension)
    #[arg(short, long, required = true)]
    pub model: PathBuf,

    /// Output CSV of latent codes
    #[arg(short, long, default_value = "embeddings.csv")]
    pub output: PathBuf,

    /// Also cluster the codes into this many groups
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,
}

/// Shape probe arguments
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Input width (number of genes)
    #[arg(short, long, required = true)]
    pub input_shape: usize,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity. `RUST_LOG` takes precedence.
pub fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_train_defaults() {
        let cli = Cli::parse_from(["omics-ae", "train", "-e", "data.tsv.gz"]);
        assert_eq!(cli.verbose, 0);

        match cli.command {
            Commands::Train(args) => {
                let data = args.data.data_config().unwrap();
                assert_eq!(data.expression_file().unwrap(), PathBuf::from("data.tsv.gz"));

                let config = args.experiment_config(cli.verbose).unwrap();
                assert_eq!(config.n_epoch, 3000);
                assert_eq!(config.n_clusters, 5);

                let model = args.model.model_config().unwrap();
                assert_eq!(model.architecture, Architecture::Mlp);
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_train_overrides() {
        let cli = Cli::parse_from([
            "omics-ae", "-vv", "train",
            "--architecture", "cnn",
            "--latent-dim", "16",
            "--variational",
            "--epochs", "20",
            "-k", "4",
            "--scheduler", "constant",
            "--cohort", "cptac",
        ]);
        assert_eq!(cli.verbose, 2);

        match cli.command {
            Commands::Train(args) => {
                let model = args.model.model_config().unwrap();
                assert_eq!(model.architecture, Architecture::Cnn);
                assert_eq!(model.latent_dim, 16);
                assert!(model.variational);

                let config = args.experiment_config(cli.verbose).unwrap();
                assert_eq!(config.n_epoch, 20);
                assert_eq!(config.n_clusters, 4);
                assert_eq!(config.lr_scheduler, SchedulerKind::Constant);
                assert_eq!(config.verbose, 2);

                let data = args.data.data_config().unwrap();
                assert_eq!(data.cohort, Cohort::Cptac);
                assert!(data.subtypes_file().is_none());
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_variational_and_quantized_conflict() {
        let result = Cli::try_parse_from(["omics-ae", "probe", "-i", "100", "--variational", "--quantized"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_files_with_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let experiment_path = temp_dir.path().join("experiment.json");
        std::fs::write(&experiment_path, r#"{"n_epoch": 7, "batch_size": 4}"#).unwrap();

        let model_path = temp_dir.path().join("model.json");
        AutoencoderConfig::quantized_mlp().save(&model_path).unwrap();

        let cli = Cli::parse_from([
            "omics-ae", "train",
            "--config", experiment_path.to_str().unwrap(),
            "--model-config", model_path.to_str().unwrap(),
            "--batch-size", "16",
        ]);

        match cli.command {
            Commands::Train(args) => {
                let config = args.experiment_config(0).unwrap();
                assert_eq!(config.n_epoch, 7);
                assert_eq!(config.batch_size, 16);

                let model = args.model.model_config().unwrap();
                assert!(model.quantized);
                assert_eq!(model.num_embeddings, 128);
            }
            _ => panic!("Expected Train command"),
        }
    }

    #[test]
    fn test_encode_args() {
        let cli = Cli::parse_from([
            "omics-ae", "encode",
            "-m", "output/model",
            "-e", "cohort.csv",
            "-o", "codes.csv",
        ]);

        match cli.command {
            Commands::Encode(args) => {
                assert_eq!(args.model, PathBuf::from("output/model"));
                assert_eq!(args.output, PathBuf::from("codes.csv"));
                assert!(args.clusters.is_none());
            }
            _ => panic!("Expected Encode command"),
        }
    }
}
