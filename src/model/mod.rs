pub mod architecture;
pub mod blocks;
pub mod checkpoint;
pub mod cnn;
pub mod loss;
pub mod mlp;
pub mod quantizer;
pub mod variational;

use crate::error::Error;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use architecture::{Autoencoder, AutoencoderOutput, ArchitectureBuilder, ArchitectureSummary};

/// Encoder/decoder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 1-D convolutional stages over the feature axis
    Cnn,
    /// Fully-connected stages with halving widths
    Mlp,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Cnn => "cnn",
            Architecture::Mlp => "mlp",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cnn" | "conv" | "conv1d" => Ok(Architecture::Cnn),
            "mlp" | "dense" => Ok(Architecture::Mlp),
            other => Err(format!("unknown architecture `{}` (expected cnn or mlp)", other)),
        }
    }
}

/// Largest hidden width of the MLP schedule
pub const MLP_MAX_WIDTH: usize = 2048;

/// Autoencoder hyperparameters. The input width is supplied at build time.
#[derive(Config, Debug)]
pub struct AutoencoderConfig {
    /// Encoder/decoder family
    #[config(default = "Architecture::Mlp")]
    pub architecture: Architecture,

    /// Width of the latent code
    #[config(default = "64")]
    pub latent_dim: usize,

    /// Dropout rate applied after every hidden stage
    #[config(default = "0.1")]
    pub dropout: f64,

    /// Negative slope of the leaky ReLU
    #[config(default = "0.05")]
    pub slope: f64,

    /// Number of encoder (and mirrored decoder) stages
    #[config(default = "3")]
    pub num_layers: usize,

    /// Reparameterized Gaussian bottleneck
    #[config(default = "false")]
    pub variational: bool,

    /// Convolution kernel size (CNN only)
    #[config(default = "7")]
    pub kernel_size: usize,

    /// Convolution padding (CNN only)
    #[config(default = "3")]
    pub padding: usize,

    /// Vector-quantized bottleneck
    #[config(default = "false")]
    pub quantized: bool,

    /// Codebook size
    #[config(default = "512")]
    pub num_embeddings: usize,

    /// Codebook vector width
    #[config(default = "512")]
    pub embedding_dim: usize,

    /// Weight of the commitment term in the quantization loss
    #[config(default = "1.0")]
    pub commitment_cost: f64,
}

impl AutoencoderConfig {
    /// Plain MLP autoencoder
    pub fn mlp() -> Self {
        Self::new().with_architecture(Architecture::Mlp)
    }

    /// Convolutional autoencoder with the default kernel and padding
    pub fn cnn() -> Self {
        Self::new().with_architecture(Architecture::Cnn)
    }

    /// MLP with a variational bottleneck
    pub fn variational_mlp() -> Self {
        Self::mlp().with_variational(true)
    }

    /// MLP with a small vector-quantized bottleneck
    pub fn quantized_mlp() -> Self {
        Self::mlp()
            .with_quantized(true)
            .with_num_embeddings(128)
            .with_embedding_dim(16)
            .with_commitment_cost(0.25)
    }

    /// Check the configuration against an input width.
    ///
    /// Every rejection names the offending option, so callers can surface
    /// it verbatim.
    pub fn validate(&self, input_shape: usize) -> crate::error::Result<()> {
        if input_shape == 0 {
            return Err(Error::config("input_shape must be positive"));
        }
        if self.latent_dim == 0 {
            return Err(Error::config("latent_dim must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !self.slope.is_finite() {
            return Err(Error::config("slope must be finite"));
        }
        if self.variational && self.quantized {
            return Err(Error::config(
                "variational and quantized bottlenecks are mutually exclusive",
            ));
        }
        if self.quantized {
            if self.num_embeddings == 0 || self.embedding_dim == 0 {
                return Err(Error::config(
                    "num_embeddings and embedding_dim must be positive",
                ));
            }
            if self.latent_dim % self.embedding_dim != 0 {
                return Err(Error::config(format!(
                    "latent_dim ({}) must be a multiple of embedding_dim ({})",
                    self.latent_dim, self.embedding_dim
                )));
            }
            if !(self.commitment_cost >= 0.0) {
                return Err(Error::config("commitment_cost must be non-negative"));
            }
        }

        match self.architecture {
            Architecture::Mlp => mlp::MlpBuilder::new(self, input_shape).map(|_| ()),
            Architecture::Cnn => cnn::CnnBuilder::new(self, input_shape).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutoencoderConfig::new();
        assert_eq!(config.architecture, Architecture::Mlp);
        assert_eq!(config.latent_dim, 64);
        assert_eq!(config.num_layers, 3);
        assert_eq!(config.kernel_size, 7);
        assert_eq!(config.padding, 3);
        assert_eq!(config.num_embeddings, 512);
        assert!(!config.variational);
    }

    #[test]
    fn test_variational_and_quantized_are_exclusive() {
        let config = AutoencoderConfig::variational_mlp().with_quantized(true);
        let err = config.validate(100).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_quantized_latent_must_split_into_codes() {
        let config = AutoencoderConfig::quantized_mlp().with_latent_dim(40);
        assert!(config.validate(100).is_err());
        let config = AutoencoderConfig::quantized_mlp().with_latent_dim(64);
        assert!(config.validate(100).is_ok());
    }

    #[test]
    fn test_rejects_bad_dropout_and_widths() {
        assert!(AutoencoderConfig::mlp().with_dropout(1.0).validate(10).is_err());
        assert!(AutoencoderConfig::mlp().with_latent_dim(0).validate(10).is_err());
        assert!(AutoencoderConfig::mlp().validate(0).is_err());
        assert!(AutoencoderConfig::mlp().with_num_layers(0).validate(10).is_err());
    }

    #[test]
    fn test_architecture_parsing() {
        assert_eq!("CNN".parse::<Architecture>().unwrap(), Architecture::Cnn);
        assert_eq!("mlp".parse::<Architecture>().unwrap(), Architecture::Mlp);
        assert!("transformer".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_config_json_roundtrip_keeps_architecture() {
        let config = AutoencoderConfig::cnn().with_latent_dim(32);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"cnn\""));
        let parsed: AutoencoderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.architecture, Architecture::Cnn);
        assert_eq!(parsed.latent_dim, 32);
    }
}
