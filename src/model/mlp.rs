//! Fully-connected encoder/decoder with geometrically halving widths.

use crate::error::{Error, Result};
use crate::model::blocks::{Decoder, DenseBlock, Encoder};
use crate::model::{ArchitectureBuilder, AutoencoderConfig, MLP_MAX_WIDTH};
use burn::prelude::*;

/// Deepest schedule whose narrowest hidden width is still at least 1
pub const MLP_MAX_LAYERS: usize = 12;

/// Builds the MLP stages for a validated configuration
#[derive(Debug, Clone)]
pub struct MlpBuilder {
    schedule: Vec<usize>,
    slope: f64,
    dropout: f64,
}

impl MlpBuilder {
    pub fn new(config: &AutoencoderConfig, input_shape: usize) -> Result<Self> {
        if config.num_layers == 0 {
            return Err(Error::config("num_layers must be at least 1 for the MLP"));
        }
        if config.num_layers > MLP_MAX_LAYERS {
            return Err(Error::config(format!(
                "num_layers must be at most {} for the MLP, got {}",
                MLP_MAX_LAYERS, config.num_layers
            )));
        }

        Ok(Self {
            schedule: layer_schedule(input_shape, config.num_layers, config.latent_dim),
            slope: config.slope,
            dropout: config.dropout,
        })
    }

    /// Encoder widths, input first and latent last
    pub fn schedule(&self) -> &[usize] {
        &self.schedule
    }
}

/// `[input] ++ [2048 >> i for i in 0..num_layers-1] ++ [latent]`
pub fn layer_schedule(input_shape: usize, num_layers: usize, latent_dim: usize) -> Vec<usize> {
    std::iter::once(input_shape)
        .chain((0..num_layers.saturating_sub(1)).map(|i| MLP_MAX_WIDTH >> i))
        .chain(std::iter::once(latent_dim))
        .collect()
}

impl ArchitectureBuilder for MlpBuilder {
    fn build_encoder<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>> {
        let dense = self
            .schedule
            .windows(2)
            .map(|pair| DenseBlock::new(pair[0], pair[1], Some(self.slope), self.dropout, device))
            .collect();

        Ok(Encoder::new(Vec::new(), dense))
    }

    fn build_decoder<B: Backend>(
        &self,
        _encoder: &Encoder<B>,
        device: &B::Device,
    ) -> Result<Decoder<B>> {
        let reversed: Vec<usize> = self.schedule.iter().rev().copied().collect();

        let mut dense: Vec<DenseBlock<B>> = reversed
            .windows(2)
            .map(|pair| DenseBlock::new(pair[0], pair[1], Some(self.slope), self.dropout, device))
            .collect();

        // Terminal self-map at the output width
        let width = reversed.last().copied().unwrap_or_default();
        dense.push(DenseBlock::new(width, width, Some(self.slope), 0.0, device));

        Ok(Decoder::dense(dense))
    }

    fn layer_widths(&self) -> Vec<usize> {
        self.schedule.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_schedule_halves_from_max_width() {
        assert_eq!(layer_schedule(1000, 3, 64), vec![1000, 2048, 1024, 64]);
        assert_eq!(layer_schedule(1000, 1, 64), vec![1000, 64]);
        assert_eq!(layer_schedule(50, 5, 8).len(), 6);
    }

    #[test]
    fn test_rejects_zero_and_too_many_layers() {
        let config = AutoencoderConfig::mlp().with_num_layers(0);
        assert!(MlpBuilder::new(&config, 100).is_err());
        let config = AutoencoderConfig::mlp().with_num_layers(MLP_MAX_LAYERS + 1);
        assert!(MlpBuilder::new(&config, 100).is_err());
    }

    #[test]
    fn test_decoder_mirrors_encoder() {
        let device = Default::default();
        let config = AutoencoderConfig::mlp().with_num_layers(2).with_latent_dim(8);
        let builder = MlpBuilder::new(&config, 30).unwrap();
        assert_eq!(builder.schedule(), &[30, 2048, 8]);

        let encoder = builder.build_encoder::<TestBackend>(&device).unwrap();
        let decoder = builder.build_decoder(&encoder, &device).unwrap();
        assert_eq!(encoder.num_stages(), 2);
        // two mirrored stages plus the terminal self-map
        assert_eq!(decoder.num_stages(), 3);
        assert!(!decoder.is_convolutional());

        let latent = encoder.forward(Tensor::zeros([4, 30], &device));
        assert_eq!(latent.dims(), [4, 8]);
        assert_eq!(decoder.forward(latent).dims(), [4, 30]);
    }
}
