//! 1-D convolutional encoder/decoder.
//!
//! The encoder treats the feature vector as a single-channel signal and
//! halves its extent twice per stage (strided conv, then max-pool). The
//! decoder cannot be sized analytically without repeating that arithmetic,
//! so both sides run a shape probe on a zero tensor instead.

use crate::error::{Error, Result};
use crate::model::blocks::{ConvDownBlock, ConvUpBlock, Decoder, DenseBlock, Encoder, CONV_STRIDE, POOL_FACTOR};
use crate::model::{ArchitectureBuilder, AutoencoderConfig};
use burn::nn::LinearConfig;
use burn::prelude::*;

/// Channel count of the first convolutional stage
pub const BASE_CHANNELS: usize = 32;

/// Output channels of encoder stage `i`
pub fn stage_channels(i: usize) -> usize {
    BASE_CHANNELS << i
}

/// Builds the convolutional stages for a validated configuration
#[derive(Debug, Clone)]
pub struct CnnBuilder {
    input_shape: usize,
    num_layers: usize,
    latent_dim: usize,
    kernel_size: usize,
    padding: usize,
    slope: f64,
    dropout: f64,
}

impl CnnBuilder {
    pub fn new(config: &AutoencoderConfig, input_shape: usize) -> Result<Self> {
        if config.kernel_size == 0 {
            return Err(Error::config("kernel_size must be positive"));
        }

        let builder = Self {
            input_shape,
            num_layers: config.num_layers,
            latent_dim: config.latent_dim,
            kernel_size: config.kernel_size,
            padding: config.padding,
            slope: config.slope,
            dropout: config.dropout,
        };
        builder.decoder_lengths()?;

        Ok(builder)
    }

    /// Feature extent after each encoder stage, input first.
    ///
    /// Fails when a stage would leave nothing to convolve or pool.
    pub fn expected_lengths(&self) -> Result<Vec<usize>> {
        let mut lengths = Vec::with_capacity(self.num_layers + 1);
        let mut length = self.input_shape;
        lengths.push(length);

        for stage in 0..self.num_layers {
            let padded = length + 2 * self.padding;
            if padded < self.kernel_size {
                return Err(Error::config(format!(
                    "input_shape {} is too short for {} convolutional stages (stage {} sees {})",
                    self.input_shape, self.num_layers, stage, length
                )));
            }
            let convolved = (padded - self.kernel_size) / CONV_STRIDE + 1;
            length = convolved / POOL_FACTOR;
            if length == 0 {
                return Err(Error::config(format!(
                    "input_shape {} is too short for {} convolutional stages (stage {} pools to nothing)",
                    self.input_shape, self.num_layers, stage
                )));
            }
            lengths.push(length);
        }

        Ok(lengths)
    }

    /// Extent after each decoder block, starting from the encoder output.
    ///
    /// A transposed convolution trims `2 * padding`, so a padding that is
    /// wide relative to the kernel can leave a block with no output.
    pub fn decoder_lengths(&self) -> Result<Vec<usize>> {
        let encoded = self.expected_lengths()?;
        let mut length = encoded[encoded.len() - 1];
        let mut lengths = Vec::with_capacity(self.num_layers + 2);
        lengths.push(length);

        for block in 0..=self.num_layers {
            let upsampled = length * 2;
            let full = (upsampled - 1) * CONV_STRIDE + self.kernel_size;
            if full <= 2 * self.padding {
                return Err(Error::config(format!(
                    "padding {} trims decoder block {} to nothing (kernel {}, extent {})",
                    self.padding, block, self.kernel_size, upsampled
                )));
            }
            length = full - 2 * self.padding;
            lengths.push(length);
        }

        Ok(lengths)
    }

    fn down_blocks<B: Backend>(&self, device: &B::Device) -> Vec<ConvDownBlock<B>> {
        (0..self.num_layers)
            .map(|i| {
                let channels_in = if i == 0 { 1 } else { stage_channels(i - 1) };
                ConvDownBlock::new(
                    channels_in,
                    stage_channels(i),
                    self.kernel_size,
                    self.padding,
                    self.slope,
                    self.dropout,
                    device,
                )
            })
            .collect()
    }
}

/// Run a zero tensor `[1, 1, input_shape]` through the convolutional stages
/// and report `[channels, length]` right before the flatten.
///
/// With no stages the input passes through untouched.
pub fn probe_feature_shape<B: Backend>(
    blocks: &[ConvDownBlock<B>],
    input_shape: usize,
    device: &B::Device,
) -> Result<[usize; 2]> {
    let probe = Tensor::<B, 3>::zeros([1, 1, input_shape], device);
    let features = blocks.iter().fold(probe, |x, block| block.forward(x));
    let [_, channels, length] = features.dims();

    if channels * length == 0 {
        return Err(Error::shape("convolutional feature probe", input_shape, 0));
    }

    Ok([channels, length])
}

fn probe_decoder_length<B: Backend>(
    blocks: &[ConvUpBlock<B>],
    channels: usize,
    length: usize,
    device: &B::Device,
) -> Result<usize> {
    let probe = Tensor::<B, 3>::zeros([1, channels, length], device);
    let features = blocks.iter().fold(probe, |x, block| block.forward(x));
    let [_, channels, length] = features.dims();

    if channels * length == 0 {
        return Err(Error::shape("convolutional decoder probe", length, 0));
    }

    Ok(channels * length)
}

impl ArchitectureBuilder for CnnBuilder {
    fn build_encoder<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>> {
        let conv = self.down_blocks(device);
        let [channels, length] = probe_feature_shape(&conv, self.input_shape, device)?;

        let projection = DenseBlock::new(channels * length, self.latent_dim, Some(self.slope), 0.0, device);

        Ok(Encoder::new(conv, vec![projection]))
    }

    fn build_decoder<B: Backend>(
        &self,
        encoder: &Encoder<B>,
        device: &B::Device,
    ) -> Result<Decoder<B>> {
        let [channels, length] = probe_feature_shape(encoder.conv_blocks(), self.input_shape, device)?;
        tracing::debug!(channels, calculated_length = length, "Probed encoder feature shape");

        let projection = DenseBlock::new(self.latent_dim, channels * length, None, 0.0, device);

        let mut up = Vec::with_capacity(self.num_layers + 1);
        let mut channels_in = channels;
        for i in (0..self.num_layers).rev() {
            let channels_out = stage_channels(i);
            up.push(ConvUpBlock::new(
                channels_in,
                channels_out,
                self.kernel_size,
                self.padding,
                Some(self.slope),
                self.dropout,
                device,
            ));
            channels_in = channels_out;
        }
        // Collapse to a single channel
        up.push(ConvUpBlock::new(
            channels_in,
            1,
            self.kernel_size,
            self.padding,
            None,
            0.0,
            device,
        ));

        let flattened = probe_decoder_length(&up, channels, length, device)?;
        let output = LinearConfig::new(flattened, self.input_shape)
            .with_bias(true)
            .init(device);

        Ok(Decoder::convolutional(projection, channels, length, up, output))
    }

    fn layer_widths(&self) -> Vec<usize> {
        std::iter::once(1)
            .chain((0..self.num_layers).map(stage_channels))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_probe_matches_expected_lengths() {
        let device = Default::default();
        let config = AutoencoderConfig::cnn();
        let builder = CnnBuilder::new(&config, 2048).unwrap();
        assert_eq!(builder.expected_lengths().unwrap(), vec![2048, 512, 128, 32]);

        let encoder = builder.build_encoder::<TestBackend>(&device).unwrap();
        let shape = probe_feature_shape(encoder.conv_blocks(), 2048, &device).unwrap();
        assert_eq!(shape, [128, 32]);
    }

    #[test]
    fn test_decoder_builds_for_odd_widths() {
        let device = Default::default();
        let config = AutoencoderConfig::cnn().with_num_layers(2).with_latent_dim(16);
        let builder = CnnBuilder::new(&config, 203).unwrap();

        let encoder = builder.build_encoder::<TestBackend>(&device).unwrap();
        let decoder = builder.build_decoder(&encoder, &device).unwrap();
        assert!(decoder.calculated_length().unwrap() > 0);

        let latent = encoder.forward(Tensor::zeros([3, 203], &device));
        assert_eq!(latent.dims(), [3, 16]);
        assert_eq!(decoder.forward(latent).dims(), [3, 203]);
    }

    #[test]
    fn test_zero_layers_is_project_and_collapse() {
        let device = Default::default();
        let config = AutoencoderConfig::cnn().with_num_layers(0).with_latent_dim(4);
        let builder = CnnBuilder::new(&config, 20).unwrap();

        let encoder = builder.build_encoder::<TestBackend>(&device).unwrap();
        let decoder = builder.build_decoder(&encoder, &device).unwrap();
        assert_eq!(encoder.num_stages(), 1);
        assert_eq!(decoder.feature_channels(), Some(1));
        assert_eq!(decoder.calculated_length(), Some(20));

        let latent = encoder.forward(Tensor::zeros([2, 20], &device));
        assert_eq!(decoder.forward(latent).dims(), [2, 20]);
    }

    #[test]
    fn test_rejects_short_inputs_and_overtrimmed_decoder() {
        let config = AutoencoderConfig::cnn().with_num_layers(3);
        let err = CnnBuilder::new(&config, 16).unwrap_err();
        assert!(err.to_string().contains("too short"));

        let config = AutoencoderConfig::cnn()
            .with_num_layers(0)
            .with_kernel_size(1)
            .with_padding(2);
        let err = CnnBuilder::new(&config, 1).unwrap_err();
        assert!(err.to_string().contains("decoder block 0"));
    }

    #[test]
    fn test_padding_wider_than_half_kernel() {
        let device = Default::default();
        let config = AutoencoderConfig::cnn()
            .with_num_layers(2)
            .with_kernel_size(3)
            .with_padding(2)
            .with_latent_dim(6);
        let builder = CnnBuilder::new(&config, 40).unwrap();
        assert_eq!(builder.expected_lengths().unwrap(), vec![40, 10, 3]);
        assert_eq!(builder.decoder_lengths().unwrap(), vec![3, 9, 33, 129]);

        let encoder = builder.build_encoder::<TestBackend>(&device).unwrap();
        let decoder = builder.build_decoder(&encoder, &device).unwrap();
        let latent = encoder.forward(Tensor::zeros([2, 40], &device));
        assert_eq!(latent.dims(), [2, 6]);
        assert_eq!(decoder.forward(latent).dims(), [2, 40]);
    }
}
