use crate::error::{Error, Result};
use crate::model::blocks::{Decoder, Encoder};
use crate::model::cnn::CnnBuilder;
use crate::model::mlp::MlpBuilder;
use crate::model::quantizer::VectorQuantizer;
use crate::model::variational::{reparameterize, Posterior, VariationalHead};
use crate::model::{Architecture, AutoencoderConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Encoder/decoder construction hooks.
///
/// `build_decoder` receives the finished encoder because some architectures
/// size the decoder from encoder-derived state.
pub trait ArchitectureBuilder {
    fn build_encoder<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>>;

    fn build_decoder<B: Backend>(
        &self,
        encoder: &Encoder<B>,
        device: &B::Device,
    ) -> Result<Decoder<B>>;

    /// Stage widths (features or channels), input side first
    fn layer_widths(&self) -> Vec<usize>;
}

/// Autoencoder with an optional variational or quantized bottleneck
#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
    variational: Option<VariationalHead<B>>,
    quantizer: Option<VectorQuantizer<B>>,
    input_shape: usize,
    latent_dim: usize,
}

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct AutoencoderOutput<B: Backend> {
    /// `[batch, input_shape]`, bounded to [0, 1]
    pub reconstruction: Tensor<B, 2>,
    /// Code handed to the decoder, `[batch, latent_dim]`
    pub latent: Tensor<B, 2>,
    /// Present for variational models
    pub posterior: Option<Posterior<B>>,
    /// Present for quantized models
    pub quantization_loss: Option<Tensor<B, 1>>,
}

/// Derived shapes of a built model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureSummary {
    pub architecture: Architecture,
    pub input_shape: usize,
    pub latent_dim: usize,
    pub layer_widths: Vec<usize>,
    pub encoder_stages: usize,
    pub decoder_stages: usize,
    /// CNN only: feature extent after the encoder stages
    pub calculated_length: Option<usize>,
    /// CNN only: channel count after the encoder stages
    pub feature_channels: Option<usize>,
    pub variational: bool,
    pub quantized: bool,
    pub num_params: usize,
}

impl AutoencoderConfig {
    /// Validate and build a model for `input_shape` features.
    pub fn init<B: Backend>(&self, input_shape: usize, device: &B::Device) -> Result<Autoencoder<B>> {
        self.validate(input_shape)?;

        let (encoder, decoder) = match self.architecture {
            Architecture::Mlp => build(&MlpBuilder::new(self, input_shape)?, device)?,
            Architecture::Cnn => build(&CnnBuilder::new(self, input_shape)?, device)?,
        };

        let variational = self
            .variational
            .then(|| VariationalHead::new(self.latent_dim, device));
        let quantizer = self.quantized.then(|| {
            VectorQuantizer::new(
                self.num_embeddings,
                self.embedding_dim,
                self.commitment_cost,
                device,
            )
        });

        Ok(Autoencoder {
            encoder,
            decoder,
            variational,
            quantizer,
            input_shape,
            latent_dim: self.latent_dim,
        })
    }

    /// Build a throwaway model and report its derived shapes.
    pub fn summary<B: Backend>(&self, input_shape: usize, device: &B::Device) -> Result<ArchitectureSummary> {
        let model = self.init::<B>(input_shape, device)?;
        let layer_widths = match self.architecture {
            Architecture::Mlp => MlpBuilder::new(self, input_shape)?.layer_widths(),
            Architecture::Cnn => CnnBuilder::new(self, input_shape)?.layer_widths(),
        };

        Ok(ArchitectureSummary {
            architecture: self.architecture,
            input_shape,
            latent_dim: self.latent_dim,
            layer_widths,
            encoder_stages: model.encoder.num_stages(),
            decoder_stages: model.decoder.num_stages(),
            calculated_length: model.decoder.calculated_length(),
            feature_channels: model.decoder.feature_channels(),
            variational: self.variational,
            quantized: self.quantized,
            num_params: model.num_params(),
        })
    }
}

fn build<A: ArchitectureBuilder, B: Backend>(
    builder: &A,
    device: &B::Device,
) -> Result<(Encoder<B>, Decoder<B>)> {
    let encoder = builder.build_encoder(device)?;
    let decoder = builder.build_decoder(&encoder, device)?;
    Ok((encoder, decoder))
}

impl<B: Backend> Autoencoder<B> {
    pub fn input_shape(&self) -> usize {
        self.input_shape
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn is_variational(&self) -> bool {
        self.variational.is_some()
    }

    pub fn is_quantized(&self) -> bool {
        self.quantizer.is_some()
    }

    /// Fail with `ShapeMismatch` unless `features` matches the model width.
    pub fn check_input(&self, features: usize) -> Result<()> {
        if features != self.input_shape {
            return Err(Error::shape("model input", self.input_shape, features));
        }
        Ok(())
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> AutoencoderOutput<B> {
        let hidden = self.encoder.forward(input);

        if let Some(head) = &self.variational {
            let posterior = head.forward(hidden);
            let latent = reparameterize(posterior.mean.clone(), posterior.log_var.clone());
            return AutoencoderOutput {
                reconstruction: self.decoder.forward(latent.clone()),
                latent,
                posterior: Some(posterior),
                quantization_loss: None,
            };
        }

        if let Some(quantizer) = &self.quantizer {
            let quantized = quantizer.forward(hidden);
            return AutoencoderOutput {
                reconstruction: self.decoder.forward(quantized.latent.clone()),
                latent: quantized.latent,
                posterior: None,
                quantization_loss: Some(quantized.loss),
            };
        }

        AutoencoderOutput {
            reconstruction: self.decoder.forward(hidden.clone()),
            latent: hidden,
            posterior: None,
            quantization_loss: None,
        }
    }

    /// Deterministic latent code: the posterior mean for variational models,
    /// the snapped code for quantized ones.
    pub fn encode(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden = self.encoder.forward(input);

        if let Some(head) = &self.variational {
            return head.forward(hidden).mean;
        }
        if let Some(quantizer) = &self.quantizer {
            return quantizer.forward(hidden).latent;
        }
        hidden
    }

    pub fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        self.decoder.forward(latent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::loss::autoencoder_loss;
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_mlp_reconstruction_of_zero_batch() {
        let device = Default::default();
        let config = AutoencoderConfig::mlp()
            .with_num_layers(3)
            .with_latent_dim(64);
        let model = config.init::<TestBackend>(1000, &device).unwrap();

        let input = Tensor::<TestBackend, 2>::zeros([16, 1000], &device);
        let output = model.forward(input.clone());
        assert_eq!(output.latent.dims(), [16, 64]);
        assert_eq!(output.reconstruction.dims(), [16, 1000]);

        let values = output.reconstruction.clone().into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));

        let loss: f32 = autoencoder_loss(&output, input).into_scalar();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
    }

    #[test]
    fn test_cnn_summary_reports_probe() {
        let device = Default::default();
        let summary = AutoencoderConfig::cnn()
            .summary::<TestBackend>(2048, &device)
            .unwrap();
        assert_eq!(summary.calculated_length, Some(32));
        assert_eq!(summary.feature_channels, Some(128));
        assert_eq!(summary.layer_widths, vec![1, 32, 64, 128]);
        assert!(summary.num_params > 0);
    }

    #[test]
    fn test_variational_output_carries_posterior() {
        let device = Default::default();
        let config = AutoencoderConfig::variational_mlp()
            .with_num_layers(2)
            .with_latent_dim(8);
        let model = config.init::<TestBackend>(40, &device).unwrap();
        assert!(model.is_variational());

        let output = model.forward(Tensor::ones([5, 40], &device));
        let posterior = output.posterior.unwrap();
        assert_eq!(posterior.mean.dims(), [5, 8]);
        assert_eq!(posterior.log_var.dims(), [5, 8]);
        assert_eq!(output.reconstruction.dims(), [5, 40]);
        assert_eq!(model.encode(Tensor::ones([5, 40], &device)).dims(), [5, 8]);
    }

    #[test]
    fn test_quantized_output_carries_loss() {
        let device = Default::default();
        let config = AutoencoderConfig::quantized_mlp()
            .with_num_layers(1)
            .with_latent_dim(32);
        let model = config.init::<TestBackend>(24, &device).unwrap();

        let output = model.forward(Tensor::ones([3, 24], &device));
        assert!(output.quantization_loss.is_some());
        assert_eq!(output.latent.dims(), [3, 32]);
        assert_eq!(output.reconstruction.dims(), [3, 24]);
    }

    #[test]
    fn test_check_input_rejects_other_widths() {
        let device = Default::default();
        let model = AutoencoderConfig::mlp()
            .with_num_layers(1)
            .init::<TestBackend>(10, &device)
            .unwrap();
        assert!(model.check_input(10).is_ok());
        assert!(matches!(
            model.check_input(12),
            Err(Error::ShapeMismatch { expected: 10, actual: 12, .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_mlp_shapes_hold(
            input_shape in 1usize..64,
            num_layers in 1usize..4,
            latent_dim in 1usize..16,
        ) {
            let device = Default::default();
            let model = AutoencoderConfig::mlp()
                .with_num_layers(num_layers)
                .with_latent_dim(latent_dim)
                .init::<TestBackend>(input_shape, &device)
                .unwrap();
            let output = model.forward(Tensor::zeros([2, input_shape], &device));
            prop_assert_eq!(output.latent.dims(), [2, latent_dim]);
            prop_assert_eq!(output.reconstruction.dims(), [2, input_shape]);
        }

        #[test]
        fn prop_cnn_shapes_hold(
            input_shape in 64usize..160,
            num_layers in 0usize..3,
            half_kernel in 1usize..4,
        ) {
            let device = Default::default();
            let kernel_size = 2 * half_kernel + 1;
            let model = AutoencoderConfig::cnn()
                .with_num_layers(num_layers)
                .with_latent_dim(8)
                .with_kernel_size(kernel_size)
                .with_padding(half_kernel)
                .init::<TestBackend>(input_shape, &device)
                .unwrap();
            let output = model.forward(Tensor::zeros([2, input_shape], &device));
            prop_assert_eq!(output.latent.dims(), [2, 8]);
            prop_assert_eq!(output.reconstruction.dims(), [2, input_shape]);
        }
    }
}
