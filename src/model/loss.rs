use crate::model::AutoencoderOutput;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;

/// Training objective of an autoencoder
///
/// Mean squared reconstruction error, plus the summed KL divergence for
/// variational models and the codebook/commitment term for quantized ones.
#[derive(Clone, Debug)]
pub struct AutoencoderLoss {
    /// Weight of the KL term
    kl_weight: f64,
    mse: MseLoss,
}

impl Default for AutoencoderLoss {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AutoencoderLoss {
    pub fn new(kl_weight: f64) -> Self {
        Self {
            kl_weight,
            mse: MseLoss::new(),
        }
    }

    /// Compute the total loss of a forward pass against its input
    ///
    /// # Arguments
    /// * `output` - Result of `Autoencoder::forward`
    /// * `input` - The batch that produced it `[batch_size, input_shape]`
    pub fn forward<B: Backend>(
        &self,
        output: &AutoencoderOutput<B>,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let mut loss = self
            .mse
            .forward(output.reconstruction.clone(), input, Reduction::Mean);

        if let Some(posterior) = &output.posterior {
            let kl = kl_divergence(posterior.mean.clone(), posterior.log_var.clone());
            loss = loss + kl.mul_scalar(self.kl_weight);
        }

        if let Some(quantization) = &output.quantization_loss {
            loss = loss + quantization.clone();
        }

        loss
    }
}

/// `-0.5 * sum(1 + log_var - mean^2 - exp(log_var))` over every element
pub fn kl_divergence<B: Backend>(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 1> {
    let terms = log_var.clone().add_scalar(1.0) - mean.powf_scalar(2.0) - log_var.exp();
    terms.sum().mul_scalar(-0.5)
}

/// Loss with unit KL weight
pub fn autoencoder_loss<B: Backend>(
    output: &AutoencoderOutput<B>,
    input: Tensor<B, 2>,
) -> Tensor<B, 1> {
    AutoencoderLoss::default().forward(output, input)
}
