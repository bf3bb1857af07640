//! Vector-quantized bottleneck.
//!
//! Each latent vector is split into `latent_dim / embedding_dim` chunks and
//! every chunk snaps to its nearest codebook entry. Gradients skip the snap
//! (straight-through estimator).

use burn::nn::loss::{MseLoss, Reduction};
use burn::nn::{Embedding, EmbeddingConfig};
use burn::prelude::*;

/// Output of a quantization pass
#[derive(Debug, Clone)]
pub struct Quantized<B: Backend> {
    /// Snapped latent, `[batch, latent_dim]`, carrying straight-through gradients
    pub latent: Tensor<B, 2>,
    /// Codebook index per chunk, `[batch, chunks]`
    pub indices: Tensor<B, 2, Int>,
    /// `||sg(z) - q||^2 + commitment_cost * ||z - sg(q)||^2`
    pub loss: Tensor<B, 1>,
}

#[derive(Module, Debug)]
pub struct VectorQuantizer<B: Backend> {
    codebook: Embedding<B>,
    embedding_dim: usize,
    commitment_cost: f64,
}

impl<B: Backend> VectorQuantizer<B> {
    pub fn new(
        num_embeddings: usize,
        embedding_dim: usize,
        commitment_cost: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            codebook: EmbeddingConfig::new(num_embeddings, embedding_dim).init(device),
            embedding_dim,
            commitment_cost,
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.codebook.weight.dims()[0]
    }

    pub fn forward(&self, latent: Tensor<B, 2>) -> Quantized<B> {
        let [batch, latent_dim] = latent.dims();
        let chunks = latent_dim / self.embedding_dim;
        let flat = latent.reshape([batch * chunks, self.embedding_dim]);

        let codebook = self.codebook.weight.val();

        // ||z||^2 + ||e||^2 - 2 z.e
        let z_sq = flat.clone().powf_scalar(2.0).sum_dim(1);
        let e_sq = codebook.clone().powf_scalar(2.0).sum_dim(1).transpose();
        let cross = flat.clone().matmul(codebook.clone().transpose());
        let distances = z_sq + e_sq - cross.mul_scalar(2.0);

        let indices = distances.argmin(1).reshape([batch * chunks]);
        let snapped = codebook.select(0, indices.clone());

        let mse = MseLoss::new();
        let codebook_loss = mse.forward(snapped.clone(), flat.clone().detach(), Reduction::Mean);
        let commitment_loss = mse.forward(flat.clone(), snapped.clone().detach(), Reduction::Mean);
        let loss = codebook_loss + commitment_loss.mul_scalar(self.commitment_cost);

        let straight_through = flat.clone() + (snapped - flat).detach();

        Quantized {
            latent: straight_through.reshape([batch, latent_dim]),
            indices: indices.reshape([batch, chunks]),
            loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_codebook_entries_quantize_to_themselves() {
        let device = Default::default();
        let quantizer = VectorQuantizer::<TestBackend>::new(8, 4, 0.25, &device);

        // Two samples, each made of codebook rows 3 and 5
        let rows = quantizer
            .codebook
            .weight
            .val()
            .select(0, Tensor::from_data(TensorData::new(vec![3i64, 5], [2]), &device));
        let latent = Tensor::cat(vec![rows.clone().reshape([1, 8]), rows.reshape([1, 8])], 0);

        let output = quantizer.forward(latent.clone());
        assert_eq!(output.latent.dims(), [2, 8]);
        assert_eq!(output.indices.dims(), [2, 2]);

        let indices = output.indices.into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![3, 5, 3, 5]);

        let loss: f32 = output.loss.into_scalar();
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn test_loss_is_non_negative() {
        let device = Default::default();
        let quantizer = VectorQuantizer::<TestBackend>::new(16, 4, 1.0, &device);
        let latent = Tensor::<TestBackend, 2>::random([5, 12], burn::tensor::Distribution::Default, &device);
        let output = quantizer.forward(latent);
        let loss: f32 = output.loss.into_scalar();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
    }
}
