use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Distribution;

/// Gaussian posterior parameters of a batch
#[derive(Debug, Clone)]
pub struct Posterior<B: Backend> {
    pub mean: Tensor<B, 2>,
    pub log_var: Tensor<B, 2>,
}

/// Maps the encoder output to a mean and a log-variance of the same width
#[derive(Module, Debug)]
pub struct VariationalHead<B: Backend> {
    mean: Linear<B>,
    log_var: Linear<B>,
}

impl<B: Backend> VariationalHead<B> {
    pub fn new(latent_dim: usize, device: &B::Device) -> Self {
        Self {
            mean: LinearConfig::new(latent_dim, latent_dim).init(device),
            log_var: LinearConfig::new(latent_dim, latent_dim).init(device),
        }
    }

    pub fn forward(&self, hidden: Tensor<B, 2>) -> Posterior<B> {
        Posterior {
            mean: self.mean.forward(hidden.clone()),
            log_var: self.log_var.forward(hidden),
        }
    }
}

/// `mean + noise * exp(0.5 * log_var)` with fresh standard-normal noise
pub fn reparameterize<B: Backend>(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 2> {
    let std = log_var.mul_scalar(0.5).exp();
    let noise = Tensor::random(std.shape(), Distribution::Normal(0.0, 1.0), &std.device());
    mean + noise * std
}
