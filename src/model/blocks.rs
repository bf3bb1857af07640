//! Stage building blocks shared by the convolutional and dense architectures.
//!
//! An [`Encoder`] or [`Decoder`] is an ordered list of stages. Builders in
//! [`crate::model::cnn`] and [`crate::model::mlp`] decide which stages appear
//! and how wide they are; the forward passes here only walk the list.

use burn::nn::conv::{Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig};
use burn::nn::pool::{MaxPool1d, MaxPool1dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig1d};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, sigmoid};

/// Stride shared by every (transposed) convolution
pub const CONV_STRIDE: usize = 2;

/// Max-pooling window and stride
pub const POOL_FACTOR: usize = 2;

/// Fully-connected stage: linear, optional leaky ReLU, dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    dropout: Dropout,
    slope: f64,
    activated: bool,
}

impl<B: Backend> DenseBlock<B> {
    /// `slope = None` leaves the stage linear.
    pub fn new(
        d_input: usize,
        d_output: usize,
        slope: Option<f64>,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            linear: LinearConfig::new(d_input, d_output)
                .with_bias(true)
                .init(device),
            dropout: DropoutConfig::new(dropout).init(),
            slope: slope.unwrap_or(0.0),
            activated: slope.is_some(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(input);
        let x = if self.activated {
            leaky_relu(x, self.slope)
        } else {
            x
        };
        self.dropout.forward(x)
    }

    /// `[d_input, d_output]`
    pub fn shape(&self) -> [usize; 2] {
        self.linear.weight.dims()
    }
}

/// Downsampling stage: conv (stride 2), leaky ReLU, dropout, max-pool
#[derive(Module, Debug)]
pub struct ConvDownBlock<B: Backend> {
    conv: Conv1d<B>,
    dropout: Dropout,
    pool: MaxPool1d,
    slope: f64,
}

impl<B: Backend> ConvDownBlock<B> {
    pub fn new(
        channels_in: usize,
        channels_out: usize,
        kernel_size: usize,
        padding: usize,
        slope: f64,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let conv = Conv1dConfig::new(channels_in, channels_out, kernel_size)
            .with_stride(CONV_STRIDE)
            .with_padding(PaddingConfig1d::Explicit(padding))
            .init(device);
        let pool = MaxPool1dConfig::new(POOL_FACTOR)
            .with_stride(POOL_FACTOR)
            .init();

        Self {
            conv,
            dropout: DropoutConfig::new(dropout).init(),
            pool,
            slope,
        }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.conv.forward(input);
        let x = leaky_relu(x, self.slope);
        let x = self.dropout.forward(x);
        self.pool.forward(x)
    }
}

/// Upsampling stage: nearest upsample x2, transposed conv (stride 2),
/// optional leaky ReLU, dropout
#[derive(Module, Debug)]
pub struct ConvUpBlock<B: Backend> {
    conv: ConvTranspose1d<B>,
    dropout: Dropout,
    slope: f64,
    activated: bool,
}

impl<B: Backend> ConvUpBlock<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels_in: usize,
        channels_out: usize,
        kernel_size: usize,
        padding: usize,
        slope: Option<f64>,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let conv = ConvTranspose1dConfig::new([channels_in, channels_out], kernel_size)
            .with_stride(CONV_STRIDE)
            .with_padding(padding)
            .init(device);

        Self {
            conv,
            dropout: DropoutConfig::new(dropout).init(),
            slope: slope.unwrap_or(0.0),
            activated: slope.is_some(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = upsample_nearest(input, 2);
        let x = self.conv.forward(x);
        let x = if self.activated {
            leaky_relu(x, self.slope)
        } else {
            x
        };
        self.dropout.forward(x)
    }
}

/// Repeat every position along the last axis `factor` times.
pub fn upsample_nearest<B: Backend>(input: Tensor<B, 3>, factor: usize) -> Tensor<B, 3> {
    let [batch, channels, length] = input.dims();
    let expanded: Tensor<B, 4> = input.unsqueeze_dim(3);
    let repeated = Tensor::cat(vec![expanded; factor], 3);
    repeated.reshape([batch, channels, length * factor])
}

/// Encoder stage list. Convolutional stages (if any) run first on a
/// single-channel view of the input, followed by a flatten and the dense
/// stages.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    conv: Vec<ConvDownBlock<B>>,
    dense: Vec<DenseBlock<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(conv: Vec<ConvDownBlock<B>>, dense: Vec<DenseBlock<B>>) -> Self {
        Self { conv, dense }
    }

    /// `[batch, input_shape] -> [batch, latent_dim]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = if self.conv.is_empty() {
            input
        } else {
            let features = self.features(input.unsqueeze_dim(1));
            let [batch, channels, length] = features.dims();
            features.reshape([batch, channels * length])
        };

        self.dense.iter().fold(x, |x, block| block.forward(x))
    }

    /// Run the convolutional stages only; the tensor right before flattening.
    pub fn features(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        self.conv.iter().fold(input, |x, block| block.forward(x))
    }

    pub fn conv_blocks(&self) -> &[ConvDownBlock<B>] {
        &self.conv
    }

    pub fn dense_blocks(&self) -> &[DenseBlock<B>] {
        &self.dense
    }

    pub fn num_stages(&self) -> usize {
        self.conv.len() + self.dense.len()
    }
}

/// Decoder stage list. Dense stages always run first; convolutional
/// decoders then unflatten to `[channels, length]`, run the upsampling
/// stages and project back to the input width with `output`.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    dense: Vec<DenseBlock<B>>,
    up: Vec<ConvUpBlock<B>>,
    output: Option<Linear<B>>,
    channels: usize,
    length: usize,
}

impl<B: Backend> Decoder<B> {
    /// Dense-only decoder
    pub fn dense(dense: Vec<DenseBlock<B>>) -> Self {
        Self {
            dense,
            up: Vec::new(),
            output: None,
            channels: 0,
            length: 0,
        }
    }

    /// Convolutional decoder seeded from a `[channels, length]` feature map
    pub fn convolutional(
        projection: DenseBlock<B>,
        channels: usize,
        length: usize,
        up: Vec<ConvUpBlock<B>>,
        output: Linear<B>,
    ) -> Self {
        Self {
            dense: vec![projection],
            up,
            output: Some(output),
            channels,
            length,
        }
    }

    /// `[batch, latent_dim] -> [batch, input_shape]`, bounded to [0, 1]
    pub fn forward(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dense.iter().fold(latent, |x, block| block.forward(x));

        match &self.output {
            Some(output) => {
                let [batch, _] = x.dims();
                let x = self.features(x.reshape([batch, self.channels, self.length]));
                let [batch, channels, length] = x.dims();
                let x = x.reshape([batch, channels * length]);
                sigmoid(output.forward(x))
            }
            None => sigmoid(x),
        }
    }

    /// Run the upsampling stages only.
    pub fn features(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        self.up.iter().fold(input, |x, block| block.forward(x))
    }

    /// Feature length the convolutional decoder starts from.
    pub fn calculated_length(&self) -> Option<usize> {
        self.output.as_ref().map(|_| self.length)
    }

    /// Channel count the convolutional decoder starts from.
    pub fn feature_channels(&self) -> Option<usize> {
        self.output.as_ref().map(|_| self.channels)
    }

    pub fn is_convolutional(&self) -> bool {
        self.output.is_some()
    }

    pub fn num_stages(&self) -> usize {
        self.dense.len() + self.up.len() + usize::from(self.output.is_some())
    }
}
