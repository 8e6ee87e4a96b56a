//! Network modules shared by every alignment strategy.
//!
//! - [`FeatureEncoder`]: 1-D convolutional stack mapping a vibration window
//!   to a fixed-width embedding
//! - [`ClassifierHead`]: linear fault classifier over the embedding
//! - [`DomainDiscriminator`]: MLP telling source from target (adversarial
//!   strategies only)
//! - [`UdaModel`]: the learnable state owned by the training loop

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv1d, Conv1dConfig},
        pool::{AdaptiveAvgPool1d, AdaptiveAvgPool1dConfig, MaxPool1d, MaxPool1dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig1d, Relu,
    },
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use uda_core::{ModelConfig, ModelName};

/// Temporal length kept by the adaptive pool before the projection
const POOLED_LEN: usize = 4;

/// Convolution + batch norm + ReLU + max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv1d<B>,
    bn: BatchNorm<B, 1>,
    activation: Relu,
    pool: MaxPool1d,
}

impl<B: Backend> ConvBlock<B> {
    /// Creates a block halving the temporal length
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, device: &B::Device) -> Self {
        let conv = Conv1dConfig::new(in_channels, out_channels, kernel)
            .with_padding(PaddingConfig1d::Explicit(kernel / 2))
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool1dConfig::new(2).with_stride(2).init();

        Self {
            conv,
            bn,
            activation: Relu::new(),
            pool,
        }
    }

    /// `[batch, in, len]` to `[batch, out, len / 2]`
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.conv.forward(input);
        let x = self.bn.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

/// Configuration for the [`FeatureEncoder`]
#[derive(Config, Debug)]
pub struct FeatureEncoderConfig {
    /// Output channels of each convolution block
    pub channels: Vec<usize>,
    /// Embedding width
    #[config(default = 256)]
    pub feature_dim: usize,
    /// Kernel size of the first block
    #[config(default = 15)]
    pub first_kernel: usize,
    /// Dropout after the projection
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl FeatureEncoderConfig {
    /// Initialize the encoder
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureEncoder<B> {
        let mut blocks = Vec::with_capacity(self.channels.len());
        let mut in_channels = 1;
        for (i, &out_channels) in self.channels.iter().enumerate() {
            let kernel = if i == 0 { self.first_kernel } else { 3 };
            blocks.push(ConvBlock::new(in_channels, out_channels, kernel, device));
            in_channels = out_channels;
        }

        FeatureEncoder {
            blocks,
            pool: AdaptiveAvgPool1dConfig::new(POOLED_LEN).init(),
            projection: LinearConfig::new(in_channels * POOLED_LEN, self.feature_dim).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            feature_dim: self.feature_dim,
        }
    }
}

/// Shared encoder: `[batch, 1, signal_len]` to `[batch, feature_dim]`
#[derive(Module, Debug)]
pub struct FeatureEncoder<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool1d,
    projection: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    feature_dim: usize,
}

impl<B: Backend> FeatureEncoder<B> {
    /// Embedding width
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Forward pass
    pub fn forward(&self, signals: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut x = signals;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(x);

        let [batch, channels, len] = x.dims();
        let x = x.reshape([batch, channels * len]);

        let x = self.projection.forward(x);
        let x = self.activation.forward(x);
        self.dropout.forward(x)
    }
}

/// Linear fault classifier
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    fc: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ClassifierHead<B> {
    /// Create a new head
    pub fn new(feature_dim: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc: LinearConfig::new(feature_dim, num_classes).init(device),
            num_classes,
        }
    }

    /// Number of fault classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class logits `[batch, num_classes]`
    pub fn forward(&self, embedding: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(embedding)
    }
}

/// Three-layer MLP domain classifier
#[derive(Module, Debug)]
pub struct DomainDiscriminator<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    input_dim: usize,
}

impl<B: Backend> DomainDiscriminator<B> {
    /// Create a discriminator with `outputs` logits (1 for BCE, 2 for CE)
    pub fn new(input_dim: usize, hidden: usize, outputs: usize, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(input_dim, hidden).init(device),
            fc2: LinearConfig::new(hidden, hidden).init(device),
            fc3: LinearConfig::new(hidden, outputs).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(0.5).init(),
            input_dim,
        }
    }

    /// Expected input width
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Domain logits
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout.forward(self.activation.forward(self.fc1.forward(input)));
        let x = self.dropout.forward(self.activation.forward(self.fc2.forward(x)));
        self.fc3.forward(x)
    }
}

/// Learnable state of a domain adaptation run
#[derive(Module, Debug)]
pub struct UdaModel<B: Backend> {
    /// Shared encoder
    pub encoder: FeatureEncoder<B>,
    /// Fault classifier
    pub classifier: ClassifierHead<B>,
    /// Domain discriminator, present for adversarial strategies
    pub discriminator: Option<DomainDiscriminator<B>>,
}

/// Output of [`UdaModel::forward`]
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// Embeddings `[batch, feature_dim]`
    pub embedding: Tensor<B, 2>,
    /// Class logits `[batch, num_classes]`
    pub logits: Tensor<B, 2>,
}

impl<B: Backend> UdaModel<B> {
    /// Builds the model for the configured strategy
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let encoder = FeatureEncoderConfig::new(config.channels.clone())
            .with_feature_dim(config.feature_dim)
            .with_first_kernel(config.first_kernel)
            .with_dropout(config.dropout)
            .init(device);
        let classifier = ClassifierHead::new(config.feature_dim, config.num_classes, device);

        let discriminator = match config.model_name {
            ModelName::Dann | ModelName::Cdan => Some(DomainDiscriminator::new(
                config.discriminator_input(),
                config.discriminator_hidden,
                1,
                device,
            )),
            ModelName::Acdann => Some(DomainDiscriminator::new(
                config.discriminator_input(),
                config.discriminator_hidden,
                2,
                device,
            )),
            ModelName::Coral | ModelName::Ddtln => None,
        };

        Self {
            encoder,
            classifier,
            discriminator,
        }
    }

    /// Encodes and classifies a batch
    pub fn forward(&self, signals: Tensor<B, 3>) -> ModelOutput<B> {
        let embedding = self.encoder.forward(signals);
        let logits = self.classifier.forward(embedding.clone());
        ModelOutput { embedding, logits }
    }

    /// Number of fault classes
    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }
}

/// Collects `sum(|grad|)` of every parameter that received a gradient
struct GradientL1<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    sums: Vec<Tensor<B::InnerBackend, 1>>,
}

impl<'a, B: AutodiffBackend> GradientL1<'a, B> {
    fn new(grads: &'a B::Gradients) -> Self {
        Self {
            grads,
            sums: Vec::new(),
        }
    }

    fn param<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = param.val().grad(self.grads) {
            self.sums.push(grad.abs().sum());
        }
    }

    fn linear(&mut self, linear: &Linear<B>) {
        self.param(&linear.weight);
        if let Some(bias) = &linear.bias {
            self.param(bias);
        }
    }

    fn conv_block(&mut self, block: &ConvBlock<B>) {
        self.param(&block.conv.weight);
        if let Some(bias) = &block.conv.bias {
            self.param(bias);
        }
        self.param(&block.bn.gamma);
        self.param(&block.bn.beta);
    }

    fn total(self) -> Option<f64> {
        if self.sums.is_empty() {
            return None;
        }
        Some(Tensor::cat(self.sums, 0).sum().into_scalar().elem())
    }
}

impl<B: AutodiffBackend> UdaModel<B> {
    /// Sum of absolute gradient values over all parameters in `grads`.
    ///
    /// NaN or infinite when any parameter gradient is; `None` when no
    /// parameter received a gradient.
    pub fn gradient_l1_norm(&self, grads: &B::Gradients) -> Option<f64> {
        let mut l1 = GradientL1::<B>::new(grads);
        for block in &self.encoder.blocks {
            l1.conv_block(block);
        }
        l1.linear(&self.encoder.projection);
        l1.linear(&self.classifier.fc);
        if let Some(discriminator) = &self.discriminator {
            l1.linear(&discriminator.fc1);
            l1.linear(&discriminator.fc2);
            l1.linear(&discriminator.fc3);
        }
        l1.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    fn small_config(model_name: ModelName) -> ModelConfig {
        ModelConfig {
            model_name,
            num_classes: 4,
            channels: vec![4, 8],
            first_kernel: 7,
            feature_dim: 16,
            discriminator_hidden: 8,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_encoder_output_shape() {
        let device = Default::default();
        let encoder = FeatureEncoderConfig::new(vec![4, 8, 8])
            .with_feature_dim(12)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 3>::random(
            [3, 1, 128],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = encoder.forward(input);
        assert_eq!(output.dims(), [3, 12]);
        assert_eq!(encoder.feature_dim(), 12);
    }

    #[test]
    fn test_model_forward_shapes() {
        let device = Default::default();
        let model = UdaModel::<TestBackend>::new(&small_config(ModelName::Coral), &device);
        let input = Tensor::<TestBackend, 3>::zeros([5, 1, 64], &device);
        let output = model.forward(input);

        assert_eq!(output.embedding.dims(), [5, 16]);
        assert_eq!(output.logits.dims(), [5, 4]);
        assert!(model.discriminator.is_none());
    }

    #[test]
    fn test_discriminator_per_strategy() {
        let device = Default::default();
        let dann = UdaModel::<TestBackend>::new(&small_config(ModelName::Dann), &device);
        assert_eq!(dann.discriminator.as_ref().unwrap().input_dim(), 16);

        let cdan = UdaModel::<TestBackend>::new(&small_config(ModelName::Cdan), &device);
        assert_eq!(cdan.discriminator.as_ref().unwrap().input_dim(), 64);

        let acdann = UdaModel::<TestBackend>::new(&small_config(ModelName::Acdann), &device);
        let disc = acdann.discriminator.as_ref().unwrap();
        let logits = disc.forward(Tensor::zeros([2, 64], &device));
        assert_eq!(logits.dims(), [2, 2]);

        let ddtln = UdaModel::<TestBackend>::new(&small_config(ModelName::Ddtln), &device);
        assert!(ddtln.discriminator.is_none());
    }

    #[test]
    fn test_gradient_l1_norm() {
        let device = Default::default();
        let model = UdaModel::<TrainBackend>::new(&small_config(ModelName::Dann), &device);
        let input = Tensor::<TrainBackend, 3>::random(
            [4, 1, 64],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let grads = model.forward(input.clone()).logits.powf_scalar(2.0).mean().backward();
        let norm = model.gradient_l1_norm(&grads).unwrap();
        assert!(norm.is_finite() && norm > 0.0);

        // sqrt has an infinite slope at zero; through the zero scaling the
        // parameter gradients become NaN while the loss stays 0
        let loss = model.forward(input).logits.mul_scalar(0.0).sqrt().sum();
        let value: f32 = loss.clone().into_scalar();
        assert_eq!(value, 0.0);
        let grads = loss.backward();
        assert!(!model.gradient_l1_norm(&grads).unwrap().is_finite());
    }
}
