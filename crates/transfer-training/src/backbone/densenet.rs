//! DenseNet-121 feature extractor.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

const GROWTH_RATE: usize = 32;
const BOTTLENECK_WIDTH: usize = 4 * GROWTH_RATE;
const BLOCK_DEPTHS: [usize; 4] = [6, 12, 24, 16];
const STEM_CHANNELS: usize = 64;

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3, concatenated onto its input
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> DenseLayer<B> {
    fn new(in_channels: usize, device: &B::Device) -> Self {
        Self {
            norm1: BatchNormConfig::new(in_channels).init(device),
            conv1: Conv2dConfig::new([in_channels, BOTTLENECK_WIDTH], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(BOTTLENECK_WIDTH).init(device),
            conv2: Conv2dConfig::new([BOTTLENECK_WIDTH, GROWTH_RATE], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.norm1.forward(input.clone()));
        let x = self.conv1.forward(x);
        let x = self.activation.forward(self.norm2.forward(x));
        let x = self.conv2.forward(x);
        Tensor::cat(vec![input, x], 1)
    }
}

/// BN-ReLU-Conv1x1 halving the channels, then 2x2 average pool
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    activation: Relu,
}

impl<B: Backend> Transition<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.norm.forward(input));
        self.pool.forward(self.conv.forward(x))
    }
}

/// DenseNet-121 features globally pooled to 1024 values
#[derive(Module, Debug)]
pub struct DenseNet121Features<B: Backend> {
    conv0: Conv2d<B>,
    norm0: BatchNorm<B, 2>,
    pool0: MaxPool2d,
    blocks: Vec<Vec<DenseLayer<B>>>,
    transitions: Vec<Transition<B>>,
    norm5: BatchNorm<B, 2>,
    activation: Relu,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> DenseNet121Features<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv0 = Conv2dConfig::new([3, STEM_CHANNELS], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let pool0 = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut channels = STEM_CHANNELS;
        let mut blocks = Vec::with_capacity(BLOCK_DEPTHS.len());
        let mut transitions = Vec::with_capacity(BLOCK_DEPTHS.len() - 1);

        for (i, &depth) in BLOCK_DEPTHS.iter().enumerate() {
            let layers = (0..depth)
                .map(|j| DenseLayer::new(channels + j * GROWTH_RATE, device))
                .collect();
            blocks.push(layers);
            channels += depth * GROWTH_RATE;

            if i + 1 < BLOCK_DEPTHS.len() {
                transitions.push(Transition::new(channels, channels / 2, device));
                channels /= 2;
            }
        }

        Self {
            conv0,
            norm0: BatchNormConfig::new(STEM_CHANNELS).init(device),
            pool0,
            blocks,
            transitions,
            norm5: BatchNormConfig::new(channels).init(device),
            activation: Relu::new(),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv0.forward(input);
        let x = self.activation.forward(self.norm0.forward(x));
        let mut x = self.pool0.forward(x);

        for (i, block) in self.blocks.iter().enumerate() {
            x = block.iter().fold(x, |x, layer| layer.forward(x));
            if let Some(transition) = self.transitions.get(i) {
                x = transition.forward(x);
            }
        }

        let x = self.activation.forward(self.norm5.forward(x));
        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}
