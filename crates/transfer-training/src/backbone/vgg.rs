//! VGG-19 convolutional feature extractor.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// (output channels, convolutions) for each of the five blocks
const BLOCKS: [(usize, usize); 5] = [(64, 2), (128, 2), (256, 4), (512, 4), (512, 4)];

/// 3x3 convolutions followed by a 2x2 max pool
#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    activation: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    fn new(in_channels: usize, out_channels: usize, depth: usize, device: &B::Device) -> Self {
        let convs = (0..depth)
            .map(|i| {
                let channels_in = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([channels_in, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();

        Self {
            convs,
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(input, |x, conv| self.activation.forward(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// VGG-19 features pooled to 512 x 7 x 7 and flattened to 25088 values
#[derive(Module, Debug)]
pub struct Vgg19Features<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> Vgg19Features<B> {
    pub fn new(device: &B::Device) -> Self {
        let mut in_channels = 3;
        let blocks = BLOCKS
            .iter()
            .map(|&(out_channels, depth)| {
                let block = VggBlock::new(in_channels, out_channels, depth, device);
                in_channels = out_channels;
                block
            })
            .collect();

        Self {
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([7, 7]).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        let x = self.avgpool.forward(x);
        let [batch, channels, height, width] = x.dims();
        x.reshape([batch, channels * height * width])
    }
}
