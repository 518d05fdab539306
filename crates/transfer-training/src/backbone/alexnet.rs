//! AlexNet convolutional feature extractor.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// AlexNet features pooled to 256 x 6 x 6 and flattened to 9216 values
///
/// Architecture:
/// - Conv 11x11/4 (64) -> pool
/// - Conv 5x5 (192) -> pool
/// - Conv 3x3 (384) -> Conv 3x3 (256) -> Conv 3x3 (256) -> pool
/// - Adaptive average pool 6x6
#[derive(Module, Debug)]
pub struct AlexNetFeatures<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    conv5: Conv2d<B>,
    maxpool: MaxPool2d,
    avgpool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> AlexNetFeatures<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 64], [11, 11])
            .with_stride([4, 4])
            .with_padding(PaddingConfig2d::Explicit(2, 2))
            .init(device);
        let conv2 = Conv2dConfig::new([64, 192], [5, 5])
            .with_padding(PaddingConfig2d::Explicit(2, 2))
            .init(device);
        let conv3 = Conv2dConfig::new([192, 384], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv4 = Conv2dConfig::new([384, 256], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv5 = Conv2dConfig::new([256, 256], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            conv5,
            maxpool: MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init(),
            avgpool: AdaptiveAvgPool2dConfig::new([6, 6]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(input));
        let x = self.maxpool.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.maxpool.forward(x);
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.activation.forward(self.conv4.forward(x));
        let x = self.activation.forward(self.conv5.forward(x));
        let x = self.maxpool.forward(x);

        let x = self.avgpool.forward(x);
        let [batch, channels, height, width] = x.dims();
        x.reshape([batch, channels * height * width])
    }
}
