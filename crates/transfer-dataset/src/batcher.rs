//! Burn batcher turning transformed images into normalized tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use transfer_core::Normalization;

/// A transformed image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// CHW data in [0, 1], length 3 * size * size
    pub pixels: Vec<f32>,
    /// Class index
    pub label: usize,
}

/// A batch of images with their class indices
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks items and applies per-channel normalization
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
    normalization: Normalization,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            normalization: Normalization::imagenet(),
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(self.normalization.mean.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(self.normalization.std.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes_and_normalization() {
        let device = Default::default();
        let items = vec![
            ImageItem {
                pixels: vec![0.485; 3 * 4 * 4],
                label: 1,
            },
            ImageItem {
                pixels: vec![1.0; 3 * 4 * 4],
                label: 0,
            },
        ];

        let batch: ImageBatch<TestBackend> = ImageBatcher::new(4).batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.len(), 2);

        let first_red: f32 = batch
            .images
            .clone()
            .slice([0..1, 0..1, 0..1, 0..1])
            .into_scalar()
            .elem();
        assert!(first_red.abs() < 1e-5);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }
}
