//! Dataset preparation for transfer learning.
//!
//! This crate provides:
//! - Image-folder scanning with a sorted class mapping
//! - Train (augmenting) and evaluation (resize + center crop) transforms
//! - A burn `Batcher` applying ImageNet normalization
//! - A restartable, seedable batch loader

pub mod batcher;
pub mod folder;
pub mod loader;
pub mod transform;

pub use batcher::{ImageBatch, ImageBatcher, ImageItem};
pub use folder::{decode_image, ClassMapping, ImageFolder, ImageSample, IMAGE_EXTENSIONS};
pub use loader::{BatchIter, BatchLoader};
pub use transform::{AugmentationConfig, Transform};

use burn::tensor::backend::Backend;
use transfer_core::{DataConfig, DataSplit, Error, Result};
use tracing::info;

/// Train, validation and test loaders of one data root
pub struct SplitLoaders<B: Backend> {
    pub train: BatchLoader<B>,
    pub valid: BatchLoader<B>,
    pub test: BatchLoader<B>,
}

impl<B: Backend> SplitLoaders<B> {
    /// Scan `train`, `valid` and `test` under the data root.
    ///
    /// The training split's class mapping is the canonical one; `valid` and
    /// `test` must name exactly the same classes.
    pub fn open(data: &DataConfig, seed: u64, device: &B::Device) -> Result<Self> {
        let open = |split: DataSplit| -> Result<BatchLoader<B>> {
            let folder = ImageFolder::open(data.split_dir(split))?;
            info!(
                "Loaded {} split: {} images, {} classes",
                split,
                folder.samples().len(),
                folder.num_classes()
            );
            Ok(BatchLoader::for_split(split, folder, data, seed, device.clone()))
        };

        let loaders = Self {
            train: open(DataSplit::Train)?,
            valid: open(DataSplit::Valid)?,
            test: open(DataSplit::Test)?,
        };

        for (split, loader) in [(DataSplit::Valid, &loaders.valid), (DataSplit::Test, &loaders.test)] {
            let classes = loader.dataset().classes();
            if classes != loaders.classes() {
                return Err(Error::Data(format!(
                    "{} split classes {:?} differ from the training classes {:?}",
                    split,
                    classes.names(),
                    loaders.classes().names()
                )));
            }
        }

        Ok(loaders)
    }

    /// Class mapping of the training split
    pub fn classes(&self) -> &ClassMapping {
        self.train.dataset().classes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn write_split(root: &Path, split: DataSplit, classes: &[&str]) {
        for class in classes {
            let dir = root.join(split.dir_name()).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            RgbImage::from_pixel(8, 8, Rgb([90, 30, 200]))
                .save(dir.join("0.png"))
                .unwrap();
        }
    }

    fn data_config(root: &Path) -> DataConfig {
        DataConfig {
            data_dir: root.to_path_buf(),
            batch_size: 2,
            image_size: 8,
            resize_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_splits_open() {
        let dir = tempfile::tempdir().unwrap();
        for split in [DataSplit::Train, DataSplit::Valid, DataSplit::Test] {
            write_split(dir.path(), split, &["a", "b"]);
        }
        let loaders =
            SplitLoaders::<NdArray>::open(&data_config(dir.path()), 7, &Default::default()).unwrap();
        assert_eq!(loaders.classes().names(), ["a", "b"]);
        assert!(loaders.train.is_shuffled());
        assert!(!loaders.test.is_shuffled());
    }

    #[test]
    fn test_extra_validation_class_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), DataSplit::Train, &["a", "b"]);
        write_split(dir.path(), DataSplit::Valid, &["a", "b", "c"]);
        write_split(dir.path(), DataSplit::Test, &["a", "b"]);

        let result = SplitLoaders::<NdArray>::open(&data_config(dir.path()), 7, &Default::default());
        assert!(matches!(result, Err(Error::Data(msg)) if msg.contains("valid")));
    }

    #[test]
    fn test_renamed_test_class_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), DataSplit::Train, &["daisy", "tulip"]);
        write_split(dir.path(), DataSplit::Valid, &["daisy", "tulip"]);
        write_split(dir.path(), DataSplit::Test, &["rose", "tulip"]);

        let result = SplitLoaders::<NdArray>::open(&data_config(dir.path()), 7, &Default::default());
        assert!(matches!(result, Err(Error::Data(msg)) if msg.contains("test")));
    }
}
