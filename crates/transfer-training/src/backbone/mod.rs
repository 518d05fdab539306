//! Pretrained feature extractors kept frozen under the classifier head.
//!
//! Backbones are built on a plain (non-autodiff) backend, so their
//! parameters can never receive gradients. Pretrained weights are loaded
//! from burn records named `<arch>.mpk`.

mod alexnet;
mod densenet;
mod vgg;

pub use alexnet::AlexNetFeatures;
pub use densenet::{DenseLayer, DenseNet121Features, Transition};
pub use vgg::{Vgg19Features, VggBlock};

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};
use transfer_core::{Architecture, Error, Result};

/// Recorder used for backbone weights
pub type BackboneRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension of backbone record files
pub const RECORD_EXTENSION: &str = "mpk";

#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    Vgg19(Vgg19Features<B>),
    DenseNet121(DenseNet121Features<B>),
    AlexNet(AlexNetFeatures<B>),
}

impl<B: Backend> Backbone<B> {
    /// Randomly initialized backbone of the given family.
    pub fn new(architecture: Architecture, device: &B::Device) -> Self {
        match architecture {
            Architecture::Vgg19 => Backbone::Vgg19(Vgg19Features::new(device)),
            Architecture::DenseNet121 => Backbone::DenseNet121(DenseNet121Features::new(device)),
            Architecture::AlexNet => Backbone::AlexNet(AlexNetFeatures::new(device)),
        }
    }

    /// Backbone with pretrained weights from `weights_dir`, if given.
    pub fn pretrained(
        architecture: Architecture,
        weights_dir: Option<&Path>,
        device: &B::Device,
    ) -> Result<Self> {
        let backbone = Self::new(architecture, device);

        let Some(dir) = weights_dir else {
            warn!(
                "No weights directory configured - {} backbone is randomly initialized",
                architecture
            );
            return Ok(backbone);
        };

        let path = weights_file(dir, architecture);
        if !path.is_file() {
            return Err(Error::Config(format!(
                "Pretrained weights for {} not found at {}",
                architecture,
                path.display()
            )));
        }

        let backbone = backbone.load_record(&path, device)?;
        info!("Loaded pretrained {} weights from {}", architecture, path.display());
        Ok(backbone)
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            Backbone::Vgg19(_) => Architecture::Vgg19,
            Backbone::DenseNet121(_) => Architecture::DenseNet121,
            Backbone::AlexNet(_) => Architecture::AlexNet,
        }
    }

    /// Width of the feature vector produced by [`Backbone::forward`].
    pub fn feature_dim(&self) -> usize {
        self.architecture().feature_dim()
    }

    /// Extract flattened features: [batch, 3, H, W] -> [batch, feature_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::Vgg19(features) => features.forward(images),
            Backbone::DenseNet121(features) => features.forward(images),
            Backbone::AlexNet(features) => features.forward(images),
        }
    }

    /// Replace the weights with those stored at `path`.
    pub fn load_record(self, path: &Path, device: &B::Device) -> Result<Self> {
        self.load_file(path.to_path_buf(), &BackboneRecorder::new(), device)
            .map_err(|e| {
                Error::Model(format!(
                    "Failed to load backbone record {}: {e:?}",
                    path.display()
                ))
            })
    }

    /// Write the weights to `path` (`.mpk`).
    pub fn save_record(&self, path: &Path) -> Result<()> {
        self.clone()
            .save_file(path.to_path_buf(), &BackboneRecorder::new())
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to write backbone record {}: {e:?}",
                    path.display()
                )))
            })
    }
}

/// Location of the pretrained record for `architecture` inside `dir`.
pub fn weights_file(dir: &Path, architecture: Architecture) -> PathBuf {
    dir.join(format!("{}.{}", architecture, RECORD_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_dims_match_table() {
        let device = Default::default();
        for (arch, size) in [
            (Architecture::Vgg19, 32),
            (Architecture::DenseNet121, 32),
            (Architecture::AlexNet, 64),
        ] {
            let backbone = Backbone::<TestBackend>::new(arch, &device);
            let images = Tensor::<TestBackend, 4>::zeros([2, 3, size, size], &device);
            let features = backbone.forward(images);
            assert_eq!(features.dims(), [2, arch.feature_dim()], "{arch}");
            assert_eq!(backbone.architecture(), arch);
        }
    }

    #[test]
    fn test_feature_dim_is_independent_of_input_size() {
        let device = Default::default();
        let backbone = Backbone::<TestBackend>::new(Architecture::AlexNet, &device);
        for size in [63, 96, 127] {
            let images = Tensor::<TestBackend, 4>::zeros([1, 3, size, size], &device);
            assert_eq!(backbone.forward(images).dims(), [1, 9216]);
        }
    }

    #[test]
    fn test_missing_weights_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            Backbone::<TestBackend>::pretrained(Architecture::AlexNet, Some(dir.path()), &Default::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_record_roundtrip() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let original = Backbone::<TestBackend>::new(Architecture::AlexNet, &device);
        original
            .save_record(&weights_file(dir.path(), Architecture::AlexNet))
            .unwrap();

        let restored = Backbone::<TestBackend>::pretrained(
            Architecture::AlexNet,
            Some(dir.path()),
            &device,
        )
        .unwrap();

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
        let expected = original.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = restored.forward(images).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }
}
