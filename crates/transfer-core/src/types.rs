//! Core types for the transfer-learning pipeline.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pretrained backbone families that can be frozen under a new head.
///
/// Each variant carries its fixed feature dimensionality, so adding a
/// backbone means adding a variant and its match arms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    /// VGG-19 convolutional features, 512 x 7 x 7
    Vgg19,
    /// DenseNet-121 features after global pooling
    DenseNet121,
    /// AlexNet convolutional features, 256 x 6 x 6
    AlexNet,
}

impl Architecture {
    /// Every supported backbone.
    pub const ALL: [Architecture; 3] = [
        Architecture::Vgg19,
        Architecture::DenseNet121,
        Architecture::AlexNet,
    ];

    /// Width of the flattened feature vector the backbone produces.
    pub fn feature_dim(self) -> usize {
        match self {
            Architecture::Vgg19 => 25088,
            Architecture::DenseNet121 => 1024,
            Architecture::AlexNet => 9216,
        }
    }

    /// Smallest square input that survives every downsampling stage.
    pub fn min_input_size(self) -> u32 {
        match self {
            Architecture::Vgg19 => 32,
            Architecture::DenseNet121 => 32,
            Architecture::AlexNet => 63,
        }
    }

    /// Canonical identifier, as written to checkpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Vgg19 => "vgg19",
            Architecture::DenseNet121 => "densenet121",
            Architecture::AlexNet => "alexnet",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.as_str() == name)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown architecture '{}' (expected one of: vgg19, densenet121, alexnet)",
                    s
                ))
            })
    }
}

impl TryFrom<String> for Architecture {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.as_str().to_string()
    }
}

/// Dataset split, named after its directory under the data root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Valid,
    /// Test data
    Test,
}

impl DataSplit {
    /// Directory name of the split.
    pub fn dir_name(self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Valid => "valid",
            DataSplit::Test => "test",
        }
    }

    /// Only the training split is augmented and shuffled.
    pub fn is_train(self) -> bool {
        self == DataSplit::Train
    }
}

impl fmt::Display for DataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether stochastic layers (dropout) are active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Eval => write!(f, "eval"),
        }
    }
}

/// Per-channel normalization constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics the pretrained backbones were trained with.
    pub fn imagenet() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::imagenet()
    }
}
