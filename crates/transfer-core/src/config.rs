//! Configuration structures for a transfer-learning run.
//!
//! Every section has defaults matching the reference flowers setup, so a
//! partial TOML file (or none at all) is enough to start a run.

use crate::error::{Error, Result};
use crate::types::{Architecture, DataSplit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Widths of the second and third hidden stages of the classifier head.
pub const DEFAULT_HIDDEN_TAIL: [usize; 2] = [500, 204];

/// Main configuration for one training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset location and preprocessing
    pub data: DataConfig,
    /// Backbone and classifier head
    pub model: ModelConfig,
    /// Optimization and reporting
    pub training: TrainingParams,
    /// Compute device preference
    pub device: DeviceConfig,
    /// Checkpoint destination
    pub output: OutputConfig,
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory holding `train`, `valid` and `test`
    pub data_dir: PathBuf,
    /// Batch size for all three loaders
    pub batch_size: usize,
    /// Side of the square crop fed to the backbone
    pub image_size: u32,
    /// Shorter-side resize applied before the evaluation center crop
    pub resize_size: u32,
    /// Maximum training rotation in degrees (applied as ±rotation_degrees)
    pub rotation_degrees: f32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("flowers"),
            batch_size: 64,
            image_size: 224,
            resize_size: 256,
            rotation_degrees: 30.0,
        }
    }
}

impl DataConfig {
    /// Directory of one split under the data root.
    pub fn split_dir(&self, split: DataSplit) -> PathBuf {
        self.data_dir.join(split.dir_name())
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Frozen backbone
    pub architecture: Architecture,
    /// Width of the first hidden stage of the head
    pub hidden_units: usize,
    /// Widths of the remaining hidden stages
    pub hidden_tail: [usize; 2],
    /// Dropout probability between head stages
    pub dropout: f64,
    /// Directory containing `<arch>.mpk` pretrained backbone records
    pub weights_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Vgg19,
            hidden_units: 1000,
            hidden_tail: DEFAULT_HIDDEN_TAIL,
            dropout: 0.5,
            weights_dir: None,
        }
    }
}

impl ModelConfig {
    /// Hidden widths of the head, first to last.
    pub fn hidden_widths(&self) -> [usize; 3] {
        [self.hidden_units, self.hidden_tail[0], self.hidden_tail[1]]
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of passes over the training loader
    pub epochs: usize,
    /// Adam step size for the classifier head
    pub learning_rate: f64,
    /// Steps between validation passes
    pub print_every: usize,
    /// Seed for shuffling and augmentation
    pub seed: u64,
    /// Draw a progress bar while training
    pub show_progress: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.001,
            print_every: 50,
            seed: 42,
            show_progress: true,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Prefer an accelerator when one is available
    pub use_gpu: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where the checkpoint document is written
    pub checkpoint_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("checkpoint.json"),
        }
    }
}

impl TrainingConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        crate::cli::load_toml_config(path)
    }

    /// Replace the backbone by its identifier.
    pub fn set_architecture(&mut self, name: &str) -> Result<()> {
        self.model.architecture = name.parse()?;
        Ok(())
    }

    /// Check numeric ranges and head geometry.
    ///
    /// Only looks at values, never at the filesystem.
    pub fn validate(&self) -> Result<()> {
        let lr = self.training.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(Error::Config(format!(
                "learning rate must be a positive number, got {lr}"
            )));
        }
        if self.training.epochs == 0 {
            return Err(Error::Config("epochs must be greater than 0".into()));
        }
        if self.training.print_every == 0 {
            return Err(Error::Config("print interval must be greater than 0".into()));
        }
        if self.data.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than 0".into()));
        }
        let dropout = self.model.dropout;
        if !(0.0..1.0).contains(&dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {dropout}"
            )));
        }
        if !self.data.rotation_degrees.is_finite() || self.data.rotation_degrees < 0.0 {
            return Err(Error::Config(format!(
                "rotation must be a non-negative angle, got {}",
                self.data.rotation_degrees
            )));
        }

        let arch = self.model.architecture;
        if self.data.image_size < arch.min_input_size() {
            return Err(Error::Config(format!(
                "image size {} is too small for {arch} (minimum {})",
                self.data.image_size,
                arch.min_input_size()
            )));
        }
        if self.data.resize_size < self.data.image_size {
            return Err(Error::Config(format!(
                "resize size {} must be at least the crop size {}",
                self.data.resize_size, self.data.image_size
            )));
        }

        let widths = self.model.hidden_widths();
        if widths.contains(&0) {
            return Err(Error::Config(format!(
                "hidden widths must be positive, got {widths:?}"
            )));
        }
        let mut previous = arch.feature_dim();
        for width in widths {
            if width > previous {
                return Err(Error::Config(format!(
                    "hidden widths must narrow from {} features, got {widths:?}",
                    arch.feature_dim()
                )));
            }
            previous = width;
        }

        Ok(())
    }
}
