//! Transfer learning on top of a frozen convolutional backbone.
//!
//! This crate provides:
//! - VGG-19, DenseNet-121 and AlexNet feature extractors
//! - The four-stage classifier head and its persisted form
//! - Head-only training with periodic validation
//! - Test-set evaluation and JSON checkpoints

pub mod backbone;
pub mod checkpoint;
pub mod evaluator;
pub mod head;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod trainer;

pub use backbone::Backbone;
pub use checkpoint::{backbone_record_path, write_checkpoint, Checkpoint};
pub use evaluator::{evaluate, EvaluationReport};
pub use head::{ClassifierHead, ClassifierHeadConfig, ParamTensor, StageSpec};
pub use model::{InferenceModel, ParamSummary, TransferModel};
pub use pipeline::{run, RunSummary};
pub use report::Console;
pub use trainer::{
    adam, nll_loss, validate, Trainer, TrainerConfig, TrainingState, ValidationRecord,
    ValidationReport,
};

/// Common imports for running a training job
pub mod prelude {
    pub use crate::{run, Checkpoint, Console, RunSummary, TransferModel};
    pub use transfer_core::{Architecture, Error, Mode, Result, TrainingConfig};
    pub use transfer_dataset::{ClassMapping, SplitLoaders};
}
