//! End-to-end run: data, model, training, test evaluation, checkpoint.

use std::io::Write;
use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use tracing::info;
use transfer_core::{Result, TrainingConfig};
use transfer_dataset::SplitLoaders;

use crate::checkpoint::{write_checkpoint, Checkpoint};
use crate::evaluator::{evaluate, EvaluationReport};
use crate::model::TransferModel;
use crate::report::Console;
use crate::trainer::{adam, Trainer, TrainerConfig, TrainingState};

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: TrainingState,
    pub test: EvaluationReport,
    pub checkpoint_path: PathBuf,
    pub checkpoint: Checkpoint,
}

/// Train, test and persist a model as described by `config`.
///
/// Configuration and data problems surface before the first training step.
pub fn run<B: AutodiffBackend, W: Write>(
    config: &TrainingConfig,
    device: &B::Device,
    console: &mut Console<W>,
) -> Result<RunSummary> {
    config.validate()?;

    let mut loaders =
        SplitLoaders::<B::InnerBackend>::open(&config.data, config.training.seed, device)?;
    let classes = loaders.classes().clone();

    let model = TransferModel::<B>::assemble(&config.model, classes.len(), device)?;

    let mut trainer = Trainer::new(TrainerConfig::from_config(config), adam::<B>());
    let model = trainer.fit(model, &mut loaders.train, &mut loaders.valid, console)?;

    let test = evaluate(&model, &mut loaders.test)?;
    console.test_accuracy(&test)?;

    let checkpoint_path = config.output.checkpoint_path.clone();
    let checkpoint = write_checkpoint(&model, &classes, config.training.epochs, &checkpoint_path)?;
    console.checkpoint_saved(&checkpoint_path)?;

    info!(
        "Run complete: {} steps, test accuracy {}%",
        trainer.state().steps,
        test.percent()
    );

    Ok(RunSummary {
        state: trainer.into_state(),
        test,
        checkpoint_path,
        checkpoint,
    })
}
