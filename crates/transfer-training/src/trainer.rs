//! Training loop for the classifier head.
//!
//! Runs NLL loss over log-probabilities, steps Adam on the head only and
//! validates every `print_every` optimizer steps. The step counter runs
//! across epochs; the running loss resets after each validation.

use std::io::Write;

use burn::{
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use transfer_core::{Error, Mode, Result, TrainingConfig};
use transfer_dataset::{BatchLoader, ImageBatch};

use crate::evaluator::count_correct;
use crate::head::ClassifierHead;
use crate::model::TransferModel;
use crate::report::Console;

/// Loop settings taken from the run configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub print_every: usize,
    pub show_progress: bool,
}

impl TrainerConfig {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.training.learning_rate,
            epochs: config.training.epochs,
            print_every: config.training.print_every,
            show_progress: config.training.show_progress,
        }
    }
}

/// Result of one pass over the validation loader
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Mean of per-batch losses
    pub loss: f64,
    /// Mean of per-batch accuracies
    pub accuracy: f64,
    /// Correct predictions over all examples
    pub example_accuracy: f64,
    pub batches: usize,
    pub examples: usize,
}

/// One validation event in the run history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// 1-based epoch the validation ran in
    pub epoch: usize,
    /// Global step count at validation time
    pub step: usize,
    pub train_loss: f64,
    pub report: ValidationReport,
}

/// Mutable progress of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    /// Optimizer steps taken, across epochs
    pub steps: usize,
    /// Loss summed since the last validation
    pub running_loss: f64,
    pub best_valid_accuracy: f64,
    pub history: Vec<ValidationRecord>,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_step(&mut self, loss: f64) {
        self.steps += 1;
        self.running_loss += loss;
    }

    pub fn should_validate(&self, print_every: usize) -> bool {
        print_every > 0 && self.steps > 0 && self.steps % print_every == 0
    }

    /// Average loss over the last interval, resetting the accumulator.
    pub fn take_running_loss(&mut self, print_every: usize) -> f64 {
        let loss = self.running_loss / print_every.max(1) as f64;
        self.running_loss = 0.0;
        loss
    }

    pub fn record_validation(&mut self, record: ValidationRecord) {
        if record.report.accuracy > self.best_valid_accuracy {
            self.best_valid_accuracy = record.report.accuracy;
        }
        self.history.push(record);
    }
}

/// Adam over the classifier head's parameters.
pub fn adam<B: AutodiffBackend>() -> impl Optimizer<ClassifierHead<B>, B> {
    AdamConfig::new().init::<B, ClassifierHead<B>>()
}

/// Negative log-likelihood of `targets` under row-wise log-probabilities.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let n = targets.dims()[0];
    log_probs.gather(1, targets.reshape([n, 1])).mean().neg()
}

/// Drives optimization of a [`TransferModel`]'s head
pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ClassifierHead<B>, B>,
{
    config: TrainerConfig,
    optimizer: O,
    state: TrainingState,
    _backend: std::marker::PhantomData<B>,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ClassifierHead<B>, B>,
{
    pub fn new(config: TrainerConfig, optimizer: O) -> Self {
        Self {
            config,
            optimizer,
            state: TrainingState::new(),
            _backend: std::marker::PhantomData,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn into_state(self) -> TrainingState {
        self.state
    }

    /// One forward/backward pass and head update. Returns the batch loss.
    pub fn train_step(
        &mut self,
        mut model: TransferModel<B>,
        batch: ImageBatch<B::InnerBackend>,
    ) -> (TransferModel<B>, f64) {
        let targets = Tensor::<B, 1, Int>::from_inner(batch.targets);
        let log_probs = model.forward(batch.images);
        let loss = nll_loss(log_probs, targets);
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model.head);
        model.head = self
            .optimizer
            .step(self.config.learning_rate, model.head, grads);

        self.state.record_step(loss_value);
        (model, loss_value)
    }

    /// Train for the configured number of epochs.
    ///
    /// Both loaders must be non-empty; this is checked before the first step.
    pub fn fit<W: Write>(
        &mut self,
        mut model: TransferModel<B>,
        train: &mut BatchLoader<B::InnerBackend>,
        valid: &mut BatchLoader<B::InnerBackend>,
        console: &mut Console<W>,
    ) -> Result<TransferModel<B>> {
        if train.is_empty() {
            return Err(Error::Data("training split has no images".into()));
        }
        if valid.is_empty() {
            return Err(Error::Data("validation split has no images".into()));
        }

        let epochs = self.config.epochs;
        let print_every = self.config.print_every;
        info!(
            "Training {} epochs of {} batches, validating every {} steps",
            epochs,
            train.num_batches(),
            print_every
        );
        console.training_started()?;
        model.set_mode(Mode::Train);

        for epoch in 1..=epochs {
            let progress = self.progress_bar(train.num_batches(), epoch);

            for batch in train.iter() {
                let (next, loss) = self.train_step(model, batch?);
                model = next;
                progress.inc(1);
                progress.set_message(format!("loss {loss:.4}"));

                if self.state.should_validate(print_every) {
                    model.set_mode(Mode::Eval);
                    let report = validate(&model, valid);
                    model.set_mode(Mode::Train);
                    let report = report?;

                    let train_loss = self.state.take_running_loss(print_every);
                    progress.suspend(|| console.validation(epoch, epochs, train_loss, &report))?;
                    self.state.record_validation(ValidationRecord {
                        epoch,
                        step: self.state.steps,
                        train_loss,
                        report,
                    });
                }
            }

            progress.finish_and_clear();
            self.state.epoch = epoch;
            debug!("Epoch {}/{} finished after {} steps", epoch, epochs, self.state.steps);
        }

        console.training_completed()?;
        info!(
            "Training finished: {} steps, best validation accuracy {:.4}",
            self.state.steps, self.state.best_valid_accuracy
        );
        Ok(model)
    }

    fn progress_bar(&self, len: usize, epoch: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "  {spinner:.green} epoch {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = ProgressBar::new(len as u64).with_style(style);
        bar.set_prefix(format!("{}/{}", epoch, self.config.epochs));
        bar
    }
}

/// One pass over the validation loader.
///
/// Accuracy is the unweighted mean of per-batch accuracies, so a short final
/// batch counts as much as a full one. The example-weighted figure is
/// reported alongside.
pub fn validate<B: AutodiffBackend>(
    model: &TransferModel<B>,
    loader: &mut BatchLoader<B::InnerBackend>,
) -> Result<ValidationReport> {
    if loader.num_batches() == 0 {
        return Err(Error::Data("validation split has no images".into()));
    }

    let num_classes = model.head().num_classes();
    let inference = model.inference();
    let mut loss_sum = 0.0;
    let mut accuracy_sum = 0.0;
    let mut correct = 0usize;
    let mut examples = 0usize;
    let mut batches = 0usize;

    for batch in loader.iter() {
        let batch = batch?;
        let n = batch.len();
        let max_label: i64 = batch.targets.clone().max().into_scalar().elem();
        if max_label as usize >= num_classes {
            return Err(Error::Data(format!(
                "validation label {max_label} outside the {num_classes} classes the model was trained on"
            )));
        }
        let log_probs = inference.forward(batch.images);

        let loss: f64 = nll_loss(log_probs.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        let batch_correct = count_correct(log_probs, batch.targets);

        loss_sum += loss;
        accuracy_sum += batch_correct as f64 / n as f64;
        correct += batch_correct;
        examples += n;
        batches += 1;
    }

    let report = ValidationReport {
        loss: loss_sum / batches as f64,
        accuracy: accuracy_sum / batches as f64,
        example_accuracy: correct as f64 / examples.max(1) as f64,
        batches,
        examples,
    };
    debug!(
        "Validation: {} batches, {} examples, example-weighted accuracy {:.4}",
        report.batches, report.examples, report.example_accuracy
    );
    Ok(report)
}
