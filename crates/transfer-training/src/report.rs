//! Console reporting for a training run.
//!
//! These are the user-facing progress lines, kept apart from `tracing`
//! diagnostics so they can be captured independently.

use std::io::{self, Write};
use std::path::Path;

use colored::Colorize;

use crate::evaluator::EvaluationReport;
use crate::trainer::ValidationReport;

/// Writes progress lines to any sink
pub struct Console<W: Write> {
    out: W,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn training_started(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", "Training starting .....".green().bold())?;
        writeln!(self.out)
    }

    pub fn validation(
        &mut self,
        epoch: usize,
        epochs: usize,
        train_loss: f64,
        report: &ValidationReport,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "Epoch {}/{}.. Train loss: {:.3}.. Valid loss: {:.3}.. Valid accuracy: {:.3}",
            epoch,
            epochs,
            train_loss,
            report.loss,
            report.accuracy * 100.0
        )
    }

    pub fn training_completed(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{}", "Training completed!!".green().bold())
    }

    pub fn test_accuracy(&mut self, report: &EvaluationReport) -> io::Result<()> {
        writeln!(
            self.out,
            "Accuracy on test images is: {}%",
            report.percent()
        )
    }

    pub fn checkpoint_saved(&mut self, path: &Path) -> io::Result<()> {
        writeln!(
            self.out,
            "{} {}",
            "Checkpoint saved to".cyan(),
            path.display()
        )?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_formats() {
        let mut console = Console::new(Vec::new());
        let validation = ValidationReport {
            loss: 0.41234,
            accuracy: 0.875,
            example_accuracy: 0.88,
            batches: 2,
            examples: 25,
        };
        console.validation(2, 10, 1.5, &validation).unwrap();
        console
            .test_accuracy(&EvaluationReport::new(vec![2, 1], vec![3, 3]))
            .unwrap();

        let text = String::from_utf8(console.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Epoch 2/10.. Train loss: 1.500.. Valid loss: 0.412.. Valid accuracy: 87.500"
        );
        assert_eq!(lines[1], "Accuracy on test images is: 50%");
    }

    #[test]
    fn test_markers() {
        let mut console = Console::new(Vec::new());
        console.training_started().unwrap();
        console.training_completed().unwrap();
        let text = String::from_utf8(console.into_inner()).unwrap();
        assert_eq!(text.matches("Training starting").count(), 1);
        assert_eq!(text.matches("Training completed!!").count(), 1);
    }
}
