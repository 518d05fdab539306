//! Frozen backbone plus trainable head.
//!
//! The two parameter regions live on different backends: the backbone on
//! `B::InnerBackend`, which has no autodiff graph, and the head on `B`.
//! Only the head can therefore be handed to an optimizer.

use burn::{
    module::{AutodiffModule, Module},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use tracing::info;
use transfer_core::{Architecture, Error, Mode, ModelConfig, Result};

use crate::backbone::Backbone;
use crate::head::{ClassifierHead, ClassifierHeadConfig};

/// Parameter counts of the two regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSummary {
    pub trainable: usize,
    pub frozen: usize,
}

/// Transfer-learning model: frozen feature extractor and trainable head
#[derive(Debug)]
pub struct TransferModel<B: AutodiffBackend> {
    backbone: Backbone<B::InnerBackend>,
    pub(crate) head: ClassifierHead<B>,
    mode: Mode,
}

impl<B: AutodiffBackend> TransferModel<B> {
    /// Join a backbone and a head, checking that their widths agree.
    pub fn new(backbone: Backbone<B::InnerBackend>, head: ClassifierHead<B>) -> Result<Self> {
        if head.input_features() != backbone.feature_dim() {
            return Err(Error::Model(format!(
                "classifier expects {} features but the {} backbone produces {}",
                head.input_features(),
                backbone.architecture(),
                backbone.feature_dim()
            )));
        }

        Ok(Self {
            backbone,
            head,
            mode: Mode::Train,
        })
    }

    /// Load the configured backbone and attach a fresh head for
    /// `num_classes` classes.
    pub fn assemble(config: &ModelConfig, num_classes: usize, device: &B::Device) -> Result<Self> {
        let architecture = config.architecture;
        let head = ClassifierHeadConfig::new(
            architecture.feature_dim(),
            config.hidden_widths(),
            num_classes,
        )
        .with_dropout(config.dropout)
        .init::<B>(device)?;

        let backbone = Backbone::<B::InnerBackend>::pretrained(
            architecture,
            config.weights_dir.as_deref(),
            device,
        )?;

        let model = Self::new(backbone, head)?;
        let params = model.param_summary();
        info!(
            "Assembled {} model: {} trainable / {} frozen parameters, head {:?}",
            architecture,
            params.trainable,
            params.frozen,
            model.head.widths()
        );
        Ok(model)
    }

    pub fn architecture(&self) -> Architecture {
        self.backbone.architecture()
    }

    pub fn backbone(&self) -> &Backbone<B::InnerBackend> {
        &self.backbone
    }

    pub fn head(&self) -> &ClassifierHead<B> {
        &self.head
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn param_summary(&self) -> ParamSummary {
        ParamSummary {
            trainable: self.head.num_params(),
            frozen: self.backbone.num_params(),
        }
    }

    /// Log-probabilities with gradients flowing into the head only.
    pub fn forward(&self, images: Tensor<B::InnerBackend, 4>) -> Tensor<B, 2> {
        let features = Tensor::<B, 2>::from_inner(self.backbone.forward(images));
        self.head.forward(features, self.mode)
    }

    /// Gradient-free copy of the model for validation and testing.
    pub fn inference(&self) -> InferenceModel<'_, B::InnerBackend> {
        InferenceModel {
            backbone: &self.backbone,
            head: self.head.valid(),
        }
    }
}

/// Evaluation-mode view over a [`TransferModel`]
pub struct InferenceModel<'a, B: Backend> {
    backbone: &'a Backbone<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> InferenceModel<'_, B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images), Mode::Eval)
    }
}
