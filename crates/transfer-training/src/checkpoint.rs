//! Checkpoint persistence.
//!
//! A checkpoint is a JSON document describing the head (topology and
//! parameters), the class mapping in both directions and the training
//! hyperparameters. The frozen backbone is written next to it as a burn
//! record named `<stem>.backbone.mpk`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use transfer_core::{Architecture, Error, Result};
use transfer_dataset::ClassMapping;

use crate::backbone::{Backbone, RECORD_EXTENSION};
use crate::head::{ClassifierHead, ParamTensor, StageSpec};
use crate::model::TransferModel;

/// Current checkpoint document version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Everything needed to rebuild a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub architecture: Architecture,
    /// Ordered stages of the classifier head
    pub classifier: Vec<StageSpec>,
    /// Head parameters keyed `fc{n}.weight` / `fc{n}.bias`
    pub state_dict: BTreeMap<String, ParamTensor>,
    pub class_to_idx: BTreeMap<String, usize>,
    pub idx_to_class: BTreeMap<usize, String>,
    pub dropout: f64,
    pub epochs: usize,
    /// File name of the backbone record, relative to the checkpoint
    #[serde(default)]
    pub backbone_state: Option<String>,
    pub created_at: String,
}

impl Checkpoint {
    /// Snapshot a trained model.
    pub fn from_model<B: AutodiffBackend>(
        model: &TransferModel<B>,
        classes: &ClassMapping,
        epochs: usize,
    ) -> Result<Self> {
        let head = model.head();
        if head.num_classes() != classes.len() {
            return Err(Error::Model(format!(
                "head predicts {} classes but the mapping has {}",
                head.num_classes(),
                classes.len()
            )));
        }

        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            architecture: model.architecture(),
            classifier: head.topology(),
            state_dict: head.state_dict()?,
            class_to_idx: classes.class_to_idx(),
            idx_to_class: classes.idx_to_class(),
            dropout: head.dropout_prob(),
            epochs,
            backbone_state: None,
            created_at: chrono::Local::now().to_rfc3339(),
        })
    }

    /// Write the document as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Checkpoint written to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let checkpoint: Self = serde_json::from_str(&content)?;
        if checkpoint.format_version > CHECKPOINT_FORMAT_VERSION {
            return Err(Error::Model(format!(
                "checkpoint format {} is newer than supported version {}",
                checkpoint.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }
        Ok(checkpoint)
    }

    /// Class mapping recorded in the checkpoint.
    pub fn classes(&self) -> Result<ClassMapping> {
        let classes = ClassMapping::from_class_to_idx(&self.class_to_idx)?;
        let inverse_matches = classes.idx_to_class() == self.idx_to_class;
        if !inverse_matches {
            return Err(Error::Data(
                "idx_to_class is not the inverse of class_to_idx".into(),
            ));
        }
        Ok(classes)
    }

    /// Rebuild the classifier head on `device`.
    pub fn restore_head<B: Backend>(&self, device: &B::Device) -> Result<ClassifierHead<B>> {
        ClassifierHead::from_checkpoint(self, device)
    }

    /// Rebuild the backbone, using the sibling record when one was saved.
    ///
    /// `checkpoint_path` is the location this checkpoint was loaded from.
    pub fn restore_backbone<B: Backend>(
        &self,
        checkpoint_path: &Path,
        device: &B::Device,
    ) -> Result<Backbone<B>> {
        let backbone = Backbone::new(self.architecture, device);
        match &self.backbone_state {
            Some(name) => {
                let dir = checkpoint_path.parent().unwrap_or_else(|| Path::new(""));
                backbone.load_record(&dir.join(name), device)
            }
            None => Ok(backbone),
        }
    }
}

impl<B: Backend> ClassifierHead<B> {
    /// Head with the topology and weights stored in `checkpoint`.
    pub fn from_checkpoint(checkpoint: &Checkpoint, device: &B::Device) -> Result<Self> {
        ClassifierHead::from_state(&checkpoint.classifier, &checkpoint.state_dict, device)
    }
}

/// Location of the backbone record written alongside `checkpoint_path`.
pub fn backbone_record_path(checkpoint_path: &Path) -> PathBuf {
    let stem = checkpoint_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    checkpoint_path.with_file_name(format!("{stem}.backbone.{RECORD_EXTENSION}"))
}

/// Persist a trained model: the JSON checkpoint plus the backbone record.
pub fn write_checkpoint<B: AutodiffBackend>(
    model: &TransferModel<B>,
    classes: &ClassMapping,
    epochs: usize,
    path: &Path,
) -> Result<Checkpoint> {
    let mut checkpoint = Checkpoint::from_model(model, classes, epochs)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let record = backbone_record_path(path);
    model.backbone().save_record(&record)?;
    checkpoint.backbone_state = record
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    if let Err(err) = checkpoint.save(path) {
        if let Err(cleanup) = fs::remove_file(&record) {
            warn!("Failed to remove {}: {cleanup}", record.display());
        }
        return Err(err);
    }
    Ok(checkpoint)
}
