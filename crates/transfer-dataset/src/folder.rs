//! Labeled image collections laid out as one directory per class.
//!
//! ```text
//! train/
//!   daisy/   0001.jpg 0002.jpg ...
//!   rose/    ...
//! ```
//!
//! Class names are sorted to assign indices, so the three splits of a data
//! root agree on label identity as long as they share class directories.

use burn::data::dataset::Dataset;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use transfer_core::{Error, Result};
use walkdir::WalkDir;

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// One image on disk and its class index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Bidirectional mapping between class names and indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMapping {
    names: Vec<String>,
}

impl ClassMapping {
    /// Build a mapping from class names; indices follow sorted name order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Class names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn class_to_idx(&self) -> BTreeMap<String, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect()
    }

    pub fn idx_to_class(&self) -> BTreeMap<usize, String> {
        self.names.iter().cloned().enumerate().collect()
    }

    /// Rebuild from a persisted `class_to_idx` table.
    ///
    /// Fails unless the indices are exactly `0..n` in sorted name order.
    pub fn from_class_to_idx(table: &BTreeMap<String, usize>) -> Result<Self> {
        let mapping = Self::from_names(table.keys().cloned());
        if mapping.class_to_idx() != *table {
            return Err(Error::Data(
                "class_to_idx indices must be 0..n in sorted class order".into(),
            ));
        }
        Ok(mapping)
    }
}

/// A split directory scanned into labeled samples.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    samples: Vec<ImageSample>,
    classes: ClassMapping,
}

impl ImageFolder {
    /// Scan `root` for class subdirectories and their images.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(Error::Data(format!(
                "Dataset directory not found: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(Error::Data(format!(
                "Dataset path is not a directory: {}",
                root.display()
            )));
        }

        let class_names = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'));
        let classes = ClassMapping::from_names(class_names);

        if classes.is_empty() {
            return Err(Error::Data(format!(
                "No class subdirectories found in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in classes.names().iter().enumerate() {
            let class_dir = root.join(class_name);
            let before = samples.len();
            samples.extend(
                scan_images(&class_dir)
                    .into_iter()
                    .map(|path| ImageSample { path, label }),
            );
            if samples.len() == before {
                return Err(Error::Data(format!(
                    "Class directory contains no images: {}",
                    class_dir.display()
                )));
            }
        }

        debug!(
            "Scanned {}: {} images in {} classes",
            root.display(),
            samples.len(),
            classes.len()
        );

        Ok(Self {
            root,
            samples,
            classes,
        })
    }

    /// Assemble a folder from already known samples.
    pub fn from_parts(root: PathBuf, samples: Vec<ImageSample>, classes: ClassMapping) -> Self {
        Self {
            root,
            samples,
            classes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn classes(&self) -> &ClassMapping {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of samples per class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for sample in &self.samples {
            if let Some(count) = counts.get_mut(sample.label) {
                *count += 1;
            }
        }
        counts
    }

    /// Decode the image of sample `index`.
    pub fn load_image(&self, index: usize) -> Result<DynamicImage> {
        let sample = self.samples.get(index).ok_or_else(|| {
            Error::Data(format!(
                "Sample index {index} out of range ({} samples)",
                self.samples.len()
            ))
        })?;
        decode_image(&sample.path)
    }
}

impl Dataset<ImageSample> for ImageFolder {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Decode an image file, reporting failures as malformed data.
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| Error::Data(format!("Failed to open image {}: {e}", path.display())))?
        .with_guessed_format()
        .map_err(|e| Error::Data(format!("Failed to read image {}: {e}", path.display())))?
        .decode()
        .map_err(|e| Error::Data(format!("Failed to decode image {}: {e}", path.display())))
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn scan_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_image_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}
