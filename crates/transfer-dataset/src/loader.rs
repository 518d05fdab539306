//! Restartable batch loading over an [`ImageFolder`].
//!
//! Each call to [`BatchLoader::iter`] starts a new pass. Shuffled loaders
//! draw a fresh order and per-image augmentation seeds from their
//! `ChaCha8Rng`, so a run is reproducible from its seed. Images are read
//! lazily, one batch at a time, and decoded in parallel.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use transfer_core::{DataConfig, DataSplit, Result};

use crate::batcher::{ImageBatch, ImageBatcher, ImageItem};
use crate::folder::ImageFolder;
use crate::transform::Transform;

/// Yields fixed-size batches of transformed images
pub struct BatchLoader<B: Backend> {
    dataset: Arc<ImageFolder>,
    transform: Transform,
    batcher: ImageBatcher,
    batch_size: usize,
    rng: Option<ChaCha8Rng>,
    device: B::Device,
}

impl<B: Backend> BatchLoader<B> {
    /// Loader that keeps file order.
    pub fn new(
        dataset: ImageFolder,
        transform: Transform,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        let batcher = ImageBatcher::new(transform.crop_size() as usize);
        Self {
            dataset: Arc::new(dataset),
            transform,
            batcher,
            batch_size: batch_size.max(1),
            rng: None,
            device,
        }
    }

    /// Reshuffle on every pass, seeded for reproducibility.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.rng = Some(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    /// Loader for one split: the training split is augmented and shuffled,
    /// the others are deterministic.
    pub fn for_split(
        split: DataSplit,
        dataset: ImageFolder,
        data: &DataConfig,
        seed: u64,
        device: B::Device,
    ) -> Self {
        let loader = Self::new(
            dataset,
            Transform::for_split(split, data),
            data.batch_size,
            device,
        );
        if split.is_train() {
            loader.shuffled(seed)
        } else {
            loader
        }
    }

    pub fn dataset(&self) -> &ImageFolder {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_shuffled(&self) -> bool {
        self.rng.is_some()
    }

    /// Number of images per pass
    pub fn num_items(&self) -> usize {
        self.dataset.samples().len()
    }

    /// Number of batches per pass, the last one possibly partial
    pub fn num_batches(&self) -> usize {
        self.num_items().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.num_items() == 0
    }

    /// Start a new pass over the dataset.
    pub fn iter(&mut self) -> BatchIter<'_, B> {
        let mut order: Vec<usize> = (0..self.num_items()).collect();
        let seeds: Vec<u64> = match self.rng.as_mut() {
            Some(rng) => {
                order.shuffle(&mut *rng);
                (0..order.len()).map(|_| rng.gen()).collect()
            }
            None => order.iter().map(|&i| i as u64).collect(),
        };

        BatchIter {
            loader: self,
            order,
            seeds,
            cursor: 0,
        }
    }

    fn load_batch(&self, indices: &[usize], seeds: &[u64]) -> Result<ImageBatch<B>> {
        let dataset = &self.dataset;
        let transform = &self.transform;

        let items = indices
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(&index, &seed)| {
                let img = dataset.load_image(index)?;
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                Ok(ImageItem {
                    pixels: transform.apply(img, &mut rng),
                    label: dataset.samples()[index].label,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Batcher::<B, ImageItem, ImageBatch<B>>::batch(
            &self.batcher,
            items,
            &self.device,
        ))
    }
}

/// One pass over a [`BatchLoader`]
pub struct BatchIter<'a, B: Backend> {
    loader: &'a BatchLoader<B>,
    order: Vec<usize>,
    seeds: Vec<u64>,
    cursor: usize,
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = Result<ImageBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let range = self.cursor..end;
        self.cursor = end;
        Some(
            self.loader
                .load_batch(&self.order[range.clone()], &self.seeds[range]),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for BatchIter<'_, B> {}
