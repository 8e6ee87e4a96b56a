//! Synchronized source/target index batches.
//!
//! Every iteration draws `batch_size` indices from each domain. Each domain
//! walks a shuffled permutation of its indices without replacement; when
//! fewer than `batch_size` unseen indices remain the tail is dropped and a
//! fresh permutation begins, so a batch never repeats an index and never
//! spans two passes. One epoch is `max(len_source, len_target) / batch_size`
//! iterations, which makes the shorter domain cycle.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use uda_core::{Error, Result};

/// Indices for one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBatchPair {
    /// Indices into the source store
    pub source: Vec<usize>,
    /// Indices into the target store
    pub target: Vec<usize>,
}

#[derive(Debug, Clone)]
struct DomainCursor {
    order: Vec<usize>,
    position: usize,
    passes: usize,
}

impl DomainCursor {
    fn new(len: usize) -> Self {
        Self {
            order: (0..len).collect(),
            position: len,
            passes: 0,
        }
    }

    fn reshuffle(&mut self, rng: &mut ChaCha8Rng) {
        self.order.shuffle(rng);
        self.position = 0;
        self.passes += 1;
    }

    fn next_batch(&mut self, batch_size: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if self.position + batch_size > self.order.len() {
            self.reshuffle(rng);
        }
        let batch = self.order[self.position..self.position + batch_size].to_vec();
        self.position += batch_size;
        batch
    }
}

/// Produces paired index batches for source and target stores
#[derive(Debug, Clone)]
pub struct BatchPairSampler {
    batch_size: usize,
    source: DomainCursor,
    target: DomainCursor,
    rng: ChaCha8Rng,
}

impl BatchPairSampler {
    /// Creates a sampler over stores of the given sizes.
    ///
    /// Fails when `batch_size` is zero or larger than either domain.
    pub fn new(source_len: usize, target_len: usize, batch_size: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Configuration("batch_size must be positive".to_string()));
        }
        for (name, len) in [("source", source_len), ("target", target_len)] {
            if batch_size > len {
                return Err(Error::Configuration(format!(
                    "batch_size {batch_size} exceeds the {name} domain size {len}"
                )));
            }
        }

        Ok(Self {
            batch_size,
            source: DomainCursor::new(source_len),
            target: DomainCursor::new(target_len),
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Windows per domain per iteration
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Iterations in one epoch
    pub fn iterations_per_epoch(&self) -> usize {
        (self.source.order.len().max(self.target.order.len()) / self.batch_size).max(1)
    }

    /// Completed or started passes over (source, target)
    pub fn passes(&self) -> (usize, usize) {
        (self.source.passes, self.target.passes)
    }

    /// Draws the next pair, continuing the current passes
    pub fn next_pair(&mut self) -> IndexBatchPair {
        IndexBatchPair {
            source: self.source.next_batch(self.batch_size, &mut self.rng),
            target: self.target.next_batch(self.batch_size, &mut self.rng),
        }
    }

    /// Starts a new epoch: both domains begin a fresh shuffled pass and the
    /// returned iterator yields `iterations_per_epoch` pairs lazily.
    pub fn epoch(&mut self) -> EpochBatches<'_> {
        self.source.reshuffle(&mut self.rng);
        self.target.reshuffle(&mut self.rng);
        let remaining = self.iterations_per_epoch();
        debug!(
            iterations = remaining,
            batch_size = self.batch_size,
            "Starting sampler epoch"
        );
        EpochBatches {
            sampler: self,
            remaining,
        }
    }
}

/// Fails when `batch_size` exceeds the window count of any class present
/// in a domain. Classes without windows (or unlabeled stores) are ignored.
pub fn check_class_sizes(domain: &str, class_counts: &[usize], batch_size: usize) -> Result<()> {
    let smallest = class_counts
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, count)| count > 0)
        .min_by_key(|&(_, count)| count);
    match smallest {
        Some((class, count)) if batch_size > count => Err(Error::Configuration(format!(
            "batch_size {batch_size} exceeds the {count} {domain} windows of class {class}"
        ))),
        _ => Ok(()),
    }
}

/// Lazy iterator over one epoch of index pairs
pub struct EpochBatches<'a> {
    sampler: &'a mut BatchPairSampler,
    remaining: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = IndexBatchPair;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.sampler.next_pair())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EpochBatches<'_> {}
