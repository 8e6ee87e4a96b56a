//! Checkpoint persistence.
//!
//! A checkpoint is a Burn record of the [`UdaModel`] (`<tag>.mpk`, written
//! by `CompactRecorder`) plus a JSON metadata file (`<tag>.json`). The
//! training loop writes three kinds of tags:
//! - `latest`: overwritten every checkpoint cycle
//! - `best`: overwritten when target accuracy reaches a new best
//! - `epoch_N`: one per cycle, only the newest `keep_last_n` are retained
//!
//! Writes are retried with exponential backoff. Once retries are exhausted
//! the store reports [`Error::Checkpoint`], which the caller treats as
//! recoverable.

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uda_core::{Error, ModelName, OutputConfig, Result, UdaConfig};

use crate::model::UdaModel;

/// Tag of the checkpoint rewritten every cycle
pub const LATEST_TAG: &str = "latest";
/// Tag of the best-accuracy checkpoint
pub const BEST_TAG: &str = "best";

const EPOCH_PREFIX: &str = "epoch_";
const RECORD_EXTENSION: &str = "mpk";

/// Tag of the per-epoch checkpoint
pub fn epoch_tag(epoch: usize) -> String {
    format!("{EPOCH_PREFIX}{epoch}")
}

/// Epoch number encoded in an `epoch_N` tag
pub fn epoch_from_tag(tag: &str) -> Option<usize> {
    tag.strip_prefix(EPOCH_PREFIX).and_then(|s| s.parse().ok())
}

/// Metadata stored next to every model record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub tag: String,
    /// Last completed epoch (1-based)
    pub epoch: usize,
    /// Global optimizer steps so far
    pub iteration: usize,
    /// Target accuracy at this checkpoint, if evaluated
    pub accuracy: Option<f64>,
    pub model_name: ModelName,
    pub timestamp: DateTime<Utc>,
    /// Full run configuration
    pub config: serde_json::Value,
}

impl CheckpointMetadata {
    pub fn new(
        tag: impl Into<String>,
        epoch: usize,
        iteration: usize,
        accuracy: Option<f64>,
        config: &UdaConfig,
    ) -> Result<Self> {
        Ok(Self {
            tag: tag.into(),
            epoch,
            iteration,
            accuracy,
            model_name: config.model.model_name,
            timestamp: Utc::now(),
            config: serde_json::to_value(config)?,
        })
    }

    /// Same metadata under another tag
    pub fn retagged(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..self.clone()
        }
    }
}

/// Where the training loop persists model state
pub trait CheckpointStore {
    /// Persists `model` under `tag`, replacing any previous checkpoint with
    /// that tag
    fn save<B: Backend>(
        &mut self,
        tag: &str,
        model: &UdaModel<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<()>;

    /// Loads the checkpoint `tag` into `template`, which must have the same
    /// architecture
    fn load<B: Backend>(
        &self,
        tag: &str,
        template: UdaModel<B>,
        device: &B::Device,
    ) -> Result<UdaModel<B>>;

    /// Metadata of checkpoint `tag`
    fn metadata(&self, tag: &str) -> Result<CheckpointMetadata>;
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub max_attempts: usize,
    /// Delay after the first failure
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Delay before attempt `attempt + 1` (0-based failures so far)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds or the attempts are used up; returns
    /// the last error
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&OutputConfig> for RetryPolicy {
    fn from(config: &OutputConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_backoff_ms))
    }
}

/// Filesystem checkpoint store
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    keep_last_n: usize,
    retry: RetryPolicy,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`; `keep_last_n == 0` keeps every epoch checkpoint
    pub fn new(dir: impl Into<PathBuf>, keep_last_n: usize, retry: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            keep_last_n,
            retry,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.save_dir, config.keep_last_n, RetryPolicy::from(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path without extension, as Burn's recorders expect
    fn record_path(&self, tag: &str) -> PathBuf {
        self.dir.join(tag)
    }

    fn metadata_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{tag}.json"))
    }

    /// Whether checkpoint `tag` has been written
    pub fn exists(&self, tag: &str) -> bool {
        self.metadata_path(tag).exists()
            && self
                .record_path(tag)
                .with_extension(RECORD_EXTENSION)
                .exists()
    }

    /// Per-epoch tags present on disk, oldest first
    pub fn list_epoch_tags(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(epoch) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(epoch_from_tag)
            {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs.into_iter().map(epoch_tag).collect())
    }

    fn write_once<B: Backend>(
        &self,
        tag: &str,
        model: &UdaModel<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Checkpoint(format!("cannot create {:?}: {}", self.dir, e)))?;

        model
            .clone()
            .save_file(self.record_path(tag), &CompactRecorder::new())
            .map_err(|e| Error::Checkpoint(format!("failed to write model record {tag}: {e:?}")))?;

        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(self.metadata_path(tag), json)
            .map_err(|e| Error::Checkpoint(format!("failed to write metadata {tag}: {e}")))?;
        Ok(())
    }

    /// Removes the oldest epoch checkpoints beyond `keep_last_n`
    fn cleanup_old_checkpoints(&self) -> Result<()> {
        if self.keep_last_n == 0 {
            return Ok(());
        }
        let tags = self.list_epoch_tags()?;
        if tags.len() <= self.keep_last_n {
            return Ok(());
        }

        for tag in &tags[..tags.len() - self.keep_last_n] {
            for path in [
                self.metadata_path(tag),
                self.record_path(tag).with_extension(RECORD_EXTENSION),
            ] {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove old checkpoint {:?}: {}", path, e);
                }
            }
            debug!("Removed old checkpoint {}", tag);
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save<B: Backend>(
        &mut self,
        tag: &str,
        model: &UdaModel<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        let what = format!("checkpoint {tag}");
        self.retry
            .run(&what, || self.write_once(tag, model, metadata))
            .map_err(|e| match e {
                Error::Checkpoint(_) => e,
                other => Error::Checkpoint(other.to_string()),
            })?;
        info!("Checkpoint {} saved to {:?}", tag, self.dir);

        if epoch_from_tag(tag).is_some() {
            self.cleanup_old_checkpoints()?;
        }
        Ok(())
    }

    fn load<B: Backend>(
        &self,
        tag: &str,
        template: UdaModel<B>,
        device: &B::Device,
    ) -> Result<UdaModel<B>> {
        if !self.exists(tag) {
            return Err(Error::NotFound(format!(
                "checkpoint {tag} in {:?}",
                self.dir
            )));
        }
        let model = template
            .load_file(self.record_path(tag), &CompactRecorder::new(), device)
            .map_err(|e| Error::Checkpoint(format!("failed to load checkpoint {tag}: {e:?}")))?;
        info!("Checkpoint {} loaded from {:?}", tag, self.dir);
        Ok(model)
    }

    fn metadata(&self, tag: &str) -> Result<CheckpointMetadata> {
        let path = self.metadata_path(tag);
        if !path.exists() {
            return Err(Error::NotFound(format!("checkpoint metadata {path:?}")));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
