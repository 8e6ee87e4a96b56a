//! Signal window storage, imbalance shaping and paired batch sampling.
//!
//! This crate turns raw vibration recordings into per-domain
//! [`SampleStore`]s, reduces the target domain to a configurable class
//! imbalance and draws synchronized source/target index batches for the
//! training loop.

pub mod batcher;
pub mod imbalance;
pub mod loader;
pub mod preprocess;
pub mod sampler;
pub mod split;
pub mod store;
pub mod synthetic;
pub mod window;

pub use batcher::{WindowBatch, WindowBatcher};
pub use imbalance::{apply_imbalance, class_ranking, imbalanced_counts};
pub use loader::{load_source_store, DatasetLoader, SignalDirectoryLoader};
pub use preprocess::{normalize, PreprocessConfig, SignalPreprocessor};
pub use sampler::{check_class_sizes, BatchPairSampler, EpochBatches, IndexBatchPair};
pub use split::{stratified_split, StratifiedSplit};
pub use store::SampleStore;
pub use synthetic::{SyntheticBearingLoader, SyntheticConfig};
pub use window::SignalWindow;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batcher::*;
    pub use crate::imbalance::*;
    pub use crate::loader::*;
    pub use crate::preprocess::*;
    pub use crate::sampler::*;
    pub use crate::split::*;
    pub use crate::store::*;
    pub use crate::synthetic::*;
    pub use crate::window::*;
}
