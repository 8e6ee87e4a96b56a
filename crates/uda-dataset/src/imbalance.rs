//! Progressive class-frequency decay for the target domain.
//!
//! Classes are ranked by their original count (largest first, ties broken
//! by the smaller label). The class at rank `k` keeps
//! `round(majority * ratio^k)` windows, never more than it has. The
//! majority class is therefore unaffected and counts never increase with
//! rank.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use uda_core::{validate_imbalance_ratio, Error, Result};

use crate::store::SampleStore;

/// Labels of present classes ordered by rank (majority first)
pub fn class_ranking(counts: &[usize]) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] > 0).collect();
    labels.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
    labels
}

/// Per-class counts after applying `ratio`; absent classes stay at zero
pub fn imbalanced_counts(counts: &[usize], ratio: f64) -> Result<Vec<usize>> {
    validate_imbalance_ratio(ratio)?;

    let ranking = class_ranking(counts);
    let Some(&majority_label) = ranking.first() else {
        return Err(Error::Dataset(
            "cannot apply imbalance to a store without labeled windows".to_string(),
        ));
    };
    let majority = counts[majority_label] as f64;

    let mut result = vec![0usize; counts.len()];
    for (rank, &label) in ranking.iter().enumerate() {
        let wanted = (majority * ratio.powi(rank as i32)).round() as usize;
        if wanted == 0 {
            return Err(Error::Configuration(format!(
                "imbalance ratio {ratio} leaves class {label} (rank {rank}) with no windows"
            )));
        }
        result[label] = wanted.min(counts[label]);
    }
    Ok(result)
}

/// Returns a store reduced to the imbalanced per-class counts.
///
/// Kept windows are a seeded random choice within each class and retain
/// their original store order.
pub fn apply_imbalance(store: &SampleStore, ratio: f64, seed: u64) -> Result<SampleStore> {
    if !store.is_fully_labeled() {
        return Err(Error::Dataset(
            "imbalance needs class labels; apply it before hiding them".to_string(),
        ));
    }

    let counts = store.class_counts();
    let targets = imbalanced_counts(&counts, ratio)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut kept = Vec::with_capacity(targets.iter().sum());
    for (label, mut indices) in store.class_indices().into_iter().enumerate() {
        indices.shuffle(&mut rng);
        kept.extend(indices.into_iter().take(targets[label]));
    }
    kept.sort_unstable();

    info!(
        ratio,
        before = ?counts,
        after = ?targets,
        "Applied class imbalance"
    );

    store.subset(&kept)
}
