//! Stratified train/evaluation split of a labeled store.
//!
//! Each class contributes `round(n * test_fraction)` windows to the
//! evaluation part, clamped so that classes with at least two windows keep
//! at least one on each side. The split is deterministic for a given seed.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use uda_core::{Error, Result};

use crate::store::SampleStore;

/// Result of a stratified split
#[derive(Debug, Clone)]
pub struct StratifiedSplit {
    /// Windows used for training
    pub train: SampleStore,
    /// Held-out windows used for evaluation
    pub test: SampleStore,
}

/// Splits `store` per class into training and held-out parts
pub fn stratified_split(store: &SampleStore, test_fraction: f64, seed: u64) -> Result<StratifiedSplit> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(Error::Configuration(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    if !store.is_fully_labeled() {
        return Err(Error::Dataset(
            "stratified split needs every window labeled".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for mut indices in store.class_indices() {
        let n = indices.len();
        if n == 0 {
            continue;
        }
        indices.shuffle(&mut rng);
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    debug!(train = train.len(), test = test.len(), "Stratified split");

    Ok(StratifiedSplit {
        train: store.subset(&train)?,
        test: store.subset(&test)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::SignalWindow;
    use uda_core::DomainKind;

    fn store(counts: &[usize]) -> SampleStore {
        let mut windows = Vec::new();
        for (label, &count) in counts.iter().enumerate() {
            for i in 0..count {
                windows.push(SignalWindow::labeled(
                    vec![(label * 1000 + i) as f32; 2],
                    label,
                    DomainKind::Target,
                ));
            }
        }
        SampleStore::from_windows(DomainKind::Target, counts.len(), windows).unwrap()
    }

    #[test]
    fn test_split_is_stratified() {
        let split = stratified_split(&store(&[100, 50, 10]), 0.2, 1).unwrap();
        assert_eq!(split.test.class_counts(), vec![20, 10, 2]);
        assert_eq!(split.train.class_counts(), vec![80, 40, 8]);
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let original = store(&[30, 30]);
        let split = stratified_split(&original, 0.25, 5).unwrap();
        let mut all: Vec<f32> = split
            .train
            .iter()
            .chain(split.test.iter())
            .map(|w| w.values[0])
            .collect();
        all.sort_by(|a, b| a.partial_cmp(b).unwrap());
        all.dedup();
        assert_eq!(all.len(), 60);
    }

    #[test]
    fn test_tiny_classes_keep_training_windows() {
        let split = stratified_split(&store(&[1, 2]), 0.9, 0).unwrap();
        assert_eq!(split.train.class_counts(), vec![1, 1]);
        assert_eq!(split.test.class_counts(), vec![0, 1]);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(stratified_split(&store(&[4]), 1.0, 0).is_err());
        assert!(stratified_split(&store(&[4]), 0.0, 0).is_err());
    }
}
