//! In-memory collection of signal windows for one domain.
//!
//! The store is the unit the sampler, the imbalance shaper and the
//! evaluator operate on. It implements Burn's `Dataset` so it can back a
//! `DataLoader` as well.

use burn::data::dataset::Dataset;
use tracing::debug;
use uda_core::{DomainKind, Error, Result};

use crate::window::SignalWindow;

/// Ordered windows of a single domain, indexable and groupable by class
#[derive(Debug, Clone)]
pub struct SampleStore {
    domain: DomainKind,
    num_classes: usize,
    window_len: Option<usize>,
    windows: Vec<SignalWindow>,
}

impl SampleStore {
    /// Creates an empty store
    pub fn new(domain: DomainKind, num_classes: usize) -> Self {
        Self {
            domain,
            num_classes,
            window_len: None,
            windows: Vec::new(),
        }
    }

    /// Builds a store from windows, checking length, label range and domain
    pub fn from_windows(
        domain: DomainKind,
        num_classes: usize,
        windows: Vec<SignalWindow>,
    ) -> Result<Self> {
        let mut store = Self::new(domain, num_classes);
        store.windows.reserve(windows.len());
        for window in windows {
            store.push(window)?;
        }
        Ok(store)
    }

    /// Appends a window
    pub fn push(&mut self, window: SignalWindow) -> Result<()> {
        if window.domain != self.domain {
            return Err(Error::Dataset(format!(
                "cannot add a {} window to a {} store",
                window.domain, self.domain
            )));
        }
        if window.is_empty() {
            return Err(Error::Dataset("empty signal window".to_string()));
        }
        match self.window_len {
            Some(expected) if expected != window.len() => {
                return Err(Error::dimension_mismatch(
                    "signal window length",
                    expected,
                    window.len(),
                ));
            }
            None => self.window_len = Some(window.len()),
            _ => {}
        }
        if let Some(label) = window.label {
            if label >= self.num_classes {
                return Err(Error::Dataset(format!(
                    "label {label} out of range for {} classes",
                    self.num_classes
                )));
            }
        }
        self.windows.push(window);
        Ok(())
    }

    /// Domain of every window in the store
    pub fn domain(&self) -> DomainKind {
        self.domain
    }

    /// Number of fault classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Common window length, `None` while empty
    pub fn window_len(&self) -> Option<usize> {
        self.window_len
    }

    /// Number of windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Borrow a window
    pub fn window(&self, index: usize) -> Option<&SignalWindow> {
        self.windows.get(index)
    }

    /// Iterate over windows
    pub fn iter(&self) -> impl Iterator<Item = &SignalWindow> {
        self.windows.iter()
    }

    /// Windows per class; unlabeled windows are not counted
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes];
        for label in self.windows.iter().filter_map(|w| w.label) {
            counts[label] += 1;
        }
        counts
    }

    /// Window indices grouped by class, each group in store order
    pub fn class_indices(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.num_classes];
        for (index, window) in self.windows.iter().enumerate() {
            if let Some(label) = window.label {
                groups[label].push(index);
            }
        }
        groups
    }

    /// Whether every window carries a label
    pub fn is_fully_labeled(&self) -> bool {
        self.windows.iter().all(|w| w.label.is_some())
    }

    /// New store holding the given windows in the given order
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let mut store = Self::new(self.domain, self.num_classes);
        for &index in indices {
            let window = self.windows.get(index).ok_or_else(|| {
                Error::Dataset(format!(
                    "index {index} out of range for store of {}",
                    self.len()
                ))
            })?;
            store.push(window.clone())?;
        }
        Ok(store)
    }

    /// Copy with every label removed
    pub fn without_labels(&self) -> Self {
        Self {
            domain: self.domain,
            num_classes: self.num_classes,
            window_len: self.window_len,
            windows: self
                .windows
                .iter()
                .cloned()
                .map(SignalWindow::without_label)
                .collect(),
        }
    }

    /// Appends every window of `other`
    pub fn extend_from(&mut self, other: &SampleStore) -> Result<()> {
        if other.num_classes != self.num_classes {
            return Err(Error::dimension_mismatch(
                "class count when combining stores",
                self.num_classes,
                other.num_classes,
            ));
        }
        for window in other.iter() {
            self.push(window.clone())?;
        }
        Ok(())
    }

    /// Concatenates stores of the same domain in order
    pub fn concat(stores: Vec<SampleStore>) -> Result<Self> {
        let mut iter = stores.into_iter();
        let mut combined = iter
            .next()
            .ok_or_else(|| Error::Dataset("no stores to combine".to_string()))?;
        for store in iter {
            combined.extend_from(&store)?;
        }
        debug!(
            windows = combined.len(),
            domain = %combined.domain,
            "Combined stores"
        );
        Ok(combined)
    }
}

impl Dataset<SignalWindow> for SampleStore {
    fn get(&self, index: usize) -> Option<SignalWindow> {
        self.windows.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(label: usize, len: usize) -> SignalWindow {
        SignalWindow::labeled(vec![label as f32; len], label, DomainKind::Source)
    }

    #[test]
    fn test_push_and_counts() {
        let store = SampleStore::from_windows(
            DomainKind::Source,
            3,
            vec![window(0, 8), window(2, 8), window(2, 8)],
        )
        .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.window_len(), Some(8));
        assert_eq!(store.class_counts(), vec![1, 0, 2]);
        assert_eq!(store.class_indices()[2], vec![1, 2]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result =
            SampleStore::from_windows(DomainKind::Source, 3, vec![window(0, 8), window(1, 4)]);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_label_out_of_range_rejected() {
        let result = SampleStore::from_windows(DomainKind::Source, 2, vec![window(5, 8)]);
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    #[test]
    fn test_domain_mismatch_rejected() {
        let mut store = SampleStore::new(DomainKind::Target, 2);
        assert!(store.push(window(0, 8)).is_err());
    }

    #[test]
    fn test_without_labels() {
        let store =
            SampleStore::from_windows(DomainKind::Source, 2, vec![window(0, 4), window(1, 4)])
                .unwrap();
        let hidden = store.without_labels();
        assert_eq!(hidden.len(), 2);
        assert!(hidden.iter().all(|w| w.label.is_none()));
        assert_eq!(hidden.class_counts(), vec![0, 0]);
        assert!(!hidden.is_fully_labeled());
    }

    #[test]
    fn test_subset_and_concat() {
        let store = SampleStore::from_windows(
            DomainKind::Source,
            2,
            vec![window(0, 4), window(1, 4), window(1, 4)],
        )
        .unwrap();
        let a = store.subset(&[2, 0]).unwrap();
        assert_eq!(a.window(0).unwrap().label, Some(1));

        let combined = SampleStore::concat(vec![a, store.clone()]).unwrap();
        assert_eq!(combined.len(), 5);
        assert_eq!(combined.class_counts(), vec![2, 3]);
        assert!(store.subset(&[9]).is_err());
    }

    #[test]
    fn test_dataset_trait() {
        let store =
            SampleStore::from_windows(DomainKind::Source, 2, vec![window(1, 4)]).unwrap();
        assert_eq!(Dataset::len(&store), 1);
        assert_eq!(Dataset::get(&store, 0).unwrap().label, Some(1));
        assert!(Dataset::get(&store, 1).is_none());
    }
}
