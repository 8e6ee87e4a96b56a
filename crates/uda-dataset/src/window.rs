//! A single fixed-length vibration segment.

use serde::{Deserialize, Serialize};
use uda_core::DomainKind;

/// One preprocessed sensor window with its class label and domain tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWindow {
    /// Normalized amplitudes
    pub values: Vec<f32>,
    /// Fault class, `None` once hidden from training
    pub label: Option<usize>,
    /// Which domain the window was recorded in
    pub domain: DomainKind,
}

impl SignalWindow {
    /// Creates a labeled window
    pub fn labeled(values: Vec<f32>, label: usize, domain: DomainKind) -> Self {
        Self {
            values,
            label: Some(label),
            domain,
        }
    }

    /// Creates an unlabeled window
    pub fn unlabeled(values: Vec<f32>, domain: DomainKind) -> Self {
        Self {
            values,
            label: None,
            domain,
        }
    }

    /// Window length in samples
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the window holds no samples
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops the label
    pub fn without_label(mut self) -> Self {
        self.label = None;
        self
    }
}
