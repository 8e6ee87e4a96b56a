//! Signal segmentation and amplitude normalization.
//!
//! Raw recordings are cut into fixed-length windows with a sliding stride
//! and each window is normalized independently.

use serde::{Deserialize, Serialize};
use uda_core::{DataConfig, DomainKind, Error, Normalization, Result};

use crate::window::SignalWindow;

/// Configuration for window extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Window length in samples
    pub signal_size: usize,
    /// Offset between consecutive window starts
    pub stride: usize,
    /// Per-window normalization
    pub normalization: Normalization,
    /// Cap on windows taken from one recording
    pub max_windows: Option<usize>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            signal_size: 2048,
            stride: 2048,
            normalization: Normalization::MeanStd,
            max_windows: None,
        }
    }
}

impl From<&DataConfig> for PreprocessConfig {
    fn from(config: &DataConfig) -> Self {
        Self {
            signal_size: config.signal_size,
            stride: config.stride(),
            normalization: config.normalization,
            max_windows: config.max_windows_per_class,
        }
    }
}

/// Turns raw recordings into normalized windows
#[derive(Debug, Clone)]
pub struct SignalPreprocessor {
    config: PreprocessConfig,
}

impl SignalPreprocessor {
    /// Creates a preprocessor, rejecting zero sizes
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        if config.signal_size == 0 || config.stride == 0 {
            return Err(Error::Configuration(
                "signal_size and stride must be positive".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// The active configuration
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Number of windows a recording of `len` samples yields
    pub fn window_count(&self, len: usize) -> usize {
        let size = self.config.signal_size;
        let count = if len < size {
            0
        } else {
            (len - size) / self.config.stride + 1
        };
        self.config.max_windows.map_or(count, |max| count.min(max))
    }

    /// Cuts a recording into labeled, normalized windows
    pub fn segment(&self, signal: &[f32], label: usize, domain: DomainKind) -> Vec<SignalWindow> {
        let size = self.config.signal_size;
        (0..self.window_count(signal.len()))
            .map(|i| {
                let start = i * self.config.stride;
                let mut values = signal[start..start + size].to_vec();
                normalize(&mut values, self.config.normalization);
                SignalWindow::labeled(values, label, domain)
            })
            .collect()
    }
}

/// Normalizes a window in place. Constant windows become all zeros.
pub fn normalize(values: &mut [f32], method: Normalization) {
    if values.is_empty() {
        return;
    }
    match method {
        Normalization::None => {}
        Normalization::MeanStd => {
            let n = values.len() as f64;
            let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = values
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / n;
            let std = var.sqrt();
            for v in values.iter_mut() {
                *v = if std > f64::EPSILON {
                    ((*v as f64 - mean) / std) as f32
                } else {
                    0.0
                };
            }
        }
        Normalization::ZeroOne | Normalization::MinusOneOne => {
            let (min, max) = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let range = max - min;
            for v in values.iter_mut() {
                let unit = if range > f32::EPSILON {
                    (*v - min) / range
                } else {
                    0.0
                };
                *v = match method {
                    Normalization::MinusOneOne if range > f32::EPSILON => 2.0 * unit - 1.0,
                    _ => unit,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor(size: usize, stride: usize, normalization: Normalization) -> SignalPreprocessor {
        SignalPreprocessor::new(PreprocessConfig {
            signal_size: size,
            stride,
            normalization,
            max_windows: None,
        })
        .unwrap()
    }

    #[test]
    fn test_window_count() {
        let p = preprocessor(4, 2, Normalization::None);
        assert_eq!(p.window_count(3), 0);
        assert_eq!(p.window_count(4), 1);
        assert_eq!(p.window_count(9), 3);
        assert_eq!(p.window_count(10), 4);
    }

    #[test]
    fn test_segment_overlapping() {
        let p = preprocessor(3, 2, Normalization::None);
        let signal: Vec<f32> = (0..7).map(|v| v as f32).collect();
        let windows = p.segment(&signal, 2, DomainKind::Source);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].values, vec![2.0, 3.0, 4.0]);
        assert!(windows.iter().all(|w| w.label == Some(2)));
    }

    #[test]
    fn test_max_windows_cap() {
        let p = SignalPreprocessor::new(PreprocessConfig {
            signal_size: 2,
            stride: 2,
            normalization: Normalization::None,
            max_windows: Some(2),
        })
        .unwrap();
        assert_eq!(p.window_count(100), 2);
    }

    #[test]
    fn test_mean_std() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        normalize(&mut values, Normalization::MeanStd);
        let mean: f32 = values.iter().sum::<f32>() / 4.0;
        let var: f32 = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_min_max_ranges() {
        let mut unit = vec![-2.0, 0.0, 2.0];
        normalize(&mut unit, Normalization::ZeroOne);
        assert_eq!(unit, vec![0.0, 0.5, 1.0]);

        let mut symmetric = vec![-2.0, 0.0, 2.0];
        normalize(&mut symmetric, Normalization::MinusOneOne);
        assert_eq!(symmetric, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_constant_window_is_finite() {
        for method in [
            Normalization::MeanStd,
            Normalization::ZeroOne,
            Normalization::MinusOneOne,
        ] {
            let mut values = vec![3.0; 8];
            normalize(&mut values, method);
            assert!(values.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_zero_stride_rejected() {
        assert!(SignalPreprocessor::new(PreprocessConfig {
            stride: 0,
            ..PreprocessConfig::default()
        })
        .is_err());
    }
}
