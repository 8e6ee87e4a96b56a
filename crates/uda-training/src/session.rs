//! Scoped ownership of the compute device for one training run.

use burn::tensor::backend::Backend;
use std::time::Instant;
use tracing::info;

/// Holds the device for the lifetime of a run. Acquiring seeds the backend
/// RNG; dropping the handle logs the release on every exit path.
#[derive(Debug)]
pub struct ComputeSession<B: Backend> {
    device: B::Device,
    label: String,
    acquired_at: Instant,
}

impl<B: Backend> ComputeSession<B> {
    pub fn acquire(device: B::Device, seed: u64, label: impl Into<String>) -> Self {
        let label = label.into();
        B::seed(seed);
        info!("Compute session '{}' acquired {:?} (seed {})", label, device, seed);
        Self {
            device,
            label,
            acquired_at: Instant::now(),
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

impl<B: Backend> Drop for ComputeSession<B> {
    fn drop(&mut self) {
        info!(
            "Compute session '{}' released after {:.1}s",
            self.label,
            self.acquired_at.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn test_session_exposes_device() {
        let session = ComputeSession::<NdArray>::acquire(Default::default(), 7, "test");
        assert_eq!(session.device(), &Default::default());
    }
}
