//! Compute device selection.
//!
//! The concrete Burn backend is fixed at compile time by the binary's
//! features; this module resolves which device index a run asks for and
//! whether that request can be honoured on this machine.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::{Error, Result};

/// Device type for backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Device {
    /// CPU backend
    #[default]
    Cpu,
    /// CUDA device with the given ordinal
    Gpu(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Preferred device
    pub device: Device,
    /// Use the CPU when the requested GPU is missing instead of failing
    pub fallback_to_cpu: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            fallback_to_cpu: true,
        }
    }
}

static BACKEND_INFO: OnceLock<String> = OnceLock::new();

/// Resolve the requested device, logging the outcome.
pub fn init_backend(config: &BackendConfig) -> Result<Device> {
    let device = match config.device {
        Device::Cpu => Device::Cpu,
        Device::Gpu(id) if is_gpu_available() => {
            info!(device_id = id, "GPU detected");
            Device::Gpu(id)
        }
        Device::Gpu(id) if config.fallback_to_cpu => {
            warn!(device_id = id, "GPU requested but not available, falling back to CPU");
            Device::Cpu
        }
        Device::Gpu(id) => {
            return Err(Error::Device(format!(
                "GPU {id} requested but no CUDA device was found"
            )));
        }
    };

    let _ = BACKEND_INFO.set(format!("Using device: {}", device));
    info!(%device, "Compute backend initialized");

    Ok(device)
}

/// Check if a CUDA-capable GPU is visible
pub fn is_gpu_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || nvidia_smi_succeeds("nvidia-smi")
    }

    #[cfg(target_os = "windows")]
    {
        nvidia_smi_succeeds("nvidia-smi.exe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn nvidia_smi_succeeds(program: &str) -> bool {
    std::process::Command::new(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get information about the current backend
pub fn backend_info() -> String {
    BACKEND_INFO
        .get()
        .cloned()
        .unwrap_or_else(|| "Backend not initialized".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert_eq!(config.device, Device::Cpu);
        assert!(config.fallback_to_cpu);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        assert_eq!(Device::Gpu(0).to_string(), "GPU:0");
        assert_eq!(Device::Gpu(1).to_string(), "GPU:1");
    }

    #[test]
    fn test_init_backend_cpu() {
        let device = init_backend(&BackendConfig::default()).unwrap();
        assert_eq!(device, Device::Cpu);
        assert!(!backend_info().is_empty());
    }

    #[test]
    fn test_gpu_request_resolves_or_falls_back() {
        let config = BackendConfig {
            device: Device::Gpu(0),
            fallback_to_cpu: true,
        };
        let device = init_backend(&config).unwrap();
        assert!(matches!(device, Device::Cpu | Device::Gpu(0)));
    }

    #[test]
    fn test_gpu_request_without_fallback() {
        let config = BackendConfig {
            device: Device::Gpu(0),
            fallback_to_cpu: false,
        };
        match init_backend(&config) {
            Ok(device) => assert_eq!(device, Device::Gpu(0)),
            Err(err) => assert!(matches!(err, Error::Device(_))),
        }
    }
}
