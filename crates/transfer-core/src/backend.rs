//! Compute device selection.
//!
//! The device is picked once at startup. Asking for an accelerator that is
//! not compiled in or not present is a [`Error::Device`], which
//! [`resolve_device`] recovers from by falling back to the CPU.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Device type for backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    /// CPU backend
    #[default]
    Cpu,
    /// CUDA device with the given ordinal
    Gpu(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Check that GPU `index` can be used by this build.
pub fn probe_gpu(index: usize, gpu_compiled: bool) -> Result<Device> {
    if !gpu_compiled {
        return Err(Error::Device(
            "GPU requested but this build has no accelerated backend (enable the `cuda` feature)"
                .into(),
        ));
    }
    if !is_gpu_available() {
        return Err(Error::Device("GPU requested but no CUDA device was detected".into()));
    }
    Ok(Device::Gpu(index))
}

/// Pick the device for the run, falling back to the CPU when the
/// accelerator cannot be used.
pub fn resolve_device(prefer_gpu: bool, gpu_compiled: bool) -> Device {
    let device = if prefer_gpu {
        probe_gpu(0, gpu_compiled).unwrap_or_else(|err| {
            warn!("{err} - falling back to CPU");
            Device::Cpu
        })
    } else {
        Device::Cpu
    };

    info!("Using device: {}", device);
    device
}

/// Check if a CUDA capable GPU is visible
pub fn is_gpu_available() -> bool {
    #[cfg(any(target_os = "linux", target_os = "windows"))]
    {
        if std::env::var("CUDA_VISIBLE_DEVICES").is_ok_and(|v| v.trim().is_empty() || v == "-1") {
            return false;
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        assert_eq!(Device::Gpu(0).to_string(), "GPU:0");
    }

    #[test]
    fn test_cpu_when_gpu_not_requested() {
        assert_eq!(resolve_device(false, true), Device::Cpu);
    }

    #[test]
    fn test_missing_backend_is_device_error() {
        let err = probe_gpu(0, false).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_gpu_request_falls_back_without_backend() {
        assert_eq!(resolve_device(true, false), Device::Cpu);
    }

    #[test]
    fn test_gpu_request_yields_valid_device() {
        let device = resolve_device(true, true);
        assert!(matches!(device, Device::Cpu | Device::Gpu(0)));
    }
}
