//! Compute backend selection
//!
//! The backend is chosen once at startup and turned into a candle [`Device`].
//! Nothing below the model constructor branches on it again.

use crate::config::ConfigError;
use anyhow::{Context, Result};
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which compute backend tensors are allocated on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    /// Host CPU
    #[default]
    Cpu,
    /// First CUDA device (requires candle's `cuda` feature)
    Cuda,
    /// First Metal device (requires candle's `metal` feature)
    Metal,
    /// Best accelerator compiled in, falling back to the CPU
    Auto,
}

impl ComputeBackend {
    /// Resolve the backend into a device
    pub fn resolve(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Device::new_cuda(0).context("Failed to open CUDA device 0"),
            Self::Metal => Device::new_metal(0).context("Failed to open Metal device 0"),
            Self::Auto => {
                if cuda_is_available() {
                    Device::new_cuda(0).context("Failed to open CUDA device 0")
                } else if metal_is_available() {
                    Device::new_metal(0).context("Failed to open Metal device 0")
                } else {
                    Ok(Device::Cpu)
                }
            }
        }
    }
}

impl FromStr for ComputeBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "metal" | "mps" => Ok(Self::Metal),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}
