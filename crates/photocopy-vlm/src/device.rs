use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device};

/// The compute device a model should run on, as written in the configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceHint {
    /// Run on the CPU.
    #[default]
    Cpu,
    /// Run on the first CUDA device, if the crate was built with `cuda`.
    Cuda,
    /// Run on the first Metal device, if the crate was built with `metal`.
    /// Accepts `mps` as an alias.
    Metal,
}

impl FromStr for DeviceHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "mps" | "metal" => Ok(Self::Metal),
            other => Err(format!("unknown device hint: {other}")),
        }
    }
}

impl fmt::Display for DeviceHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

impl DeviceHint {
    /// Parse a configured hint, falling back to the CPU for unknown values.
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            log::warn!("{e}, defaulting to CPU");
            Self::Cpu
        })
    }

    /// Resolve the hint to a candle device and the dtype to load weights with.
    ///
    /// Accelerators that are not compiled in or not present fall back to the CPU.
    pub fn resolve(self) -> (Device, DType) {
        let accelerated = match self {
            Self::Cpu => return (Device::Cpu, DType::F32),
            Self::Cuda => Device::cuda_if_available(0),
            Self::Metal => Device::metal_if_available(0),
        };

        match accelerated {
            Ok(Device::Cpu) => {
                log::warn!("{self} not available, defaulting to CPU");
                (Device::Cpu, DType::F32)
            }
            Ok(device) => (device, DType::F16),
            Err(e) => {
                log::warn!("{self} not available, defaulting to CPU: {e}");
                (Device::Cpu, DType::F32)
            }
        }
    }
}

/// Short human readable name of a candle device.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
