//! Compute device resolution.
//!
//! Resolution is a pure function of the request and the probed capabilities, so the
//! fallback table can be tested without any GPU present.

use crate::config::DeviceRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device a search actually runs on. `Mps` is Apple Metal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Mps,
    Cpu,
}

impl ComputeDevice {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the compute runtime can offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    pub cuda: bool,
    pub mps: bool,
}

impl DeviceCapabilities {
    #[must_use]
    pub const fn cpu_only() -> Self {
        Self {
            cuda: false,
            mps: false,
        }
    }

    /// Probe the runtime. Called once per operation, never cached.
    #[must_use]
    pub fn detect() -> Self {
        let caps = Self {
            cuda: cuda_available(),
            mps: metal_available(),
        };
        log::debug!("Detected compute capabilities: {caps:?}");
        caps
    }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    candle_core::Device::new_cuda(0).is_ok()
}

#[cfg(not(feature = "cuda"))]
const fn cuda_available() -> bool {
    false
}

#[cfg(feature = "metal")]
fn metal_available() -> bool {
    candle_core::Device::new_metal(0).is_ok()
}

#[cfg(not(feature = "metal"))]
const fn metal_available() -> bool {
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResolution {
    pub requested: DeviceRequest,
    pub device: ComputeDevice,
    /// An explicit GPU request could not be honoured and the call runs on CPU instead.
    pub degraded: bool,
}

#[must_use]
pub fn resolve_device(requested: DeviceRequest, caps: DeviceCapabilities) -> DeviceResolution {
    let (device, degraded) = match requested {
        DeviceRequest::Auto if caps.cuda => (ComputeDevice::Cuda, false),
        DeviceRequest::Auto if caps.mps => (ComputeDevice::Mps, false),
        DeviceRequest::Auto | DeviceRequest::Cpu => (ComputeDevice::Cpu, false),
        DeviceRequest::Cuda if caps.cuda => (ComputeDevice::Cuda, false),
        DeviceRequest::Mps if caps.mps => (ComputeDevice::Mps, false),
        DeviceRequest::Cuda | DeviceRequest::Mps => (ComputeDevice::Cpu, true),
    };
    DeviceResolution {
        requested,
        device,
        degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ALL: DeviceCapabilities = DeviceCapabilities {
        cuda: true,
        mps: true,
    };
    const MPS_ONLY: DeviceCapabilities = DeviceCapabilities {
        cuda: false,
        mps: true,
    };

    #[test]
    fn auto_prefers_cuda_then_mps_then_cpu() {
        assert_eq!(resolve_device(DeviceRequest::Auto, ALL).device, ComputeDevice::Cuda);
        assert_eq!(
            resolve_device(DeviceRequest::Auto, MPS_ONLY).device,
            ComputeDevice::Mps
        );
        let cpu = resolve_device(DeviceRequest::Auto, DeviceCapabilities::cpu_only());
        assert_eq!(cpu.device, ComputeDevice::Cpu);
        assert!(!cpu.degraded);
    }

    #[test]
    fn explicit_unavailable_request_degrades_to_cpu() {
        let cuda = resolve_device(DeviceRequest::Cuda, MPS_ONLY);
        assert_eq!(cuda.device, ComputeDevice::Cpu);
        assert!(cuda.degraded);
        assert_eq!(cuda.requested, DeviceRequest::Cuda);

        let mps = resolve_device(DeviceRequest::Mps, DeviceCapabilities::cpu_only());
        assert_eq!(mps.device, ComputeDevice::Cpu);
        assert!(mps.degraded);
    }

    #[test]
    fn explicit_cpu_is_never_degraded() {
        let cpu = resolve_device(DeviceRequest::Cpu, ALL);
        assert_eq!(cpu.device, ComputeDevice::Cpu);
        assert!(!cpu.degraded);
    }

    #[test]
    fn explicit_available_request_is_honoured() {
        assert_eq!(resolve_device(DeviceRequest::Mps, ALL).device, ComputeDevice::Mps);
        assert_eq!(resolve_device(DeviceRequest::Cuda, ALL).device, ComputeDevice::Cuda);
    }
}
