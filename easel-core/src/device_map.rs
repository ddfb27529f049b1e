use std::fmt;
use std::str::FromStr;

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Which device the operator asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    /// Any accelerator at the given ordinal, CUDA first then Metal.
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::ForceCpu
    }
}

impl FromStr for DeviceMap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (name, ordinal) = match s.split_once(':') {
            Some((name, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| format!("invalid device ordinal in '{s}'"))?;
                (name, ordinal)
            }
            None => (s.as_str(), 0),
        };
        match name {
            "cpu" => Ok(Self::ForceCpu),
            "cuda" | "gpu" | "metal" | "mps" => Ok(Self::Ordinal(ordinal)),
            _ => Err(format!("unknown device '{s}'")),
        }
    }
}

impl DeviceMap {
    /// Like `parse`, but an unrecognized identifier binds to the CPU.
    pub fn parse_or_cpu(s: &str) -> Self {
        s.parse().unwrap_or_else(|e: String| {
            warn!(error = %e, "unrecognized device, running on CPU");
            Self::ForceCpu
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Metal,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serde_plain::to_string(self).map_err(|_| fmt::Error)?)
    }
}

/// The execution device chosen at startup together with its precision.
#[derive(Clone, Debug)]
pub struct DeviceContext {
    pub device: Device,
    pub dtype: DType,
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl DeviceContext {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
            kind: DeviceKind::Cpu,
            ordinal: 0,
        }
    }

    fn accelerated(device: Device, kind: DeviceKind, ordinal: usize) -> Self {
        Self {
            device,
            dtype: DType::F16,
            kind,
            ordinal,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.kind != DeviceKind::Cpu
    }

    pub fn info(&self) -> DeviceInfo {
        let device = match self.kind {
            DeviceKind::Cpu => "cpu".to_string(),
            kind => format!("{kind}:{}", self.ordinal),
        };
        DeviceInfo {
            device,
            device_type: self.kind,
            dtype: self.dtype.as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device: String,
    pub device_type: DeviceKind,
    pub dtype: String,
}

/// Picks the device for `device_map`. Never fails: any problem while bringing
/// up an accelerator degrades to the CPU.
pub fn select_best_device(device_map: DeviceMap) -> DeviceContext {
    match try_accelerator(device_map) {
        Ok(Some(context)) => {
            enable_fast_math(&context);
            info!(device = %context.info().device, "using accelerator");
            context
        }
        Ok(None) => {
            if let DeviceMap::Ordinal(_) = device_map {
                #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
                {
                    warn!("accelerator requested but unavailable, running on CPU (this will be slower); build with `--features metal`");
                }
                #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
                {
                    warn!("accelerator requested but unavailable, running on CPU (this will be slower); build with `--features cuda`");
                }
            } else {
                info!("using CPU as requested");
            }
            DeviceContext::cpu()
        }
        Err(e) => {
            error!(error = %e, "error setting up device, defaulting to CPU");
            DeviceContext::cpu()
        }
    }
}

fn try_accelerator(device_map: DeviceMap) -> candle_core::Result<Option<DeviceContext>> {
    match device_map {
        DeviceMap::ForceCpu => Ok(None),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Some(DeviceContext::accelerated(
            Device::new_cuda(ordinal)?,
            DeviceKind::Cuda,
            ordinal,
        ))),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Some(DeviceContext::accelerated(
            Device::new_metal(ordinal)?,
            DeviceKind::Metal,
            ordinal,
        ))),
        DeviceMap::Ordinal(_) => Ok(None),
    }
}

#[allow(unused_variables)]
fn enable_fast_math(context: &DeviceContext) {
    #[cfg(feature = "cuda")]
    {
        if context.kind == DeviceKind::Cuda {
            candle_core::cuda::set_gemm_reduced_precision_f16(true);
        }
    }
}
