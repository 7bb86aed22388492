//! Execution locus descriptors.

use std::fmt;
use std::str::FromStr;

use crate::error::{ArrayError, ArrayResult};

/// Device family, numbered like DLPack's `DLDeviceType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    CudaHost,
    OpenCl,
    Vulkan,
    Metal,
    Vpi,
    Rocm,
    RocmHost,
    ExtDev,
    CudaManaged,
    OneApi,
    WebGpu,
    Hexagon,
}

const KIND_TABLE: &[(DeviceKind, i32, &str)] = &[
    (DeviceKind::Cpu, 1, "cpu"),
    (DeviceKind::Cuda, 2, "cuda"),
    (DeviceKind::CudaHost, 3, "cuda_host"),
    (DeviceKind::OpenCl, 4, "opencl"),
    (DeviceKind::Vulkan, 7, "vulkan"),
    (DeviceKind::Metal, 8, "metal"),
    (DeviceKind::Vpi, 9, "vpi"),
    (DeviceKind::Rocm, 10, "rocm"),
    (DeviceKind::RocmHost, 11, "rocm_host"),
    (DeviceKind::ExtDev, 12, "ext_dev"),
    (DeviceKind::CudaManaged, 13, "cuda_managed"),
    (DeviceKind::OneApi, 14, "oneapi"),
    (DeviceKind::WebGpu, 15, "webgpu"),
    (DeviceKind::Hexagon, 16, "hexagon"),
];

impl DeviceKind {
    /// Returns the DLPack device-type code.
    pub fn tag(self) -> i32 {
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, tag, _)| *tag)
            .unwrap_or(1)
    }

    /// Inverse of [`DeviceKind::tag`]; unknown tags give `None`.
    pub fn from_tag(tag: i32) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, t, _)| *t == tag)
            .map(|(kind, _, _)| *kind)
    }

    /// Lowercase name used in device descriptors.
    pub fn name(self) -> &'static str {
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("cpu")
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = match name {
            "gpu" => "cuda",
            "rocm" | "hip" => "rocm",
            other => other,
        };
        KIND_TABLE
            .iter()
            .find(|(_, _, n)| *n == name)
            .map(|(kind, _, _)| *kind)
    }
}

/// Immutable device descriptor: kind plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: i32,
}

impl Device {
    pub const CPU: Device = Device {
        kind: DeviceKind::Cpu,
        index: 0,
    };

    pub const fn new(kind: DeviceKind, index: i32) -> Self {
        Device { kind, index }
    }

    /// Whether this is the host device.
    pub fn is_cpu(self) -> bool {
        self.kind == DeviceKind::Cpu
    }

    /// Parses descriptors like `"cpu"`, `"cuda:1"`, or `"metal"`.
    pub fn parse(descriptor: &str) -> ArrayResult<Self> {
        let descriptor = descriptor.trim().to_ascii_lowercase();
        let (kind_name, index) = match descriptor.split_once(':') {
            Some((kind, index)) => {
                let index = index.trim().parse::<i32>().map_err(|_| {
                    ArrayError::device(format!("malformed device index in '{descriptor}'"))
                })?;
                if index < 0 {
                    return Err(ArrayError::device(format!(
                        "device index must be non-negative in '{descriptor}'"
                    )));
                }
                (kind.trim().to_string(), index)
            }
            None => (descriptor.clone(), 0),
        };
        let kind = DeviceKind::from_name(&kind_name)
            .ok_or_else(|| ArrayError::device(format!("unknown device kind '{kind_name}'")))?;
        Ok(Device { kind, index })
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::CPU
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.index)
    }
}

impl FromStr for Device {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Device::parse(s)
    }
}
