//! Requested resource envelopes.

use serde::{Deserialize, Serialize};

use crate::{Memory, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    X86,
    Arm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Google,
    Intel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub arch: Option<CpuArch>,
    pub count: Range<u32>,
}

impl Default for CpuSpec {
    fn default() -> Self {
        Self {
            arch: None,
            count: Range::at_least(2),
        }
    }
}

/// GPU requirements.
///
/// `name` is a candidate set: any listed model is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    pub vendor: Option<GpuVendor>,
    pub name: Option<Vec<String>>,
    pub count: Range<u32>,
    /// Per-GPU memory.
    pub memory: Option<Range<Memory>>,
    /// Memory summed over all GPUs of the instance.
    pub total_memory: Option<Range<Memory>>,
    /// Minimum `(major, minor)` compute capability.
    pub compute_capability: Option<(u32, u32)>,
}

impl Default for GpuSpec {
    fn default() -> Self {
        Self {
            vendor: None,
            name: None,
            count: Range::exact(1),
            memory: None,
            total_memory: None,
            compute_capability: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub size: Range<Memory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesSpec {
    pub cpu: CpuSpec,
    pub memory: Range<Memory>,
    pub shm_size: Option<Memory>,
    pub gpu: Option<GpuSpec>,
    pub disk: Option<DiskSpec>,
}

impl Default for ResourcesSpec {
    fn default() -> Self {
        Self {
            cpu: CpuSpec::default(),
            memory: Range::at_least(Memory::gib(8.0)),
            shm_size: None,
            gpu: None,
            disk: Some(DiskSpec {
                size: Range::at_least(Memory::gib(100.0)),
            }),
        }
    }
}

/// The envelope a job or fleet wants satisfied by an offer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Requirements {
    pub resources: ResourcesSpec,
    pub max_price: Option<f64>,
    /// `None` accepts both spot and on-demand capacity.
    pub spot: Option<bool>,
    pub reservation: Option<String>,
}

impl Requirements {
    pub fn new(resources: ResourcesSpec) -> Self {
        Self {
            resources,
            ..Default::default()
        }
    }

    /// Copy of these requirements pinned to a spot flag.
    pub fn with_spot(&self, spot: bool) -> Self {
        Self {
            spot: Some(spot),
            ..self.clone()
        }
    }
}
