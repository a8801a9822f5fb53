//! Instance offers and concrete hardware descriptions.

use serde::{Deserialize, Serialize};

use crate::{CpuArch, GpuVendor, Memory, Requirements, ResourcesSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub vendor: GpuVendor,
    pub name: String,
    pub memory: Memory,
    pub compute_capability: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub size: Memory,
}

/// Concrete hardware of an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: u32,
    pub cpu_arch: CpuArch,
    pub memory: Memory,
    pub gpus: Vec<Gpu>,
    pub spot: bool,
    pub disk: Disk,
}

impl Resources {
    /// Whether this hardware fits every constraint of `spec`.
    pub fn satisfies(&self, spec: &ResourcesSpec) -> bool {
        if spec.cpu.arch.is_some_and(|arch| arch != self.cpu_arch) {
            return false;
        }
        if !spec.cpu.count.contains(self.cpus) || !spec.memory.contains(self.memory) {
            return false;
        }
        if let Some(disk) = &spec.disk {
            if !disk.size.contains(self.disk.size) {
                return false;
            }
        }
        match &spec.gpu {
            Some(gpu) => self.satisfies_gpu(gpu),
            None => true,
        }
    }

    fn satisfies_gpu(&self, spec: &crate::GpuSpec) -> bool {
        let count = self.gpus.len() as u32;
        if !spec.count.contains(count) {
            return false;
        }
        if count == 0 {
            return true;
        }
        let per_gpu_ok = self.gpus.iter().all(|gpu| {
            spec.vendor.is_none_or(|vendor| vendor == gpu.vendor)
                && spec.name.as_ref().is_none_or(|names| {
                    names.iter().any(|name| name.eq_ignore_ascii_case(&gpu.name))
                })
                && spec
                    .memory
                    .as_ref()
                    .is_none_or(|range| range.contains(gpu.memory))
                && spec.compute_capability.is_none_or(|required| {
                    gpu.compute_capability.is_some_and(|cc| cc >= required)
                })
        });
        if !per_gpu_ok {
            return false;
        }
        spec.total_memory
            .as_ref()
            .is_none_or(|range| range.contains(self.gpus.iter().map(|g| g.memory).sum()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    pub name: String,
    pub resources: Resources,
}

/// Cloud providers the orchestrator can provision on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Aws,
    Azure,
    Gcp,
    Kubernetes,
    Lambda,
    Nebius,
    Oci,
    Runpod,
    /// In-process backend used by tests and local development.
    Mock,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Kubernetes => "kubernetes",
            Self::Lambda => "lambda",
            Self::Nebius => "nebius",
            Self::Oci => "oci",
            Self::Runpod => "runpod",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            "kubernetes" => Self::Kubernetes,
            "lambda" => Self::Lambda,
            "nebius" => Self::Nebius,
            "oci" => Self::Oci,
            "runpod" => Self::Runpod,
            "mock" => Self::Mock,
            other => return Err(format!("unknown backend type: {other}")),
        })
    }
}

/// A priced, region-scoped instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOffer {
    pub backend: BackendType,
    pub region: String,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    pub instance: InstanceType,
    /// Hourly price in USD.
    pub price: f64,
}

impl InstanceOffer {
    /// Whether this offer satisfies every part of `requirements`.
    pub fn matches(&self, requirements: &Requirements) -> bool {
        let resources = &self.instance.resources;
        requirements.spot.is_none_or(|spot| spot == resources.spot)
            && requirements.max_price.is_none_or(|max| self.price <= max)
            && resources.satisfies(&requirements.resources)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceAvailability {
    Unknown,
    Available,
    NotAvailable,
    NoQuota,
    Idle,
    Busy,
}

impl InstanceAvailability {
    /// Offers worth attempting: known available, idle, or not reported.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Unknown | Self::Available | Self::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOfferWithAvailability {
    #[serde(flatten)]
    pub offer: InstanceOffer,
    pub availability: InstanceAvailability,
}

impl InstanceOfferWithAvailability {
    pub fn price(&self) -> f64 {
        self.offer.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CpuSpec, DiskSpec, GpuSpec, Range};

    fn a100_box(gpus: usize) -> Resources {
        Resources {
            cpus: 24,
            cpu_arch: CpuArch::X86,
            memory: Memory::gib(192.0),
            gpus: (0..gpus)
                .map(|_| Gpu {
                    vendor: GpuVendor::Nvidia,
                    name: "A100".to_string(),
                    memory: Memory::gib(40.0),
                    compute_capability: Some((8, 0)),
                })
                .collect(),
            spot: false,
            disk: Disk {
                size: Memory::gib(200.0),
            },
        }
    }

    fn gpu_spec(gpu: GpuSpec) -> ResourcesSpec {
        ResourcesSpec {
            gpu: Some(gpu),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_spec_matches_cpu_box() {
        assert!(a100_box(0).satisfies(&ResourcesSpec::default()));
    }

    #[test]
    fn test_gpu_name_is_case_insensitive_candidate_set() {
        let spec = gpu_spec(GpuSpec {
            name: Some(vec!["h100".to_string(), "a100".to_string()]),
            ..Default::default()
        });
        assert!(a100_box(1).satisfies(&spec));
        assert!(!a100_box(2).satisfies(&spec), "count defaults to exactly one");
    }

    #[test]
    fn test_total_memory_sums_gpus() {
        let spec = gpu_spec(GpuSpec {
            count: Range::at_least(1),
            total_memory: Some(Range::at_least(Memory::gib(80.0))),
            ..Default::default()
        });
        assert!(!a100_box(1).satisfies(&spec));
        assert!(a100_box(2).satisfies(&spec));
    }

    #[test]
    fn test_compute_capability_minimum() {
        let spec = gpu_spec(GpuSpec {
            compute_capability: Some((9, 0)),
            ..Default::default()
        });
        assert!(!a100_box(1).satisfies(&spec));
    }

    #[test]
    fn test_cpu_and_disk_constraints() {
        let spec = ResourcesSpec {
            cpu: CpuSpec {
                arch: Some(CpuArch::Arm),
                count: Range::any(),
            },
            ..Default::default()
        };
        assert!(!a100_box(0).satisfies(&spec));

        let spec = ResourcesSpec {
            disk: Some(DiskSpec {
                size: Range::at_least(Memory::gib(500.0)),
            }),
            ..Default::default()
        };
        assert!(!a100_box(0).satisfies(&spec));
    }

    #[test]
    fn test_offer_respects_spot_and_price() {
        let offer = InstanceOffer {
            backend: BackendType::Aws,
            region: "us-east-1".to_string(),
            availability_zones: vec![],
            instance: InstanceType {
                name: "p4d.24xlarge".to_string(),
                resources: a100_box(0),
            },
            price: 2.5,
        };
        let requirements = Requirements::default();
        assert!(offer.matches(&requirements));
        assert!(!offer.matches(&requirements.with_spot(true)));
        assert!(!offer.matches(&Requirements {
            max_price: Some(2.0),
            ..Default::default()
        }));
    }

    #[test]
    fn test_availability() {
        assert!(InstanceAvailability::Available.is_available());
        assert!(InstanceAvailability::Idle.is_available());
        assert!(InstanceAvailability::Unknown.is_available());
        assert!(!InstanceAvailability::NoQuota.is_available());
        assert!(!InstanceAvailability::Busy.is_available());
        assert!(!InstanceAvailability::NotAvailable.is_available());
    }

    #[test]
    fn test_backend_type_roundtrip() {
        for backend in [BackendType::Aws, BackendType::Runpod, BackendType::Mock] {
            assert_eq!(backend.as_str().parse::<BackendType>().unwrap(), backend);
        }
        assert!("nope".parse::<BackendType>().is_err());
    }
}
