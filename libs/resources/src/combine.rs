//! Intersecting two requirement sets.
//!
//! Used when a run lands on a fleet: the run's requirements and the fleet's
//! requirements must both hold, so every field is narrowed to the values
//! acceptable to both sides. A field that cannot be narrowed yields a
//! [`CombineError`].
//!
//! Every function here is idempotent: `combine(x, x) == x`.

use crate::{
    CombineError, CpuSpec, DiskSpec, GpuSpec, IdleDuration, Range, Requirements, ResourcesSpec,
    SpotPolicy,
};

type CombineResult<T> = Result<T, CombineError>;

pub fn combine_requirements(a: &Requirements, b: &Requirements) -> CombineResult<Requirements> {
    Ok(Requirements {
        resources: combine_resources(&a.resources, &b.resources)?,
        max_price: match (a.max_price, b.max_price) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        },
        spot: combine_equal("spot", a.spot, b.spot)?,
        reservation: combine_equal("reservation", a.reservation.clone(), b.reservation.clone())?,
    })
}

pub fn combine_resources(a: &ResourcesSpec, b: &ResourcesSpec) -> CombineResult<ResourcesSpec> {
    Ok(ResourcesSpec {
        cpu: combine_cpu(&a.cpu, &b.cpu)?,
        memory: intersect("memory", &a.memory, &b.memory)?,
        shm_size: combine_equal("shm_size", a.shm_size, b.shm_size)?,
        gpu: combine_gpu_optional(a.gpu.as_ref(), b.gpu.as_ref())?,
        disk: combine_disk_optional(a.disk.as_ref(), b.disk.as_ref())?,
    })
}

pub fn combine_cpu(a: &CpuSpec, b: &CpuSpec) -> CombineResult<CpuSpec> {
    Ok(CpuSpec {
        arch: combine_equal("cpu.arch", a.arch, b.arch)?,
        count: intersect("cpu.count", &a.count, &b.count)?,
    })
}

pub fn combine_gpu_optional(
    a: Option<&GpuSpec>,
    b: Option<&GpuSpec>,
) -> CombineResult<Option<GpuSpec>> {
    match (a, b) {
        (Some(a), Some(b)) => combine_gpu(a, b).map(Some),
        (a, b) => Ok(a.or(b).cloned()),
    }
}

fn combine_gpu(a: &GpuSpec, b: &GpuSpec) -> CombineResult<GpuSpec> {
    let name = match (&a.name, &b.name) {
        // Order and duplicates follow the first operand; an empty result is
        // allowed and simply matches no GPU.
        (Some(left), Some(right)) => Some(
            left.iter()
                .filter(|n| right.iter().any(|m| m.eq_ignore_ascii_case(n)))
                .cloned()
                .collect(),
        ),
        (left, right) => left.clone().or_else(|| right.clone()),
    };
    Ok(GpuSpec {
        vendor: combine_equal("gpu.vendor", a.vendor, b.vendor)?,
        name,
        count: intersect("gpu.count", &a.count, &b.count)?,
        memory: intersect_optional("gpu.memory", a.memory.as_ref(), b.memory.as_ref())?,
        total_memory: intersect_optional(
            "gpu.total_memory",
            a.total_memory.as_ref(),
            b.total_memory.as_ref(),
        )?,
        // The first operand is authoritative when both are set.
        compute_capability: a.compute_capability.or(b.compute_capability),
    })
}

pub fn combine_disk_optional(
    a: Option<&DiskSpec>,
    b: Option<&DiskSpec>,
) -> CombineResult<Option<DiskSpec>> {
    match (a, b) {
        (Some(a), Some(b)) => Ok(Some(DiskSpec {
            size: intersect("disk.size", &a.size, &b.size)?,
        })),
        (a, b) => Ok(a.or(b).cloned()),
    }
}

/// Combines idle-duration policies.
///
/// Unset yields to the other side. Two enabled durations keep the shorter
/// one, so `0` (terminate immediately) wins over any positive value. An
/// enabled duration never combines with a disabled one.
pub fn combine_idle_duration(
    a: Option<IdleDuration>,
    b: Option<IdleDuration>,
) -> CombineResult<Option<IdleDuration>> {
    match (a, b) {
        (Some(x), Some(y)) => match (x.is_disabled(), y.is_disabled()) {
            (true, true) => Ok(Some(x)),
            (false, false) => Ok(Some(x.min(y))),
            _ => Err(CombineError::incompatible(
                "idle_duration",
                x.as_secs(),
                y.as_secs(),
            )),
        },
        (x, y) => Ok(x.or(y)),
    }
}

/// Combines spot policies. `Auto` and unset yield to any concrete policy.
pub fn combine_spot_policy(
    a: Option<SpotPolicy>,
    b: Option<SpotPolicy>,
) -> CombineResult<Option<SpotPolicy>> {
    let concrete = |p: Option<SpotPolicy>| p.filter(|p| *p != SpotPolicy::Auto);
    match (concrete(a), concrete(b)) {
        (Some(x), Some(y)) if x != y => Err(CombineError::incompatible("spot_policy", x, y)),
        (Some(x), _) | (None, Some(x)) => Ok(Some(x)),
        (None, None) => Ok(a.or(b)),
    }
}

fn combine_equal<T: PartialEq + std::fmt::Debug>(
    field: &'static str,
    a: Option<T>,
    b: Option<T>,
) -> CombineResult<Option<T>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(CombineError::incompatible(field, x, y)),
        (x, y) => Ok(x.or(y)),
    }
}

fn intersect<T: PartialOrd + Copy + std::fmt::Debug>(
    field: &'static str,
    a: &Range<T>,
    b: &Range<T>,
) -> CombineResult<Range<T>> {
    a.intersect(b)
        .ok_or(CombineError::DisjointRanges { field })
}

fn intersect_optional<T: PartialOrd + Copy + std::fmt::Debug>(
    field: &'static str,
    a: Option<&Range<T>>,
    b: Option<&Range<T>>,
) -> CombineResult<Option<Range<T>>> {
    match (a, b) {
        (Some(a), Some(b)) => intersect(field, a, b).map(Some),
        (a, b) => Ok(a.or(b).copied()),
    }
}
