//! Resource model shared by the scheduler and the offer matcher.
//!
//! This crate is pure data and pure functions:
//!
//! - [`Range`] and [`Memory`]: the building blocks of every requirement.
//! - [`ResourcesSpec`] / [`Requirements`]: what a job or fleet asks for.
//! - [`InstanceOffer`] / [`InstanceAvailability`]: what a backend can sell.
//! - [`combine`]: intersecting fleet-level and run-level requirements.
//! - [`Resources::satisfies`]: whether concrete hardware fits a spec.

pub mod combine;
mod error;
mod memory;
mod offer;
mod profile;
mod range;
mod spec;

pub use combine::{
    combine_cpu, combine_disk_optional, combine_gpu_optional, combine_idle_duration,
    combine_requirements, combine_resources, combine_spot_policy,
};
pub use error::{CombineError, RangeError};
pub use memory::Memory;
pub use offer::{
    BackendType, Disk, Gpu, InstanceAvailability, InstanceOffer, InstanceOfferWithAvailability, InstanceType,
    Resources,
};
pub use profile::{CreationPolicy, IdleDuration, SpotPolicy};
pub use range::Range;
pub use spec::{CpuArch, CpuSpec, DiskSpec, GpuSpec, GpuVendor, Requirements, ResourcesSpec};
