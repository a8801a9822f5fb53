//! Identifier types for all persisted resources.

use crate::define_id;

// =============================================================================
// Tenancy
// =============================================================================

define_id!(
    /// Project owning backends, runs and fleets.
    ProjectId,
    "prj"
);

// =============================================================================
// Workloads
// =============================================================================

define_id!(
    /// A submitted run (one or more jobs).
    RunId,
    "run"
);
define_id!(
    /// A single job of a run replica.
    JobId,
    "job"
);

// =============================================================================
// Compute
// =============================================================================

define_id!(
    /// A declared set of instances with a node-count range.
    FleetId,
    "flt"
);
define_id!(InstanceId, "inst");
define_id!(ComputeGroupId, "cgrp");
define_id!(PlacementGroupId, "pgrp");

// =============================================================================
// Storage
// =============================================================================

define_id!(VolumeId, "vol");
