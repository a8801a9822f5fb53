//! # stratus-id
//!
//! Typed identifiers for every resource the orchestrator persists and
//! reconciles.
//!
//! Identifiers render as `{prefix}_{ulid}`:
//!
//! - `job_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `inst_01HV4Z4NYPLTRS0JTUA8XDME5F`
//! - `pgrp_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! The prefix makes a stray id in a log line or a row self-describing, and
//! the ULID keeps ids roughly creation-ordered, which the stores rely on for
//! deterministic listings.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
