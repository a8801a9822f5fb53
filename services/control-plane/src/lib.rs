//! stratus control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose the
//! pipelines, stores and backend interface to enable integration testing and
//! reuse.

pub mod backends;
pub mod config;
pub mod db;
pub mod models;
pub mod offers;
pub mod pipelines;
pub mod state;
pub mod store;
