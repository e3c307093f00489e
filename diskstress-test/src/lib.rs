//! Test utilities for diskstress.
//!
//! This crate provides utilities to facilitate testing of the storage handles and workloads. See
//! the modules for all available utilities.

pub mod device;
pub mod tracing;

pub use device::sized_tempfile;
