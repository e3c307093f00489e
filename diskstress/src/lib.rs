//! Exercise block devices and files with timed read and write passes.
//!
//! A run works on a [`RegionSet`]: non-overlapping, chunk-aligned byte ranges covering a chosen
//! share of the device. Concurrent workers pick regions at random and transfer each one whole,
//! either to measure aggregate throughput over regions of random length, or to measure the
//! response time of fixed-size transfers. Between passes the set can be regenerated or partially
//! replaced, the page cache can be cleared, and the data on the device can be verified.
//!
//! The [`Session`] ties these pieces together for one device, and [`plan::run`] executes a
//! configured list of steps against it.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
mod observability;
pub mod pattern;
pub mod plan;
pub mod region;
pub mod session;
pub mod verify;

pub use crate::driver::{Driver, Measurement, Mode, Operation};
pub use crate::error::{Error, Result};
pub use crate::region::{CHUNK_SIZE, Region, RegionAllocator, RegionSet, Shape};
pub use crate::session::Session;
pub use crate::verify::{VerifyReport, verify};
