//! Errors of region placement, passes and verification.

use thiserror::Error;

/// Errors that can occur while building or running workloads.
#[derive(Debug, Error)]
pub enum Error {
    /// A percentage outside of `0..=100`.
    #[error("percentage must be between 0 and 100, got {0}")]
    InvalidPercent(f64),

    /// A fixed shape with regions of zero chunks.
    #[error("fixed-size regions need at least one chunk")]
    EmptyShape,

    /// Region placement kept colliding with already placed regions.
    #[error("gave up placing regions after covering {covered} of {wanted} bytes")]
    AllocationExhausted {
        /// Bytes covered when placement gave up.
        covered: u64,
        /// Bytes requested.
        wanted: u64,
    },

    /// A region that is unaligned, empty, or overlaps its predecessor.
    #[error("invalid region at offset {offset} with {chunks} chunks: {reason}")]
    InvalidRegion {
        /// Offset of the offending region.
        offset: u64,
        /// Chunk count of the offending region.
        chunks: u16,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A pass was requested without any regions to pick from.
    #[error("the region set is empty")]
    EmptyRegionSet,

    /// A pass was requested without any workers.
    #[error("at least one worker is required")]
    NoWorkers,

    /// A worker stopped on an I/O error.
    #[error("worker {worker} failed: {source}")]
    Worker {
        /// Index of the failed worker.
        worker: usize,
        /// The error that stopped it.
        #[source]
        source: diskstress_io::Error,
    },

    /// Data read back differs from what was written.
    #[error("verification failed in region at offset {offset}, byte {position}")]
    Mismatch {
        /// Offset of the region.
        offset: u64,
        /// Position of the first differing byte within the region.
        position: usize,
    },

    /// A worker task was cancelled before it finished.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An error opening or accessing the device.
    #[error("storage error: {0}")]
    Storage(#[from] diskstress_io::Error),
}

/// Result type for workload operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
