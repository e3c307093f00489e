use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while accessing a storage device.
#[derive(Debug, Error)]
pub enum Error {
    /// The device or file could not be opened.
    #[error("failed to open `{}`: {source}", path.display())]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// The underlying system error.
        #[source]
        source: io::Error,
    },

    /// The device was opened but reports a size of zero.
    #[error("`{}` reports a size of zero", path.display())]
    EmptyDevice {
        /// Path that was opened.
        path: PathBuf,
    },

    /// Seeking to the requested offset landed somewhere else.
    #[error("seek to offset {offset} landed at {actual}")]
    Seek {
        /// The requested offset.
        offset: u64,
        /// The position reported after seeking.
        actual: u64,
    },

    /// An access reached past the end of an in-memory device.
    #[error("access of {len} bytes at offset {offset} is out of bounds for {size} bytes")]
    OutOfBounds {
        /// Start of the access.
        offset: u64,
        /// Length of the access.
        len: usize,
        /// Size of the device.
        size: u64,
    },

    /// A read or write moved fewer bytes than requested.
    #[error("short {op}: {actual} of {expected} bytes at offset {offset}")]
    ShortTransfer {
        /// Either `"read"` or `"write"`.
        op: &'static str,
        /// Start of the transfer.
        offset: u64,
        /// Bytes requested.
        expected: usize,
        /// Bytes actually transferred.
        actual: usize,
    },

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for storage operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
