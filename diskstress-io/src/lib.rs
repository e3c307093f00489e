//! Positioned access to block devices and files behind one [`StorageHandle`] contract.
//!
//! Four variants are provided:
//!
//!  - [`UnbufferedFile`]: seek-then-transfer system calls through the page cache,
//!  - [`DirectFile`]: the same with `O_DIRECT`, requiring 4096-byte alignment of buffer, length
//!    and offset,
//!  - [`BufferedFile`]: userspace read and write buffers on top of the page cache,
//!  - [`RamFile`]: a heap allocation, for testing without a device.
//!
//! Every handle reports its size and block size as discovered at open time. Block devices are
//! queried with `BLKGETSIZE64`/`BLKBSZGET`, regular files through their metadata.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod buffer;
mod buffered;
mod direct;
mod error;
mod handle;
mod probe;
mod ram;
mod unbuffered;

pub use buffer::AlignedBuffer;
pub use buffered::BufferedFile;
pub use direct::DirectFile;
pub use error::{Error, Result};
pub use handle::{AccessStrategy, BoxedHandle, StorageHandle, StrategyParseError, Target};
pub use ram::RamFile;
pub use unbuffered::UnbufferedFile;

/// Alignment of buffers, lengths and offsets for [`AccessStrategy::Direct`].
pub const DIRECT_ALIGNMENT: usize = 4096;

/// Block size assumed when a device does not report a usable one.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
