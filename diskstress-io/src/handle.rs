use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{BufferedFile, DirectFile, RamFile, UnbufferedFile};

/// A type-erased [`StorageHandle`], as returned by [`Target::open`].
pub type BoxedHandle = Box<dyn StorageHandle>;

/// Positioned access to a block device, a file, or memory.
///
/// Size and block size are determined once when the handle is opened and never re-queried.
pub trait StorageHandle: Debug + Send {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes up to `buf.len()` bytes starting at `offset`, returning the number of bytes written.
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Makes previously written data durable (or visible, for the buffered variant).
    fn flush(&mut self) -> Result<()>;

    /// Total size of the device in bytes.
    fn size(&self) -> u64;

    /// Native block size of the device in bytes.
    fn block_size(&self) -> u64;

    /// Reads exactly `buf.len()` bytes, treating a short count as an error.
    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        let actual = self.read(buf, offset)?;
        if actual != buf.len() {
            return Err(Error::ShortTransfer {
                op: "read",
                offset,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Writes exactly `buf.len()` bytes, treating a short count as an error.
    fn write_all_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let actual = self.write(buf, offset)?;
        if actual != buf.len() {
            return Err(Error::ShortTransfer {
                op: "write",
                offset,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }
}

impl<H: StorageHandle + ?Sized> StorageHandle for Box<H> {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        (**self).write(buf, offset)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn block_size(&self) -> u64 {
        (**self).block_size()
    }
}

/// How a device path is accessed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStrategy {
    /// Through a userspace buffer and the page cache.
    Buffered,
    /// Plain positioned system calls through the page cache.
    #[default]
    Unbuffered,
    /// Bypassing the page cache; requires 4096-byte aligned buffers, lengths and offsets.
    Direct,
}

impl AccessStrategy {
    /// Returns the scratch buffer alignment this strategy requires.
    pub fn alignment(self) -> usize {
        match self {
            AccessStrategy::Direct => crate::DIRECT_ALIGNMENT,
            AccessStrategy::Buffered | AccessStrategy::Unbuffered => 1,
        }
    }
}

impl fmt::Display for AccessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessStrategy::Buffered => "buffered",
            AccessStrategy::Unbuffered => "unbuffered",
            AccessStrategy::Direct => "direct",
        })
    }
}

/// The access strategy parse error.
#[derive(Clone, Debug)]
pub struct StrategyParseError(String);

impl fmt::Display for StrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as access strategy: expected one of "buffered", "unbuffered", "direct""#,
            self.0
        )
    }
}

impl std::error::Error for StrategyParseError {}

impl FromStr for AccessStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("buffered") => Ok(AccessStrategy::Buffered),
            s if s.eq_ignore_ascii_case("unbuffered") => Ok(AccessStrategy::Unbuffered),
            s if s.eq_ignore_ascii_case("direct") => Ok(AccessStrategy::Direct),
            s => Err(StrategyParseError(s.into())),
        }
    }
}

/// Something a [`StorageHandle`] can be opened on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    /// A block device or regular file.
    Path(PathBuf),
    /// A fresh zeroed in-memory device of the given size, for every open.
    Memory {
        /// Size of the in-memory device in bytes.
        size: u64,
    },
}

impl Target {
    /// Opens a new handle with the requested strategy.
    ///
    /// The strategy is ignored for [`Target::Memory`].
    pub fn open(&self, strategy: AccessStrategy) -> Result<BoxedHandle> {
        let handle: BoxedHandle = match self {
            Target::Path(path) => match strategy {
                AccessStrategy::Buffered => Box::new(BufferedFile::open(path)?),
                AccessStrategy::Unbuffered => Box::new(UnbufferedFile::open(path)?),
                AccessStrategy::Direct => Box::new(DirectFile::open(path)?),
            },
            Target::Memory { size } => Box::new(RamFile::new(*size)),
        };

        Ok(handle)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(path) => write!(f, "{}", path.display()),
            Target::Memory { size } => write!(f, "memory:{size}"),
        }
    }
}
