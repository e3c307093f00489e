//! Size and block size discovery for files and block devices.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use crate::DEFAULT_BLOCK_SIZE;

// linux/fs.h
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);
nix::ioctl_read!(blkbszget, 0x12, 112, usize);

/// Where the block size of a regular file is taken from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BlockSizeSource {
    /// Only block devices report a block size; regular files use the default.
    Device,
    /// Use `st_blksize` for regular files.
    Metadata,
}

/// Size and block size of an opened device, fixed for the lifetime of a handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Geometry {
    pub size: u64,
    pub block_size: u64,
}

pub(crate) fn probe(file: &mut File, source: BlockSizeSource) -> io::Result<Geometry> {
    let metadata = file.metadata()?;
    let end = file.seek(SeekFrom::End(0))?;

    let (size, reported_block_size) = if metadata.file_type().is_block_device() {
        let mut size = 0u64;
        // SAFETY: the descriptor is open and `size` is a valid u64 out-pointer.
        let size = match unsafe { blkgetsize64(file.as_raw_fd(), &mut size) } {
            Ok(_) => size,
            Err(errno) => {
                tracing::debug!(%errno, "BLKGETSIZE64 failed, using end position");
                end
            }
        };

        let mut block_size = 0usize;
        // SAFETY: as above, with a size_t out-pointer.
        let block_size = match unsafe { blkbszget(file.as_raw_fd(), &mut block_size) } {
            Ok(_) => block_size as u64,
            Err(errno) => {
                tracing::debug!(%errno, "BLKBSZGET failed, assuming page size");
                0
            }
        };

        (size, block_size)
    } else {
        // Sparse files may report less than what is allocated, take whatever is largest.
        let size = end.max(metadata.len()).max(metadata.blocks() * 512);
        let block_size = match source {
            BlockSizeSource::Device => 0,
            BlockSizeSource::Metadata => metadata.blksize(),
        };

        (size, block_size)
    };

    let block_size = if reported_block_size == 0 || reported_block_size > size {
        DEFAULT_BLOCK_SIZE
    } else {
        reported_block_size
    };

    tracing::debug!(size, block_size, "probed device");
    Ok(Geometry { size, block_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_file_uses_default_block_size() {
        let mut file = diskstress_test::sized_tempfile(64 * 1024);
        let geometry = probe(file.as_file_mut(), BlockSizeSource::Device).unwrap();

        assert_eq!(geometry.size, 64 * 1024);
        assert_eq!(geometry.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn oversized_block_size_is_reduced() {
        // st_blksize is typically 4096 or larger, which exceeds this file.
        let mut file = diskstress_test::sized_tempfile(512);
        let geometry = probe(file.as_file_mut(), BlockSizeSource::Metadata).unwrap();

        assert!(geometry.size >= 512);
        assert!(geometry.block_size <= geometry.size || geometry.block_size == DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn empty_file_has_zero_size() {
        let mut file = tempfile::tempfile().unwrap();
        let geometry = probe(&mut file, BlockSizeSource::Metadata).unwrap();

        assert_eq!(geometry.size, 0);
        assert_eq!(geometry.block_size, DEFAULT_BLOCK_SIZE);
    }
}
