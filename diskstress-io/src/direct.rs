use std::path::Path;

use nix::fcntl::OFlag;

use crate::error::Result;
use crate::handle::StorageHandle;
use crate::{DIRECT_ALIGNMENT, UnbufferedFile};

/// Access that bypasses the page cache.
///
/// Buffer address, length and offset must all be multiples of [`DIRECT_ALIGNMENT`]. The kernel
/// rejects anything else, so a violation panics before the system call is issued.
#[derive(Debug)]
pub struct DirectFile {
    inner: UnbufferedFile,
}

impl DirectFile {
    /// Opens `path` for reading and writing with `O_DIRECT`.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "opening direct file");
        let inner = UnbufferedFile::open_with_flags(path, OFlag::O_LARGEFILE | OFlag::O_DIRECT)?;
        Ok(Self { inner })
    }
}

fn assert_aligned(ptr: *const u8, len: usize, offset: u64) {
    assert!(
        (ptr as usize) % DIRECT_ALIGNMENT == 0,
        "direct I/O buffer at {ptr:p} is not {DIRECT_ALIGNMENT}-byte aligned"
    );
    assert!(
        len % DIRECT_ALIGNMENT == 0,
        "direct I/O length {len} is not a multiple of {DIRECT_ALIGNMENT}"
    );
    assert!(
        offset % DIRECT_ALIGNMENT as u64 == 0,
        "direct I/O offset {offset} is not a multiple of {DIRECT_ALIGNMENT}"
    );
}

impl StorageHandle for DirectFile {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        assert_aligned(buf.as_ptr(), buf.len(), offset);
        self.inner.read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        assert_aligned(buf.as_ptr(), buf.len(), offset);
        self.inner.write(buf, offset)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn block_size(&self) -> u64 {
        self.inner.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlignedBuffer;

    // Not every filesystem backing the temp dir supports O_DIRECT.
    fn open_or_skip() -> Option<(tempfile::NamedTempFile, DirectFile)> {
        let file = diskstress_test::sized_tempfile(4 * DIRECT_ALIGNMENT as u64);
        let handle = DirectFile::open(file.path()).ok()?;
        Some((file, handle))
    }

    // Alignment is checked before the transfer, so the same handle without O_DIRECT serves where
    // the filesystem refuses it.
    fn open_checked() -> (tempfile::NamedTempFile, DirectFile) {
        if let Some(opened) = open_or_skip() {
            return opened;
        }
        let file = diskstress_test::sized_tempfile(4 * DIRECT_ALIGNMENT as u64);
        let inner = UnbufferedFile::open(file.path()).unwrap();
        (file, DirectFile { inner })
    }

    #[test]
    #[should_panic(expected = "offset 512 is not a multiple of 4096")]
    fn write_rejects_unaligned_offset() {
        let (_file, mut handle) = open_checked();
        let buf = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        let _ = handle.write(&buf, 512);
    }

    #[test]
    #[should_panic(expected = "length 100 is not a multiple of 4096")]
    fn read_rejects_unaligned_length() {
        let (_file, mut handle) = open_checked();
        let mut buf = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        let _ = handle.read(&mut buf[..100], 0);
    }

    #[test]
    #[should_panic(expected = "is not a multiple of 4096")]
    fn rejects_unaligned_offset() {
        let buf = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        assert_aligned(buf.as_ptr(), buf.len(), 512);
    }

    #[test]
    #[should_panic(expected = "is not a multiple of 4096")]
    fn rejects_unaligned_length() {
        let buf = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        assert_aligned(buf.as_ptr(), 100, 0);
    }

    #[test]
    #[should_panic(expected = "aligned")]
    fn rejects_unaligned_buffer() {
        let buf = AlignedBuffer::new(2 * DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        assert_aligned(buf[1..].as_ptr(), DIRECT_ALIGNMENT, 0);
    }

    #[test]
    fn round_trips_when_supported() {
        let Some((_file, mut handle)) = open_or_skip() else {
            return;
        };

        let mut buf = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        buf.fill(0xab);
        if handle.write_all_at(&buf, DIRECT_ALIGNMENT as u64).is_err() {
            // the filesystem accepted O_DIRECT on open but not on transfer
            return;
        }
        handle.flush().unwrap();

        let mut out = AlignedBuffer::new(DIRECT_ALIGNMENT, DIRECT_ALIGNMENT);
        handle.read_exact_at(&mut out, DIRECT_ALIGNMENT as u64).unwrap();
        assert!(out.iter().all(|&b| b == 0xab));
    }
}
