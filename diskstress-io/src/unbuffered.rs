use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;

use crate::error::{Error, Result};
use crate::handle::StorageHandle;
use crate::probe::{BlockSizeSource, Geometry, probe};

/// Plain seek-then-transfer access through the page cache.
#[derive(Debug)]
pub struct UnbufferedFile {
    file: File,
    geometry: Geometry,
}

impl UnbufferedFile {
    /// Opens `path` for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "opening unbuffered file");
        Self::open_with_flags(path, OFlag::O_LARGEFILE)
    }

    pub(crate) fn open_with_flags(path: &Path, flags: OFlag) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags.bits())
            .open(path)
            .map_err(|source| Error::Open {
                path: path.into(),
                source,
            })?;

        let geometry = probe(&mut file, BlockSizeSource::Device).map_err(|source| Error::Open {
            path: path.into(),
            source,
        })?;
        if geometry.size == 0 {
            return Err(Error::EmptyDevice { path: path.into() });
        }

        Ok(Self { file, geometry })
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        let actual = self.file.seek(SeekFrom::Start(offset))?;
        if actual != offset {
            return Err(Error::Seek { offset, actual });
        }
        Ok(())
    }
}

impl StorageHandle for UnbufferedFile {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        tracing::trace!(len = buf.len(), offset, "read");
        self.seek_to(offset)?;
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        tracing::trace!(len = buf.len(), offset, "write");
        self.seek_to(offset)?;
        Ok(self.file.write(buf)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.sync_data()?)
    }

    fn size(&self) -> u64 {
        self.geometry.size
    }

    fn block_size(&self) -> u64 {
        self.geometry.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back() {
        let file = diskstress_test::sized_tempfile(16 * 1024);
        let mut handle = UnbufferedFile::open(file.path()).unwrap();
        assert_eq!(handle.size(), 16 * 1024);
        assert_eq!(handle.block_size(), 4096);

        handle.write_all_at(b"oh hai!", 5000).unwrap();
        handle.flush().unwrap();

        let mut buf = [0; 7];
        handle.read_exact_at(&mut buf, 5000).unwrap();
        assert_eq!(&buf, b"oh hai!");
    }

    #[test]
    fn read_past_end_is_short() {
        let file = diskstress_test::sized_tempfile(4096);
        let mut handle = UnbufferedFile::open(file.path()).unwrap();

        let mut buf = [0; 100];
        let err = handle.read_exact_at(&mut buf, 4050).unwrap_err();
        assert!(
            matches!(err, Error::ShortTransfer { expected: 100, actual: 46, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = UnbufferedFile::open(file.path()).unwrap_err();
        assert!(matches!(err, Error::EmptyDevice { .. }), "{err:?}");
    }
}
