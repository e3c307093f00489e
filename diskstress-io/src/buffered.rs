use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::handle::StorageHandle;
use crate::probe::{BlockSizeSource, Geometry, probe};

/// Access through userspace read and write buffers on top of the page cache.
///
/// Writes stay in the write buffer until the next read, seek or [`flush`](StorageHandle::flush).
#[derive(Debug)]
pub struct BufferedFile {
    reader: BufReader<File>,
    writer: BufWriter<File>,
    geometry: Geometry,
}

impl BufferedFile {
    /// Opens `path` for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "opening buffered file");
        let open_error = |source| Error::Open {
            path: path.into(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(open_error)?;

        let geometry = probe(&mut file, BlockSizeSource::Metadata).map_err(open_error)?;
        if geometry.size == 0 {
            return Err(Error::EmptyDevice { path: path.into() });
        }

        let writer = BufWriter::new(file.try_clone().map_err(open_error)?);
        let reader = BufReader::new(file);

        Ok(Self {
            reader,
            writer,
            geometry,
        })
    }
}

impl StorageHandle for BufferedFile {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        tracing::trace!(len = buf.len(), offset, "read");
        // Both halves share one file description, pending writes must land first.
        self.writer.flush()?;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(filled)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        tracing::trace!(len = buf.len(), offset, "write");
        self.writer.seek(SeekFrom::Start(offset))?;
        self.writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }

    fn size(&self) -> u64 {
        self.geometry.size
    }

    fn block_size(&self) -> u64 {
        self.geometry.block_size
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::error!(error = &err as &dyn std::error::Error, "failed to flush on close");
        }
    }
}
