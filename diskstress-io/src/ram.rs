use crate::error::{Error, Result};
use crate::handle::StorageHandle;

/// A zeroed in-memory device of fixed size.
#[derive(Debug)]
pub struct RamFile {
    mem: Vec<u8>,
}

impl RamFile {
    /// Allocates a device of `size` bytes.
    pub fn new(size: u64) -> Self {
        tracing::debug!(size, "opening RAM file");
        Self {
            mem: vec![0; size as usize],
        }
    }

    fn range(&self, len: usize, offset: u64) -> Result<std::ops::Range<usize>> {
        let size = self.mem.len() as u64;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(offset as usize..end as usize),
            _ => Err(Error::OutOfBounds { offset, len, size }),
        }
    }
}

impl StorageHandle for RamFile {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let range = self.range(buf.len(), offset)?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let range = self.range(buf.len(), offset)?;
        self.mem[range].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.mem.len() as u64
    }

    fn block_size(&self) -> u64 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_memory_reads_zero() {
        let mut ram = RamFile::new(8192);
        let buf = [0x5a; 4096];

        assert_eq!(ram.write(&buf, 4096).unwrap(), 4096);

        let mut out = [0xff; 4096];
        assert_eq!(ram.read(&mut out, 0).unwrap(), 4096);
        assert!(out.iter().all(|&b| b == 0));

        ram.read(&mut out, 4096).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn rejects_out_of_bounds() {
        let mut ram = RamFile::new(8192);

        let err = ram.write(&[1], 8192).unwrap_err();
        assert!(
            matches!(err, Error::OutOfBounds { offset: 8192, len: 1, size: 8192 }),
            "{err:?}"
        );

        let mut buf = [0; 2];
        assert!(ram.read(&mut buf, u64::MAX).is_err());
    }
}
