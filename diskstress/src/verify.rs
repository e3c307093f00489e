//! Read-after-write integrity checks over a region set.

use std::time::{Duration, Instant};

use diskstress_io::{AlignedBuffer, DIRECT_ALIGNMENT, StorageHandle};

use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::region::RegionSet;

/// Outcome of a successful [`verify`] run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerifyReport {
    /// The number of regions written and read back.
    pub regions: usize,
    /// Bytes compared, equal to the covered bytes of the set.
    pub bytes: u64,
    /// Time spent writing and reading.
    pub elapsed: Duration,
}

/// Writes a pattern keyed by `tag` to every region, flushes, and reads all regions back.
///
/// The pattern of each region also depends on its offset, so data landing in the wrong place is
/// detected as well. Fails with [`Error::Mismatch`] on the first region that reads back
/// differently. The scratch buffer is aligned for direct I/O.
pub fn verify<H>(handle: &mut H, regions: &RegionSet, tag: u64) -> Result<VerifyReport>
where
    H: StorageHandle + ?Sized,
{
    verify_with(handle, regions, tag, || ())
}

/// Like [`verify`], but runs `between` after the written data has been flushed and before it is
/// read back.
pub fn verify_with<H, F>(
    handle: &mut H,
    regions: &RegionSet,
    tag: u64,
    between: F,
) -> Result<VerifyReport>
where
    H: StorageHandle + ?Sized,
    F: FnOnce(),
{
    let start = Instant::now();
    let mut buffer = AlignedBuffer::new(regions.max_span(), DIRECT_ALIGNMENT);

    write_patterns(handle, regions, tag, &mut buffer)?;
    handle.flush()?;
    between();
    check_patterns(handle, regions, tag, &mut buffer)?;

    let report = VerifyReport {
        regions: regions.len(),
        bytes: regions.covered_bytes(),
        elapsed: start.elapsed(),
    };
    tracing::info!(regions = report.regions, bytes = report.bytes, "verification passed");
    Ok(report)
}

fn write_patterns<H>(handle: &mut H, regions: &RegionSet, tag: u64, buffer: &mut [u8]) -> Result<()>
where
    H: StorageHandle + ?Sized,
{
    for region in regions {
        let buf = &mut buffer[..region.len() as usize];
        Pattern::for_region(tag, region).fill(buf);
        handle.write_all_at(buf, region.offset)?;
    }
    Ok(())
}

fn check_patterns<H>(handle: &mut H, regions: &RegionSet, tag: u64, buffer: &mut [u8]) -> Result<()>
where
    H: StorageHandle + ?Sized,
{
    for region in regions {
        let buf = &mut buffer[..region.len() as usize];
        handle.read_exact_at(buf, region.offset)?;

        if let Some(position) = Pattern::for_region(tag, region).first_mismatch(buf) {
            tracing::error!(offset = region.offset, position, "data read back differs");
            return Err(Error::Mismatch {
                offset: region.offset,
                position,
            });
        }
    }
    Ok(())
}
