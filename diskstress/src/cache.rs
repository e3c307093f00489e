//! Evict measured regions from the page cache between passes.

use std::io;
use std::time::Instant;

use diskstress_io::{AccessStrategy, StorageHandle, Target};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::region::CHUNK_SIZE;

/// Upper bound (exclusive) on the number of chunks read per cache-clearing transfer.
pub const CACHE_CLEAR_MAX_CHUNKS: u64 = 15;

const DROP_CACHES_PATH: &str = "/proc/sys/vm/drop_caches";

/// Reads random ranges through a buffered handle until `deadline`, returning the bytes read.
///
/// Each transfer starts at a random chunk and spans fewer than [`CACHE_CLEAR_MAX_CHUNKS`] chunks,
/// clamped to the last whole chunk of the device. Pulling unrelated data through the cache
/// pushes out pages a following read pass would otherwise hit.
pub fn clear_cache(target: &Target, deadline: Instant, seed: u64) -> Result<u64> {
    let mut handle = target.open(AccessStrategy::Buffered)?;
    let device_chunks = handle.size() / CHUNK_SIZE;
    if device_chunks == 0 {
        tracing::warn!(device = %target, "device too small to clear the cache");
        return Ok(0);
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut buffer = vec![0; (CACHE_CLEAR_MAX_CHUNKS * CHUNK_SIZE) as usize];
    let mut bytes = 0;

    while Instant::now() < deadline {
        let chunk = rng.random_range(0..device_chunks);
        let chunks = rng
            .random_range(0..CACHE_CLEAR_MAX_CHUNKS)
            .min(device_chunks - chunk);
        if chunks == 0 {
            continue;
        }

        let len = (chunks * CHUNK_SIZE) as usize;
        handle.read_exact_at(&mut buffer[..len], chunk * CHUNK_SIZE)?;
        bytes += len as u64;
    }

    tracing::debug!(device = %target, bytes, "cache cleared");
    Ok(bytes)
}

/// Flushes dirty pages and asks the kernel to drop its clean caches.
///
/// This requires root privileges.
pub fn drop_page_cache() -> io::Result<()> {
    nix::unistd::sync();
    std::fs::write(DROP_CACHES_PATH, "3")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn deadline(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    #[test]
    fn reads_whole_chunks() {
        let target = Target::Memory {
            size: 64 * CHUNK_SIZE,
        };

        let bytes = clear_cache(&target, deadline(20), 3).unwrap();
        assert!(bytes > 0);
        assert_eq!(bytes % CHUNK_SIZE, 0);
    }

    #[test]
    fn stays_within_a_file() {
        // not a multiple of the chunk size, the partial tail is never read
        let file = diskstress_test::sized_tempfile(3 * CHUNK_SIZE + 100);
        let target = Target::Path(file.path().into());

        let bytes = clear_cache(&target, deadline(20), 9).unwrap();
        assert!(bytes > 0);
    }

    #[test]
    fn skips_devices_below_one_chunk() {
        let target = Target::Memory { size: 512 };
        assert_eq!(clear_cache(&target, deadline(1000), 0).unwrap(), 0);
    }

    #[test]
    fn open_failure_is_reported() {
        let target = Target::Path("/nonexistent/diskstress-device".into());
        assert!(clear_cache(&target, deadline(10), 0).is_err());
    }
}
