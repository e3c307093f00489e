//! Deterministic pseudo-random byte streams for read-after-write checks.

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::region::Region;

/// A reproducible byte stream keyed by a tag.
///
/// Two patterns built from the same key produce the same bytes, independent of how the stream
/// is split across buffers. Clone a pattern to replay it from its current position.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// The number of bytes left in the stream.
    remaining: u64,
    rng: SmallRng,
    /// Unconsumed bytes of the last generated word.
    spill: [u8; 8],
    spill_len: usize,
}

impl Pattern {
    /// Creates a stream of `len` bytes seeded with `tag`.
    pub fn new(tag: u64, len: u64) -> Self {
        Self {
            remaining: len,
            rng: SmallRng::seed_from_u64(tag),
            spill: [0; 8],
            spill_len: 0,
        }
    }

    /// Creates the stream written to `region` for a given verification `tag`.
    pub fn for_region(tag: u64, region: &Region) -> Self {
        let key = tag ^ region.offset.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self::new(key, region.len())
    }

    /// Fills `buf` with the next bytes of the stream and returns how many were written.
    ///
    /// Fewer than `buf.len()` bytes are written once the stream runs out.
    pub fn fill(&mut self, buf: &mut [u8]) -> usize {
        let len = (buf.len() as u64).min(self.remaining) as usize;
        let buf = &mut buf[..len];

        let from_spill = self.spill_len.min(len);
        let spill_start = 8 - self.spill_len;
        buf[..from_spill].copy_from_slice(&self.spill[spill_start..spill_start + from_spill]);
        self.spill_len -= from_spill;

        let mut words = buf[from_spill..].chunks_exact_mut(8);
        for word in &mut words {
            word.copy_from_slice(&self.rng.next_u64().to_le_bytes());
        }

        let tail = words.into_remainder();
        if !tail.is_empty() {
            self.spill = self.rng.next_u64().to_le_bytes();
            tail.copy_from_slice(&self.spill[..tail.len()]);
            self.spill_len = 8 - tail.len();
        }

        self.remaining -= len as u64;
        len
    }

    /// Consumes the next `buf.len()` bytes of the stream and returns the position of the first
    /// byte in `buf` that differs from them.
    pub fn first_mismatch(&mut self, buf: &[u8]) -> Option<usize> {
        let mut expected = [0; 4096];
        let mut checked = 0;

        while checked < buf.len() {
            let len = expected.len().min(buf.len() - checked);
            let filled = self.fill(&mut expected[..len]);
            let actual = &buf[checked..checked + filled];

            if let Some(pos) = actual.iter().zip(&expected).position(|(a, e)| a != e) {
                return Some(checked + pos);
            }
            if filled < len {
                // stream ran out, anything beyond it cannot match
                return Some(checked + filled);
            }
            checked += filled;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_of_buffer_boundaries() {
        let mut whole = vec![0; 1000];
        Pattern::new(7, 1000).fill(&mut whole);

        let mut pieces = Vec::new();
        let mut pattern = Pattern::new(7, 1000);
        for size in [3, 1, 13, 8, 250, 5].into_iter().cycle() {
            let mut buf = vec![0; size];
            let n = pattern.fill(&mut buf);
            if n == 0 {
                break;
            }
            pieces.extend_from_slice(&buf[..n]);
        }

        assert_eq!(pieces, whole);
    }

    #[test]
    fn stops_at_length() {
        let mut pattern = Pattern::new(1, 10);
        let mut buf = [0xee; 16];

        assert_eq!(pattern.fill(&mut buf), 10);
        assert!(buf[10..].iter().all(|&b| b == 0xee));
        assert_eq!(pattern.fill(&mut buf), 0);
    }

    #[test]
    fn tags_produce_different_streams() {
        let region = Region::new(4096, 1);
        let mut a = vec![0; 4096];
        let mut b = vec![0; 4096];
        Pattern::for_region(1, &region).fill(&mut a);
        Pattern::for_region(2, &region).fill(&mut b);

        assert_ne!(a, b);
        assert_eq!(Pattern::for_region(1, &region).first_mismatch(&a), None);
    }

    #[test]
    fn finds_first_mismatch() {
        let mut buf = vec![0; 10_000];
        Pattern::new(3, 10_000).fill(&mut buf);
        buf[5000] ^= 0xff;

        assert_eq!(Pattern::new(3, 10_000).first_mismatch(&buf), Some(5000));
        assert_eq!(Pattern::new(3, 9_000).first_mismatch(&buf), Some(5000));
        assert_eq!(Pattern::new(3, 100).first_mismatch(&buf), Some(100));
    }
}
