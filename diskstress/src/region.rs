//! Non-overlapping byte ranges covering a fraction of a device.
//!
//! A [`RegionSet`] is the sampling universe of a pass: workers pick regions from it uniformly at
//! random and transfer each one whole. Sets are built by a [`RegionAllocator`], which places
//! regions greedily at random offsets and resolves collisions against what is already placed:
//!
//!  - a candidate starting inside its predecessor is pushed to the predecessor's end,
//!  - a candidate reaching into its successor is truncated to end before it,
//!  - a candidate left without any chunks is discarded and a new one is drawn.
//!
//! This clusters coverage and makes no attempt at spreading it evenly across the device.

use std::collections::BTreeMap;
use std::slice;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::driver::Mode;
use crate::error::{Error, Result};

/// The unit all regions are aligned to and sized in.
pub const CHUNK_SIZE: u64 = 4096;

/// Upper bound of chunks per region in the [`Shape::Throughput`] shape.
pub const MAX_THROUGHPUT_CHUNKS: u16 = u8::MAX as u16;

/// A chunk-aligned byte range of `chunks * CHUNK_SIZE` bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Region {
    /// Start of the region, a multiple of [`CHUNK_SIZE`].
    pub offset: u64,
    /// Length of the region in chunks.
    pub chunks: u16,
}

impl Region {
    /// Creates a region at `offset` spanning `chunks` chunks.
    pub fn new(offset: u64, chunks: u16) -> Self {
        Self { offset, chunks }
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> u64 {
        self.chunks as u64 * CHUNK_SIZE
    }

    /// Returns `true` if the region spans no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    /// First byte past the region.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// How region spans are drawn.
///
/// The shape is fixed for the lifetime of a [`RegionAllocator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    /// Spans drawn uniformly from `1..=255` chunks, for aggregate throughput.
    Throughput,
    /// Every region spans exactly `chunks` chunks, for per-transaction latency.
    Fixed {
        /// Chunks per region.
        chunks: u16,
    },
}

impl Shape {
    /// The measurement mode this shape is built for.
    pub fn mode(self) -> Mode {
        match self {
            Shape::Throughput => Mode::Throughput,
            Shape::Fixed { .. } => Mode::ResponseTime,
        }
    }
}

/// An ordered, immutable collection of non-overlapping [`Region`]s.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegionSet {
    regions: Vec<Region>,
    covered: u64,
    max_chunks: u16,
}

impl RegionSet {
    /// Builds a set from arbitrary regions, validating alignment and overlap.
    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Result<Self> {
        let mut regions: Vec<_> = regions.into_iter().collect();
        regions.sort_unstable();

        let mut previous_end = 0;
        for region in &regions {
            let invalid = |reason| Error::InvalidRegion {
                offset: region.offset,
                chunks: region.chunks,
                reason,
            };

            if region.offset % CHUNK_SIZE != 0 {
                return Err(invalid("offset is not chunk aligned"));
            }
            if region.is_empty() {
                return Err(invalid("region is empty"));
            }
            if region.offset < previous_end {
                return Err(invalid("region overlaps its predecessor"));
            }
            previous_end = region.end();
        }

        Ok(Self::from_sorted(regions))
    }

    fn from_sorted(regions: Vec<Region>) -> Self {
        let covered = regions.iter().map(Region::len).sum();
        let max_chunks = regions.iter().map(|r| r.chunks).max().unwrap_or(0);

        Self {
            regions,
            covered,
            max_chunks,
        }
    }

    /// Number of regions in the set.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` if the set has no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns the region at `index` in offset order.
    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    /// Iterates the regions in offset order.
    pub fn iter(&self) -> slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Sum of all region lengths in bytes.
    pub fn covered_bytes(&self) -> u64 {
        self.covered
    }

    /// Largest chunk count of any region.
    pub fn max_chunks(&self) -> u16 {
        self.max_chunks
    }

    /// Largest region length in bytes, the size a scratch buffer needs.
    pub fn max_span(&self) -> usize {
        (self.max_chunks as u64 * CHUNK_SIZE) as usize
    }
}

impl<'a> IntoIterator for &'a RegionSet {
    type Item = &'a Region;
    type IntoIter = slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A region set under construction, keyed by offset.
#[derive(Debug, Default)]
struct Placement {
    regions: BTreeMap<u64, u16>,
}

impl Placement {
    fn insert(&mut self, region: Region) {
        self.regions.insert(region.offset, region.chunks);
    }

    /// Resolves `candidate` against the placed regions and inserts what is left of it.
    ///
    /// Returns the number of chunks placed, zero if the candidate was discarded.
    fn place(&mut self, candidate: Region, shape: Shape, limit: u64) -> u16 {
        let mut start = candidate.offset;
        if let Some((&offset, &chunks)) = self.regions.range(..=start).next_back() {
            let end = Region::new(offset, chunks).end();
            if end > start {
                start = end;
            }
        }

        let mut room = limit.saturating_sub(start) / CHUNK_SIZE;
        if let Some((&next, _)) = self.regions.range(start..).next() {
            room = room.min((next - start) / CHUNK_SIZE);
        }

        let chunks = match shape {
            Shape::Throughput => candidate.chunks.min(room.min(u16::MAX as u64) as u16),
            Shape::Fixed { chunks } if chunks as u64 <= room => chunks,
            Shape::Fixed { .. } => 0,
        };

        if chunks > 0 {
            self.insert(Region::new(start, chunks));
        }
        chunks
    }

    fn into_set(self) -> RegionSet {
        let regions = self
            .regions
            .into_iter()
            .map(|(offset, chunks)| Region::new(offset, chunks))
            .collect();

        RegionSet::from_sorted(regions)
    }
}

/// Builds and mutates [`RegionSet`]s for a device of a given size.
#[derive(Debug)]
pub struct RegionAllocator {
    device_size: u64,
    shape: Shape,
    rng: SmallRng,
}

impl RegionAllocator {
    /// Creates an allocator for a device of `device_size` bytes.
    ///
    /// The same seed produces the same sequence of region sets.
    pub fn new(device_size: u64, shape: Shape, seed: u64) -> Self {
        Self {
            device_size,
            shape,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// The shape regions are drawn in.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Size of the device regions are placed on.
    pub fn device_size(&self) -> u64 {
        self.device_size
    }

    /// The chunk-aligned end of the device, no region reaches past it.
    fn limit(&self) -> u64 {
        self.device_size - self.device_size % CHUNK_SIZE
    }

    fn max_misses(&self) -> u64 {
        (self.limit() / CHUNK_SIZE).max(1 << 16) * 4
    }

    /// Draws a random candidate with at most `max_chunks` chunks and tries to place it.
    fn place_one(&mut self, placement: &mut Placement, max_chunks: u16) -> u16 {
        if self.device_size == 0 {
            return 0;
        }

        let offset = self.rng.random_range(0..self.device_size);
        let offset = offset - offset % CHUNK_SIZE;
        let chunks = match self.shape {
            Shape::Throughput => self.rng.random_range(1..=MAX_THROUGHPUT_CHUNKS).min(max_chunks),
            Shape::Fixed { chunks } => chunks,
        };

        placement.place(Region::new(offset, chunks), self.shape, self.limit())
    }

    /// Builds a new set covering `percent` of the device.
    ///
    /// In the throughput shape the covered size ends up within one chunk above the requested
    /// size. Fixed-size regions can overshoot by up to one region.
    pub fn generate(&mut self, percent: f64) -> Result<RegionSet> {
        check_percent(percent)?;
        check_shape(self.shape)?;

        let wanted = ((self.device_size as f64 * percent / 100.0) as u64).min(self.limit());
        let max_misses = self.max_misses();

        let mut placement = Placement::default();
        let mut covered = 0;
        let mut misses = 0;
        while covered < wanted {
            let remaining = (wanted - covered).div_ceil(CHUNK_SIZE);
            let max_chunks = remaining.min(MAX_THROUGHPUT_CHUNKS as u64) as u16;

            match self.place_one(&mut placement, max_chunks) {
                0 => {
                    misses += 1;
                    if misses >= max_misses {
                        return Err(Error::AllocationExhausted { covered, wanted });
                    }
                }
                placed => {
                    misses = 0;
                    covered += placed as u64 * CHUNK_SIZE;
                }
            }
        }

        let set = placement.into_set();
        tracing::debug!(
            regions = set.len(),
            covered = set.covered_bytes(),
            wanted,
            "generated regions"
        );
        Ok(set)
    }

    /// Builds a new set from `current`, replacing each region with probability
    /// `percent_change / 100`.
    ///
    /// Kept regions are carried over unchanged; replacements are drawn fresh against them, so
    /// the result has the same number of regions and still never overlaps.
    pub fn update(&mut self, current: &RegionSet, percent_change: f64) -> Result<RegionSet> {
        check_percent(percent_change)?;
        check_shape(self.shape)?;

        let mut placement = Placement::default();
        let mut replace = 0;
        for region in current {
            if self.rng.random_bool(percent_change / 100.0) {
                replace += 1;
            } else {
                placement.insert(*region);
            }
        }

        let max_misses = self.max_misses();
        for _ in 0..replace {
            let mut misses = 0;
            while self.place_one(&mut placement, MAX_THROUGHPUT_CHUNKS) == 0 {
                misses += 1;
                if misses >= max_misses {
                    let covered = placement.regions.values().map(|&c| c as u64).sum::<u64>();
                    return Err(Error::AllocationExhausted {
                        covered: covered * CHUNK_SIZE,
                        wanted: current.covered_bytes(),
                    });
                }
            }
        }

        let set = placement.into_set();
        tracing::debug!(
            regions = set.len(),
            replaced = replace,
            covered = set.covered_bytes(),
            "updated regions"
        );
        Ok(set)
    }
}

fn check_percent(percent: f64) -> Result<()> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(Error::InvalidPercent(percent))
    }
}

fn check_shape(shape: Shape) -> Result<()> {
    match shape {
        Shape::Fixed { chunks: 0 } => Err(Error::EmptyShape),
        _ => Ok(()),
    }
}
