//! A sequence of passes against one device sharing the allocator and the current region set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use diskstress_io::{AccessStrategy, Target};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::cache;
use crate::driver::{Driver, Measurement, Operation};
use crate::error::Result;
use crate::region::{RegionAllocator, RegionSet, Shape};
use crate::verify::{self, VerifyReport};

/// Number of workers used when none are configured.
pub const DEFAULT_WORKERS: usize = 10;

/// Share of the device covered by regions when nothing else is configured.
pub const DEFAULT_PERCENT: f64 = 10.0;

/// A builder for opening a [`Session`].
#[derive(Debug)]
pub struct SessionBuilder {
    target: Target,
    strategy: AccessStrategy,
    workers: usize,
    percent: f64,
    shape: Shape,
    seed: u64,
}

impl SessionBuilder {
    /// How passes access the device.
    pub fn strategy(mut self, strategy: AccessStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The number of concurrent workers per pass.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Share of the device the initial region set covers, in percent.
    pub fn percent(mut self, percent: f64) -> Self {
        self.percent = percent;
        self
    }

    /// How region spans are drawn, which also selects the measurement mode.
    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Makes region placement and worker sampling reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Probes the device and generates the initial region set.
    ///
    /// Fails if the device cannot be opened with the configured strategy, before any pass runs.
    pub fn open(self) -> Result<Session> {
        let probe = self.target.open(self.strategy)?;
        let device_size = probe.size();
        let block_size = probe.block_size();
        drop(probe);

        tracing::info!(
            device = %self.target,
            device_size,
            block_size,
            strategy = %self.strategy,
            "opened device"
        );

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut allocator = RegionAllocator::new(device_size, self.shape, rng.next_u64());
        let regions = allocator.generate(self.percent)?;
        let driver = Driver::new(self.target.clone(), Arc::new(regions), self.shape.mode())
            .with_seed(rng.next_u64());

        Ok(Session {
            target: self.target,
            device_size,
            block_size,
            strategy: self.strategy,
            workers: self.workers,
            percent: self.percent,
            allocator,
            driver,
            rng,
        })
    }
}

/// An open device together with the state carried from one pass to the next.
///
/// Steps that change the region set replace it as a whole, so a pass always samples from one
/// consistent set.
#[derive(Debug)]
pub struct Session {
    target: Target,
    device_size: u64,
    block_size: u64,
    strategy: AccessStrategy,
    workers: usize,
    percent: f64,
    allocator: RegionAllocator,
    driver: Driver,
    rng: SmallRng,
}

impl Session {
    /// Constructs a new session builder for the given device.
    pub fn builder(target: Target) -> SessionBuilder {
        SessionBuilder {
            target,
            strategy: AccessStrategy::default(),
            workers: DEFAULT_WORKERS,
            percent: DEFAULT_PERCENT,
            shape: Shape::Throughput,
            seed: rand::random(),
        }
    }

    /// The device under test.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Size of the device in bytes, as probed when the session was opened.
    pub fn device_size(&self) -> u64 {
        self.device_size
    }

    /// Block size of the device in bytes, as probed when the session was opened.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// The access strategy of subsequent passes.
    pub fn strategy(&self) -> AccessStrategy {
        self.strategy
    }

    /// The number of workers of subsequent passes.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The current region shape.
    pub fn shape(&self) -> Shape {
        self.allocator.shape()
    }

    /// The regions subsequent passes sample from.
    pub fn regions(&self) -> &RegionSet {
        self.driver.regions()
    }

    /// Switches the access strategy for subsequent passes.
    pub fn set_strategy(&mut self, strategy: AccessStrategy) {
        self.strategy = strategy;
    }

    /// Changes the number of workers for subsequent passes.
    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers;
    }

    /// Switches to a new region shape and generates a fresh set at the current coverage.
    pub fn set_shape(&mut self, shape: Shape) -> Result<&RegionSet> {
        let mut allocator = RegionAllocator::new(self.device_size, shape, self.rng.next_u64());
        let regions = allocator.generate(self.percent)?;

        self.allocator = allocator;
        self.driver = Driver::new(self.target.clone(), Arc::new(regions), shape.mode())
            .with_seed(self.rng.next_u64());
        Ok(self.regions())
    }

    /// Replaces the region set with a fresh one covering `percent` of the device.
    pub fn generate(&mut self, percent: f64) -> Result<&RegionSet> {
        let regions = self.allocator.generate(percent)?;
        self.percent = percent;
        self.driver.set_regions(Arc::new(regions));
        Ok(self.regions())
    }

    /// Replaces about `percent_change` percent of the current regions with new ones.
    pub fn update(&mut self, percent_change: f64) -> Result<&RegionSet> {
        let regions = self.allocator.update(self.driver.regions(), percent_change)?;
        self.driver.set_regions(Arc::new(regions));
        Ok(self.regions())
    }

    /// Runs a timed pass over the current regions.
    pub async fn pass(&mut self, operation: Operation, duration: Duration) -> Result<Measurement> {
        let deadline = Instant::now() + duration;
        self.driver
            .run(deadline, operation, self.workers, self.strategy)
            .await
    }

    /// Reads unrelated data through the page cache for `duration`, returning the bytes read.
    pub async fn clear_cache(&mut self, duration: Duration) -> Result<u64> {
        let deadline = Instant::now() + duration;
        let target = self.target.clone();
        let seed = self.rng.next_u64();

        tokio::task::spawn_blocking(move || cache::clear_cache(&target, deadline, seed)).await?
    }

    /// Writes a pattern keyed by `tag` to every region and reads it back.
    ///
    /// Uses a single handle with the current strategy. For devices on disk the kernel page cache
    /// is dropped before reading back where permitted, so the data comes from the device.
    pub async fn verify(&mut self, tag: u64) -> Result<VerifyReport> {
        let target = self.target.clone();
        let strategy = self.strategy;
        let regions = Arc::clone(self.driver.regions());

        tokio::task::spawn_blocking(move || {
            let mut handle = target.open(strategy)?;
            verify::verify_with(&mut handle, &regions, tag, || {
                if !matches!(target, Target::Path(_)) {
                    return;
                }
                if let Err(err) = cache::drop_page_cache() {
                    tracing::debug!(
                        error = &err as &dyn std::error::Error,
                        "could not drop the page cache"
                    );
                }
            })
        })
        .await?
    }
}
