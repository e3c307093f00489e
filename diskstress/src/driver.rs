//! Run timed read or write passes from concurrent workers and aggregate their measurements.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use diskstress_io::{AccessStrategy, AlignedBuffer, BoxedHandle, StorageHandle, Target};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;

use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::region::RegionSet;

/// What a pass measures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Aggregate bytes moved per second.
    Throughput,
    /// Mean time per transaction.
    ResponseTime,
}

/// The direction of a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    /// Read regions into the scratch buffer.
    Read,
    /// Write the scratch buffer to regions.
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "read",
            Operation::Write => "write",
        })
    }
}

/// Runs passes over a shared [`RegionSet`].
///
/// Every pass opens one handle per worker. Workers run on their own blocking threads and only
/// share the read-only region set; replace the set with [`Driver::set_regions`] between passes.
#[derive(Debug)]
pub struct Driver {
    target: Target,
    regions: Arc<RegionSet>,
    mode: Mode,
    rng: SmallRng,
}

impl Driver {
    /// Creates a driver for `target` sampling from `regions`.
    pub fn new(target: Target, regions: Arc<RegionSet>, mode: Mode) -> Self {
        Self {
            target,
            regions,
            mode,
            rng: SmallRng::seed_from_u64(rand::random()),
        }
    }

    /// Seeds the generator that seeds every worker.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// The measurement mode of this driver.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The regions passes are sampled from.
    pub fn regions(&self) -> &Arc<RegionSet> {
        &self.regions
    }

    /// Swaps in a new region set for subsequent passes.
    pub fn set_regions(&mut self, regions: Arc<RegionSet>) {
        self.regions = regions;
    }

    /// Runs `workers` concurrent workers until `deadline` and combines their measurements.
    ///
    /// All handles are opened before the first worker starts, so an open failure aborts the
    /// pass without any I/O. Workers check the deadline between transfers, so the pass can
    /// overshoot it by up to one transfer. If any worker fails, the pass fails with the first
    /// error once all workers have stopped.
    pub async fn run(
        &mut self,
        deadline: Instant,
        operation: Operation,
        workers: usize,
        strategy: AccessStrategy,
    ) -> Result<Measurement> {
        if workers == 0 {
            return Err(Error::NoWorkers);
        }
        if self.regions.is_empty() {
            return Err(Error::EmptyRegionSet);
        }

        let handles = (0..workers)
            .map(|_| self.target.open(strategy))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            device = %self.target,
            %strategy,
            %operation,
            mode = ?self.mode,
            workers,
            regions = self.regions.len(),
            "starting pass"
        );

        let start = Instant::now();
        let tasks: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                let worker = Worker {
                    index,
                    handle,
                    regions: Arc::clone(&self.regions),
                    buffer: AlignedBuffer::new(self.regions.max_span(), strategy.alignment()),
                    rng: SmallRng::seed_from_u64(self.rng.next_u64()),
                    mode: self.mode,
                };
                tokio::task::spawn_blocking(move || worker.run(deadline, operation))
            })
            .collect();

        let finished_tasks = futures::future::join_all(tasks).await;
        let elapsed = start.elapsed();

        let mut measurement = Measurement::new(self.mode, operation, workers, elapsed);
        let mut failure = None;
        for (worker, task) in finished_tasks.into_iter().enumerate() {
            let result = match task {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => return Err(err.into()),
            };

            match result {
                Ok(report) => measurement.add(report),
                Err(err) => {
                    tracing::error!(
                        worker,
                        error = &err as &dyn std::error::Error,
                        "worker failed"
                    );
                    failure.get_or_insert(Error::Worker {
                        worker,
                        source: err,
                    });
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        tracing::info!(
            %measurement,
            bytes = measurement.bytes,
            transactions = measurement.transactions,
            "pass finished"
        );
        Ok(measurement)
    }
}

/// A single worker with exclusive ownership of its handle and scratch buffer.
struct Worker {
    index: usize,
    handle: BoxedHandle,
    regions: Arc<RegionSet>,
    buffer: AlignedBuffer,
    rng: SmallRng,
    mode: Mode,
}

/// Measurements of one worker over its own run time.
#[derive(Default)]
struct WorkerReport {
    bytes: u64,
    transactions: u64,
    elapsed: Duration,
    /// Transaction latencies in microseconds, only recorded in [`Mode::ResponseTime`].
    latency: DDSketch,
}

impl WorkerReport {
    /// Mean transaction latency of this worker in microseconds.
    fn mean_latency(&self) -> Option<f64> {
        let count = self.latency.count();
        if count == 0 {
            return None;
        }
        Some(self.latency.sum()? / count as f64)
    }
}

impl Worker {
    fn run(mut self, deadline: Instant, operation: Operation) -> diskstress_io::Result<WorkerReport> {
        if operation == Operation::Write {
            let len = self.buffer.len() as u64;
            Pattern::new(self.rng.next_u64(), len).fill(&mut self.buffer);
        }

        let start = Instant::now();
        let mut report = WorkerReport::default();
        loop {
            let transaction_start = Instant::now();
            if transaction_start >= deadline {
                break;
            }

            let index = self.rng.random_range(0..self.regions.len());
            let Some(&region) = self.regions.get(index) else {
                unreachable!("index drawn from the region count");
            };

            let buf = &mut self.buffer[..region.len() as usize];
            match operation {
                Operation::Read => self.handle.read_exact_at(buf, region.offset)?,
                Operation::Write => self.handle.write_all_at(buf, region.offset)?,
            }

            if self.mode == Mode::ResponseTime {
                report
                    .latency
                    .add(transaction_start.elapsed().as_secs_f64() * 1e6);
            }
            report.bytes += region.len();
            report.transactions += 1;
        }
        report.elapsed = start.elapsed();

        tracing::debug!(
            worker = self.index,
            bytes = report.bytes,
            transactions = report.transactions,
            "worker finished"
        );
        Ok(report)
    }
}

/// Combined measurements of all workers in a pass.
pub struct Measurement {
    /// What the pass measured.
    pub mode: Mode,
    /// The direction of the pass.
    pub operation: Operation,
    /// The number of workers.
    pub workers: usize,
    /// Wall-clock time from starting the first worker until the last one stopped.
    pub elapsed: Duration,
    /// Bytes moved by all workers.
    pub bytes: u64,
    /// Transfers completed by all workers.
    pub transactions: u64,
    /// Bytes per second of each worker over its own run time.
    pub worker_rates: Vec<f64>,
    /// Mean transaction latency of each worker that completed a transaction.
    pub worker_latencies: Vec<Duration>,
    /// Transaction latencies of all workers in microseconds, empty in [`Mode::Throughput`].
    pub latency: DDSketch,
}

impl Measurement {
    fn new(mode: Mode, operation: Operation, workers: usize, elapsed: Duration) -> Self {
        Self {
            mode,
            operation,
            workers,
            elapsed,
            bytes: 0,
            transactions: 0,
            worker_rates: Vec::with_capacity(workers),
            worker_latencies: Vec::with_capacity(workers),
            latency: DDSketch::default(),
        }
    }

    fn add(&mut self, report: WorkerReport) {
        let secs = report.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            report.bytes as f64 / secs
        } else {
            0.0
        };

        self.worker_rates.push(rate);
        if let Some(micros) = report.mean_latency() {
            self.worker_latencies
                .push(Duration::from_secs_f64(micros.max(0.0) / 1e6));
        }
        self.bytes += report.bytes;
        self.transactions += report.transactions;
        self.latency
            .merge(&report.latency)
            .expect("sketches share the default configuration");
    }

    /// Bytes moved per second of wall-clock time across all workers.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean of the per-worker mean transaction times.
    ///
    /// Every worker weighs the same regardless of how many transactions it completed. Workers
    /// without transactions are left out. Returns `None` in [`Mode::Throughput`] or if no
    /// transaction completed.
    pub fn mean_latency(&self) -> Option<Duration> {
        if self.worker_latencies.is_empty() {
            return None;
        }
        let total: Duration = self.worker_latencies.iter().sum();
        Some(total / self.worker_latencies.len() as u32)
    }

    /// The latency at quantile `q` (between 0 and 1).
    pub fn latency_quantile(&self, q: f64) -> Option<Duration> {
        let micros = self.latency.quantile(q).ok()??;
        Some(Duration::from_secs_f64(micros.max(0.0) / 1e6))
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("mode", &self.mode)
            .field("operation", &self.operation)
            .field("workers", &self.workers)
            .field("elapsed", &self.elapsed)
            .field("bytes", &self.bytes)
            .field("transactions", &self.transactions)
            .field("worker_rates", &self.worker_rates)
            .field("worker_latencies", &self.worker_latencies)
            .field("latency_samples", &self.latency.count())
            .finish()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Throughput => {
                let mb_per_sec = self.bytes_per_second() / (1024.0 * 1024.0);
                write!(f, "{mb_per_sec:.2} MB/s")
            }
            Mode::ResponseTime => match self.mean_latency() {
                Some(latency) => write!(f, "{:.1} us", latency.as_secs_f64() * 1e6),
                None => write!(f, "no transactions"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use diskstress_io::Error as StorageError;

    use super::*;
    use crate::region::{CHUNK_SIZE, Region};

    fn regions(regions: &[(u64, u16)]) -> Arc<RegionSet> {
        let regions = regions
            .iter()
            .map(|&(chunk, chunks)| Region::new(chunk * CHUNK_SIZE, chunks));
        Arc::new(RegionSet::from_regions(regions).unwrap())
    }

    fn deadline(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn response_time_on_memory() {
        diskstress_test::tracing::init();

        let target = Target::Memory {
            size: 16 * CHUNK_SIZE,
        };
        let mut driver = Driver::new(target, regions(&[(0, 1), (4, 1), (9, 1)]), Mode::ResponseTime)
            .with_seed(1);

        let measurement = driver
            .run(deadline(100), Operation::Read, 1, AccessStrategy::Unbuffered)
            .await
            .unwrap();

        assert!(measurement.transactions > 0);
        assert_eq!(measurement.latency.count() as u64, measurement.transactions);
        assert_eq!(measurement.worker_latencies.len(), 1);
        let latency = measurement.mean_latency().unwrap();
        assert!(latency > Duration::ZERO);
        assert!(measurement.to_string().ends_with(" us"));
    }

    fn report(transactions: u64, micros: f64) -> WorkerReport {
        let mut report = WorkerReport {
            bytes: transactions * CHUNK_SIZE,
            transactions,
            elapsed: Duration::from_secs(1),
            ..Default::default()
        };
        for _ in 0..transactions {
            report.latency.add(micros);
        }
        report
    }

    #[test]
    fn workers_weigh_equally_in_mean_latency() {
        let mut measurement =
            Measurement::new(Mode::ResponseTime, Operation::Read, 3, Duration::from_secs(1));
        measurement.add(report(10, 10.0));
        measurement.add(report(1, 1000.0));
        measurement.add(report(0, 0.0));

        assert_eq!(measurement.transactions, 11);
        assert_eq!(measurement.worker_rates.len(), 3);
        assert_eq!(measurement.worker_latencies.len(), 2);
        assert_eq!(measurement.latency.count(), 11);

        let micros = measurement.mean_latency().unwrap().as_secs_f64() * 1e6;
        assert!((micros - 505.0).abs() < 0.01, "{micros}");
        assert_eq!(measurement.to_string(), "505.0 us");
    }

    #[tokio::test]
    async fn throughput_on_memory() {
        let target = Target::Memory {
            size: 1024 * CHUNK_SIZE,
        };
        let mut driver =
            Driver::new(target, regions(&[(0, 255), (300, 17), (600, 100)]), Mode::Throughput);

        let measurement = driver
            .run(deadline(50), Operation::Write, 4, AccessStrategy::Buffered)
            .await
            .unwrap();

        assert_eq!(measurement.workers, 4);
        assert_eq!(measurement.worker_rates.len(), 4);
        assert!(measurement.bytes > 0);
        assert_eq!(measurement.bytes % CHUNK_SIZE, 0);
        assert!(measurement.bytes_per_second() > 0.0);
        assert_eq!(measurement.mean_latency(), None);
        assert!(measurement.to_string().ends_with(" MB/s"));
    }

    #[tokio::test]
    async fn runs_against_files() {
        let file = diskstress_test::sized_tempfile(64 * CHUNK_SIZE);
        let target = Target::Path(file.path().into());

        for strategy in [AccessStrategy::Buffered, AccessStrategy::Unbuffered] {
            let mut driver = Driver::new(target.clone(), regions(&[(1, 8), (20, 30)]), Mode::Throughput);
            for operation in [Operation::Write, Operation::Read] {
                let measurement = driver.run(deadline(30), operation, 2, strategy).await.unwrap();
                assert!(measurement.transactions > 0, "{strategy} {operation}");
            }
        }
    }

    #[tokio::test]
    async fn out_of_bounds_fails_the_pass() {
        diskstress_test::tracing::init();

        // the region set was built for a larger device
        let target = Target::Memory {
            size: 4 * CHUNK_SIZE,
        };
        let mut driver = Driver::new(target, regions(&[(10, 2)]), Mode::Throughput);

        let err = driver
            .run(deadline(50), Operation::Read, 3, AccessStrategy::Unbuffered)
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                Error::Worker {
                    source: StorageError::OutOfBounds { .. },
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn open_failure_aborts_before_workers() {
        let target = Target::Path("/nonexistent/diskstress-device".into());
        let mut driver = Driver::new(target, regions(&[(0, 1)]), Mode::Throughput);

        let err = driver
            .run(deadline(1000), Operation::Read, 2, AccessStrategy::Unbuffered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Open { .. })), "{err:?}");
    }

    #[tokio::test]
    async fn rejects_empty_runs() {
        let target = Target::Memory { size: CHUNK_SIZE };
        let mut driver = Driver::new(target, Arc::default(), Mode::Throughput);

        let err = driver
            .run(deadline(10), Operation::Read, 1, AccessStrategy::Unbuffered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyRegionSet));

        driver.set_regions(regions(&[(0, 1)]));
        let err = driver
            .run(deadline(10), Operation::Read, 0, AccessStrategy::Unbuffered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoWorkers));
    }

    #[tokio::test]
    async fn expired_deadline_moves_nothing() {
        let target = Target::Memory {
            size: 4 * CHUNK_SIZE,
        };
        let mut driver = Driver::new(target, regions(&[(0, 1)]), Mode::ResponseTime);

        let measurement = driver
            .run(Instant::now(), Operation::Write, 2, AccessStrategy::Unbuffered)
            .await
            .unwrap();
        assert_eq!(measurement.transactions, 0);
        assert_eq!(measurement.mean_latency(), None);
        assert_eq!(measurement.to_string(), "no transactions");
    }
}
