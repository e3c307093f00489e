//! Run the configured steps against a device and print results.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use yansi::Paint;

use crate::config::{Config, Step};
use crate::driver::{Measurement, Mode, Operation};
use crate::region::{RegionSet, Shape};
use crate::session::Session;

/// Opens the configured device and runs all steps in order.
///
/// A failing step is reported and the remaining steps still run. Returns an error if the device
/// cannot be opened or if any step failed.
pub async fn run(config: Config) -> Result<()> {
    let device = config
        .device
        .as_ref()
        .context("no device configured, pass one to `run` or set `device` in the configuration")?;

    let mut builder = Session::builder(device.target())
        .strategy(config.strategy)
        .workers(config.workers)
        .percent(config.percent)
        .shape(config.shape);
    if let Some(seed) = config.seed {
        builder = builder.seed(seed);
    }
    let mut session = builder.open().context("failed to open the device")?;

    println!(
        "{} {} ({}, block size {})",
        "## Device".bold(),
        session.target().bold().blue(),
        ByteSize::b(session.device_size()).bold(),
        session.block_size()
    );
    print_regions(session.regions(), session.device_size());

    let mut failures = 0;
    for (index, step) in config.steps.iter().enumerate() {
        println!();
        println!(
            "{} {} (strategy: {}, workers: {})",
            format!("## Step {}:", index + 1).bold(),
            step.bold().blue(),
            session.strategy(),
            session.workers().bold()
        );

        if let Err(err) = run_step(&mut session, step).await {
            tracing::error!(
                %step,
                error = &*err as &dyn std::error::Error,
                "step failed"
            );
            println!("{} {err:#}", "Failed:".bold().red());
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} steps failed", config.steps.len());
    }

    Ok(())
}

async fn run_step(session: &mut Session, step: &Step) -> Result<()> {
    let device_size = session.device_size();

    match *step {
        Step::Generate { percent } => print_regions(session.generate(percent)?, device_size),
        Step::Update { percent } => print_regions(session.update(percent)?, device_size),
        Step::Write { duration } => run_pass(session, Operation::Write, duration).await?,
        Step::Read { duration } => run_pass(session, Operation::Read, duration).await?,
        Step::CacheClear { duration } => {
            let bar = spinner("Clearing cache:")?;
            let result = session.clear_cache(duration).await;
            bar.finish_and_clear();

            println!("{} read {}", "done:".bold().green(), ByteSize::b(result?));
        }
        Step::Sleep { duration } => tokio::time::sleep(duration).await,
        Step::Strategy { strategy } => session.set_strategy(strategy),
        Step::Workers { count } => session.set_workers(count),
        Step::Throughput => print_regions(session.set_shape(Shape::Throughput)?, device_size),
        Step::ResponseTime { chunks } => {
            print_regions(session.set_shape(Shape::Fixed { chunks })?, device_size)
        }
        Step::Verify { tag } => {
            let bar = spinner("Verifying:")?;
            let result = session.verify(tag).await;
            bar.finish_and_clear();

            let report = result?;
            println!(
                "{} {} regions, {} in {:.2?}",
                "done:".bold().green(),
                report.regions.bold(),
                ByteSize::b(report.bytes),
                report.elapsed
            );
        }
    }

    Ok(())
}

async fn run_pass(session: &mut Session, operation: Operation, duration: Duration) -> Result<()> {
    let bar = spinner(format!("Running {operation} pass:"))?;
    let result = session.pass(operation, duration).await;
    bar.finish_and_clear();

    print_measurement(&result?);
    Ok(())
}

fn spinner(message: impl Into<Cow<'static, str>>) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn print_regions(regions: &RegionSet, device_size: u64) {
    let percent = if device_size > 0 {
        regions.covered_bytes() as f64 * 100.0 / device_size as f64
    } else {
        0.0
    };

    println!(
        "  {} regions covering {} ({percent:.2}%), largest {}",
        regions.len().bold(),
        ByteSize::b(regions.covered_bytes()),
        ByteSize::b(regions.max_span() as u64)
    );
}

fn print_measurement(measurement: &Measurement) {
    println!("{} {}", "done:".bold().green(), measurement.bold());
    print!(
        "  {} transactions, {} in {:.2?}",
        measurement.transactions,
        ByteSize::b(measurement.bytes),
        measurement.elapsed
    );

    match measurement.mode {
        Mode::Throughput => {
            let rates = measurement.worker_rates.iter().copied();
            let slowest = rates.clone().fold(f64::INFINITY, f64::min);
            let fastest = rates.fold(0.0, f64::max);
            println!(
                "; per worker {}/s to {}/s",
                ByteSize::b(slowest as u64),
                ByteSize::b(fastest as u64)
            );
        }
        Mode::ResponseTime => {
            println!();
            print_percentiles(measurement);
        }
    }
}

fn print_percentiles(measurement: &Measurement) {
    let quantiles = (
        measurement.latency_quantile(0.5),
        measurement.latency_quantile(0.9),
        measurement.latency_quantile(0.99),
    );
    let (Some(p50), Some(p90), Some(p99)) = quantiles else {
        return;
    };

    println!("  p50: {:.2?}; p90: {p90:.2?}; p99: {p99:.2?}", p50.bold());
}
