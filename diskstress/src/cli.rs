//! Command line entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use crate::config::{Config, Device};
use crate::{observability, plan};

/// Storage device exerciser measuring throughput and response time.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// run the configured steps against a device
///
/// Everything on the device may be overwritten by write passes.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// block device or file to test, overrides the configured device
    #[argh(positional)]
    device: Option<PathBuf>,
}

/// print the diskstress version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let device = match args.command {
        Command::Version(VersionCommand {}) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(RunCommand { device }) => device,
    };

    let mut config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = device {
        config.device = Some(Device::File { path });
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(plan::run(config))
}
