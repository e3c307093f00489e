//! Log capture for tests.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Directives used unless `RUST_LOG` is set.
///
/// Transfers log at `TRACE` and would drown a pass in output, so our crates stop at `DEBUG`.
const DEFAULT_DIRECTIVES: &str = "warn,diskstress=debug,diskstress_io=debug";

/// Captures logs through the test harness so they only show for failing tests.
///
/// Workers run on blocking threads, so every line carries the thread name. Set `RUST_LOG` to
/// replace the default directives, for instance `RUST_LOG=diskstress_io=trace` to see every
/// transfer.
///
/// Calling this more than once is harmless; only the first call installs a subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .without_time()
        .try_init();
}
