//! Configuration for a diskstress run.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `DS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested structures, for example
//! `DS__DEVICE__TYPE=file` and `DS__DEVICE__PATH=/dev/sdb`. The list of steps can only be given in
//! the YAML file:
//!
//! ```yaml
//! device:
//!   type: file
//!   path: /dev/sdb
//! strategy: direct
//! workers: 4
//! percent: 25
//!
//! steps:
//!   - action: write
//!     duration: 30s
//!   - action: cache_clear
//!     duration: 10s
//!   - action: read
//!     duration: 30s
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use diskstress_io::{AccessStrategy, Target};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::region::Shape;
use crate::session::{DEFAULT_PERCENT, DEFAULT_WORKERS};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "DS__";

/// The device under test.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines the variant.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Device {
    /// A block device or regular file (type `"file"`).
    ///
    /// The file must exist and must not be empty. Everything on it may be overwritten.
    File {
        /// Path to the device node or file.
        path: PathBuf,
    },

    /// A zeroed in-memory device (type `"memory"`), to try out a configuration.
    Memory {
        /// Size of the device, such as `64 MiB`.
        size: ByteSize,
    },
}

impl Device {
    /// The storage target this device refers to.
    pub fn target(&self) -> Target {
        match self {
            Device::File { path } => Target::Path(path.clone()),
            Device::Memory { size } => Target::Memory { size: size.as_u64() },
        }
    }
}

/// A single step of a run, executed in order.
///
/// The `action` field selects the variant.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Replaces the region set with one covering `percent` of the device.
    Generate {
        /// Coverage in percent, between 0 and 100.
        percent: f64,
    },
    /// Replaces `percent` of the current regions with new ones.
    Update {
        /// Share of regions to replace, between 0 and 100.
        percent: f64,
    },
    /// Writes regions for `duration`.
    Write {
        /// Length of the pass.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// Reads regions for `duration`.
    Read {
        /// Length of the pass.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// Reads unrelated data through the page cache for `duration`.
    CacheClear {
        /// How long to keep reading.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// Pauses for `duration`.
    Sleep {
        /// How long to pause.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// Switches the access strategy of later passes.
    Strategy {
        /// The new strategy.
        strategy: AccessStrategy,
    },
    /// Changes the number of workers of later passes.
    Workers {
        /// The new number of workers.
        count: usize,
    },
    /// Switches to throughput regions and regenerates the region set.
    Throughput,
    /// Switches to fixed-size regions for response time and regenerates the region set.
    ResponseTime {
        /// Chunks per region.
        chunks: u16,
    },
    /// Writes a pattern to every region and reads it back.
    Verify {
        /// Key of the pattern, change it to tell runs apart.
        tag: u64,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Generate { percent } => write!(f, "generate {percent}%"),
            Step::Update { percent } => write!(f, "update {percent}%"),
            Step::Write { duration } => write!(f, "write for {duration:?}"),
            Step::Read { duration } => write!(f, "read for {duration:?}"),
            Step::CacheClear { duration } => write!(f, "clear cache for {duration:?}"),
            Step::Sleep { duration } => write!(f, "sleep for {duration:?}"),
            Step::Strategy { strategy } => write!(f, "strategy {strategy}"),
            Step::Workers { count } => write!(f, "{count} workers"),
            Step::Throughput => write!(f, "throughput regions"),
            Step::ResponseTime { chunks } => write!(f, "response time regions of {chunks} chunks"),
            Step::Verify { tag } => write!(f, "verify with tag {tag}"),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY. Parsing ignores case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        })
    }
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, results go to stdout.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Per-transfer logs are emitted at `TRACE` and slow down passes considerably. The
    /// `RUST_LOG` environment variable provides more granular control per module.
    ///
    /// # Default
    ///
    /// `WARN`
    ///
    /// # Environment Variable
    ///
    /// `DS__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Environment Variable
    ///
    /// `DS__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for a run.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// The device under test. Can also be passed on the command line.
    ///
    /// # Environment Variables
    ///
    /// - `DS__DEVICE__TYPE=file`
    /// - `DS__DEVICE__PATH=/dev/sdb`
    pub device: Option<Device>,

    /// How passes access the device, one of `buffered`, `unbuffered` or `direct`.
    ///
    /// # Default
    ///
    /// `unbuffered`
    pub strategy: AccessStrategy,

    /// Number of concurrent workers per pass.
    ///
    /// # Default
    ///
    /// `10`
    pub workers: usize,

    /// Share of the device covered by the initial region set, in percent.
    ///
    /// # Default
    ///
    /// `10`
    pub percent: f64,

    /// Initial region shape, `type: throughput` or `type: fixed` with `chunks`.
    pub shape: Shape,

    /// Seed for region placement and sampling. Random if unset.
    pub seed: Option<u64>,

    /// Logging configuration.
    pub logging: Logging,

    /// Steps to run in order.
    ///
    /// # Default
    ///
    /// A write pass, a cache clear and a read pass.
    pub steps: Vec<Step>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            strategy: AccessStrategy::default(),
            workers: DEFAULT_WORKERS,
            percent: DEFAULT_PERCENT,
            shape: Shape::Throughput,
            seed: None,
            logging: Logging::default(),
            steps: vec![
                Step::Write {
                    duration: Duration::from_secs(10),
                },
                Step::CacheClear {
                    duration: Duration::from_secs(5),
                },
                Step::Read {
                    duration: Duration::from_secs(10),
                },
            ],
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file, and the environment.
    ///
    /// Later sources override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if any value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.device, None);
            assert_eq!(config.strategy, AccessStrategy::Unbuffered);
            assert_eq!(config.workers, 10);
            assert_eq!(config.shape, Shape::Throughput);
            assert_eq!(config.logging.level, LevelFilter::WARN);
            assert_eq!(config.steps.len(), 3);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DS__DEVICE__TYPE", "file");
            jail.set_env("DS__DEVICE__PATH", "/dev/sdb");
            jail.set_env("DS__STRATEGY", "direct");
            jail.set_env("DS__WORKERS", "4");
            jail.set_env("DS__SHAPE__TYPE", "fixed");
            jail.set_env("DS__SHAPE__CHUNKS", "2");
            jail.set_env("DS__SEED", "1234");
            jail.set_env("DS__LOGGING__LEVEL", "debug");
            jail.set_env("DS__LOGGING__FORMAT", "json");

            let config = Config::load(None).unwrap();

            assert_eq!(
                dbg!(&config).device,
                Some(Device::File {
                    path: "/dev/sdb".into()
                })
            );
            assert_eq!(config.strategy, AccessStrategy::Direct);
            assert_eq!(config.workers, 4);
            assert_eq!(config.shape, Shape::Fixed { chunks: 2 });
            assert_eq!(config.seed, Some(1234));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn log_format_ignores_case() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Auto);
        let err = "colour".parse::<LogFormat>().unwrap_err();
        assert!(err.to_string().contains(r#""colour""#));

        figment::Jail::expect_with(|jail| {
            jail.set_env("DS__LOGGING__FORMAT", "Pretty");
            let config = Config::load(None).unwrap();
            assert_eq!(config.logging.format, LogFormat::Pretty);

            jail.set_env("DS__LOGGING__FORMAT", "xml");
            assert!(Config::load(None).is_err());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            device:
                type: memory
                size: 64 MiB
            percent: 50
            steps:
                - action: generate
                  percent: 20
                - action: workers
                  count: 2
                - action: strategy
                  strategy: buffered
                - action: write
                  duration: 1s
                - action: cache_clear
                  duration: 500ms
                - action: response_time
                  chunks: 1
                - action: read
                  duration: 2m
                - action: throughput
                - action: verify
                  tag: 7
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                dbg!(&config).device,
                Some(Device::Memory {
                    size: ByteSize::mib(64)
                })
            );
            assert_eq!(config.percent, 50.0);
            assert_eq!(
                config.steps,
                [
                    Step::Generate { percent: 20.0 },
                    Step::Workers { count: 2 },
                    Step::Strategy {
                        strategy: AccessStrategy::Buffered
                    },
                    Step::Write {
                        duration: Duration::from_secs(1)
                    },
                    Step::CacheClear {
                        duration: Duration::from_millis(500)
                    },
                    Step::ResponseTime { chunks: 1 },
                    Step::Read {
                        duration: Duration::from_secs(120)
                    },
                    Step::Throughput,
                    Step::Verify { tag: 7 },
                ]
            );

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            device:
                type: file
                path: /dev/sdb
            workers: 3
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("DS__DEVICE__PATH", "/dev/sdc");

            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                config.device,
                Some(Device::File {
                    path: "/dev/sdc".into()
                })
            );
            assert_eq!(config.workers, 3);

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_actions() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            steps:
                - action: defragment
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            assert!(Config::load(Some(tempfile.path())).is_err());
            Ok(())
        });
    }

    #[test]
    fn memory_device_target() {
        let device = Device::Memory {
            size: ByteSize::kib(8),
        };
        assert_eq!(device.target(), Target::Memory { size: 8192 });
    }
}
