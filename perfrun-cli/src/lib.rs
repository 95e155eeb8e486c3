#![warn(missing_docs)]
//! perfrun CLI Library
//!
//! Command-line front-end shared by every benchmark binary. The same binary
//! plays two roles:
//! - **supervisor** (default): spawns `processes` workers one after the other
//!   and merges their runs
//! - **worker** (`--worker`): measures one run and writes it as JSON to stdout
//!
//! # Example
//!
//! ```ignore
//! use perfrun::Runner;
//!
//! fn main() {
//!     let mut runner = Runner::new("sum_1000").unwrap_or_else(|e| e.exit());
//!     if let Err(e) = runner.bench_func(|| (0..1000u64).sum::<u64>()) {
//!         e.exit();
//!     }
//! }
//! ```

mod config;
mod display;
mod metadata;
mod progress;
mod runner;
mod supervisor;

pub use config::*;
pub use display::*;
pub use metadata::collect_metadata;
pub use runner::{Runner, RunnerDefaults};
pub use supervisor::*;

use clap::Parser;
use perfrun_core::{MeasureMode, WorkerError};
use perfrun_ipc::{BenchmarkError, FormatError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Exit code used when the run was interrupted by SIGINT/SIGTERM
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// perfrun CLI arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Benchmark")]
pub struct Cli {
    /// Spend longer running tests to get more accurate results
    #[arg(long, conflicts_with_all = ["fast", "debug_single_sample"])]
    pub rigorous: bool,

    /// Get rough answers quickly
    #[arg(long, conflicts_with = "debug_single_sample")]
    pub fast: bool,

    /// Debug mode, only collect a single sample
    #[arg(long)]
    pub debug_single_sample: bool,

    /// Number of processes used to run benchmarks
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub processes: Option<u64>,

    /// Number of samples per process
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub samples: Option<u64>,

    /// Number of skipped samples per run used to warmup the benchmark
    #[arg(short = 'w', long)]
    pub warmups: Option<u64>,

    /// Number of loops per sample, 0 means automatic calibration
    #[arg(short = 'l', long)]
    pub loops: Option<u64>,

    /// Enable verbose mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable quiet mode
    #[arg(short, long)]
    pub quiet: bool,

    /// Write results encoded to JSON into stdout
    #[arg(long)]
    pub stdout: bool,

    /// Write results encoded to JSON into FILENAME
    #[arg(short, long, value_name = "FILENAME")]
    pub output: Option<PathBuf>,

    /// Append results encoded to JSON into FILENAME
    #[arg(long, value_name = "FILENAME")]
    pub append: Option<PathBuf>,

    /// Minimum duration in seconds of a single sample, used to calibrate the
    /// number of loops
    #[arg(long)]
    pub min_time: Option<f64>,

    /// Worker process, run the benchmark
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Display benchmark run results
    #[arg(short, long)]
    pub dump: bool,

    /// Show metadata
    #[arg(short, long)]
    pub metadata: bool,

    /// Display statistics (min, max, ...)
    #[arg(short = 't', long)]
    pub stats: bool,

    /// CPUs worker processes are pinned to. By default, workers are pinned to
    /// isolated CPUs if isolated CPUs are found.
    #[arg(long, value_name = "CPU_LIST")]
    pub affinity: Option<String>,

    /// Comma-separated list of environment variables inherited by worker
    /// processes
    #[arg(long, value_name = "VARS", value_delimiter = ',')]
    pub inherit_environ: Vec<String>,

    /// Trace heap allocations (requires perfrun::TrackingAllocator)
    #[arg(long, conflicts_with = "track_memory")]
    pub tracemalloc: bool,

    /// Track memory usage using a thread
    #[arg(long)]
    pub track_memory: bool,

    /// Kill a worker running longer than this (e.g., "90s", "5m")
    #[arg(long, value_name = "DURATION")]
    pub worker_timeout: Option<String>,

    /// Internal: Absorb cargo bench's --bench flag
    #[arg(long, hide = true)]
    pub bench: bool,
}

/// Effective settings: CLI flags over `perfrun.toml` over runner defaults,
/// with presets applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Worker processes
    pub processes: u64,
    /// Samples per process
    pub samples: u64,
    /// Warmups per process
    pub warmups: u64,
    /// Loops per sample, 0 calibrates
    pub loops: u64,
    /// Calibration threshold in seconds
    pub min_time: f64,
    /// Verbose output; always false in quiet mode
    pub verbose: bool,
    /// Quiet output
    pub quiet: bool,
    /// JSON on stdout, text on stderr
    pub stdout: bool,
    /// Output file, must not exist
    pub output: Option<PathBuf>,
    /// File runs are appended to
    pub append: Option<PathBuf>,
    /// Worker mode
    pub worker: bool,
    /// Display options
    pub display: DisplayOptions,
    /// CPU list, explicit or discovered
    pub affinity: Option<String>,
    /// Variables passed to workers on top of the defaults
    pub inherit_environ: Vec<String>,
    /// Timing or memory
    pub mode: MeasureMode,
    /// Per-worker timeout
    pub worker_timeout: Option<Duration>,
}

impl Settings {
    /// Resolve settings and check them before anything runs.
    pub fn resolve(
        cli: &Cli,
        config: &RunnerConfig,
        defaults: &RunnerDefaults,
    ) -> Result<Self, ConfigError> {
        // Presets scale the configured values, not the explicit flags
        let base_processes = config.processes.unwrap_or(defaults.processes);
        let base_samples = config.samples.unwrap_or(defaults.samples);

        let mut processes = cli.processes.unwrap_or(base_processes);
        let mut samples = cli.samples.unwrap_or(base_samples);
        let mut warmups = cli.warmups.or(config.warmups).unwrap_or(defaults.warmups);
        let mut loops = cli.loops.or(config.loops).unwrap_or(defaults.loops);
        let mut min_time = cli.min_time.or(config.min_time).unwrap_or(defaults.min_time);

        if cli.rigorous {
            processes = base_processes.saturating_mul(2);
        } else if cli.fast {
            processes = (base_processes / 2).max(3);
            samples = (base_samples.saturating_mul(2) / 3).max(2);
        } else if cli.debug_single_sample {
            processes = 1;
            warmups = 0;
            samples = 1;
            loops = 1;
            min_time = 1e-9;
        }

        if processes == 0 {
            return Err(ConfigError::Invalid("processes must be >= 1".into()));
        }
        if samples == 0 {
            return Err(ConfigError::Invalid("samples must be >= 1".into()));
        }
        if !(min_time.is_finite() && min_time > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "min_time must be a positive number of seconds, got {min_time}"
            )));
        }

        if let Some(path) = &cli.output {
            if path.exists() {
                return Err(ConfigError::OutputExists(path.clone()));
            }
        }

        let mode = if cli.tracemalloc {
            MeasureMode::TraceAllocations
        } else if cli.track_memory {
            MeasureMode::TrackMemory
        } else {
            MeasureMode::Timing
        };

        let worker_timeout = match cli.worker_timeout.as_deref() {
            Some(text) => Some(
                PerfConfig::parse_duration(text)
                    .map(Duration::from_nanos)
                    .map_err(|e| ConfigError::Invalid(format!("invalid --worker-timeout: {e}")))?,
            ),
            None => config
                .worker_timeout()
                .map_err(|e| ConfigError::Invalid(format!("invalid worker_timeout: {e}")))?,
        };

        let mut inherit_environ = config.inherit_environ.clone();
        inherit_environ.extend(cli.inherit_environ.iter().filter(|v| !v.is_empty()).cloned());

        Ok(Self {
            processes,
            samples,
            warmups,
            loops,
            min_time,
            verbose: cli.verbose && !cli.quiet,
            quiet: cli.quiet,
            stdout: cli.stdout,
            output: cli.output.clone(),
            append: cli.append.clone(),
            worker: cli.worker,
            display: DisplayOptions {
                dump: cli.dump,
                metadata: cli.metadata,
                stats: cli.stats,
                check_unstable: !cli.quiet,
            },
            affinity: cli.affinity.clone().or_else(|| config.affinity.clone()),
            inherit_environ,
            mode,
            worker_timeout,
        })
    }

    /// Flag name of the memory mode, for messages
    pub fn mode_flag(&self) -> &'static str {
        match self.mode {
            MeasureMode::Timing => "",
            MeasureMode::TrackMemory => "--track-memory",
            MeasureMode::TraceAllocations => "--tracemalloc",
        }
    }
}

/// Everything that can stop a benchmark binary
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Bad command line, or `--help` / `--version`
    #[error(transparent)]
    Args(#[from] clap::Error),

    /// Detected before anything was measured
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Worker mode measurement failure
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// A worker process failed or produced unusable output
    #[error(transparent)]
    Supervisor(SupervisorError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// SIGINT or SIGTERM
    #[error("Interrupted: exit")]
    Interrupted,
}

impl From<SupervisorError> for RunnerError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Interrupted => RunnerError::Interrupted,
            other => RunnerError::Supervisor(other),
        }
    }
}

impl RunnerError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::Args(e) => e.exit_code(),
            RunnerError::Interrupted => INTERRUPTED_EXIT_CODE,
            _ => 1,
        }
    }

    /// Report the error on stderr and exit the process.
    pub fn exit(&self) -> ! {
        match self {
            RunnerError::Args(e) => e.exit(),
            RunnerError::Interrupted => eprintln!("{self}"),
            _ => eprintln!("ERROR: {self}"),
        }
        std::process::exit(self.exit_code())
    }
}

/// Default log filter for the given verbosity
pub fn log_filter(verbose: bool, quiet: bool) -> String {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    ["perfrun", "perfrun_cli", "perfrun_core", "perfrun_ipc"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default
/// filter; a subscriber installed earlier wins.
pub fn init_logging(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbose, quiet)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bench").chain(args.iter().copied())).unwrap()
    }

    fn resolve(args: &[&str]) -> Settings {
        Settings::resolve(&parse(args), &RunnerConfig::default(), &RunnerDefaults::default()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = resolve(&[]);
        assert_eq!(settings.processes, 20);
        assert_eq!(settings.samples, 3);
        assert_eq!(settings.warmups, 1);
        assert_eq!(settings.loops, 0);
        assert_eq!(settings.min_time, 0.1);
        assert_eq!(settings.mode, MeasureMode::Timing);
        assert!(settings.display.check_unstable);
    }

    #[test]
    fn test_presets() {
        assert_eq!(resolve(&["--rigorous"]).processes, 40);

        let fast = resolve(&["--fast"]);
        assert_eq!(fast.processes, 10);
        assert_eq!(fast.samples, 2);

        let debug = resolve(&["--debug-single-sample"]);
        assert_eq!(
            (debug.processes, debug.warmups, debug.samples, debug.loops),
            (1, 0, 1, 1)
        );
        assert_eq!(debug.min_time, 1e-9);
    }

    #[test]
    fn test_fast_keeps_minimums() {
        let cli = parse(&["--fast"]);
        let defaults = RunnerDefaults {
            processes: 4,
            samples: 2,
            ..RunnerDefaults::default()
        };
        let settings = Settings::resolve(&cli, &RunnerConfig::default(), &defaults).unwrap();
        assert_eq!(settings.processes, 3);
        assert_eq!(settings.samples, 2);
    }

    #[test]
    fn test_presets_saturate_huge_config_values() {
        let config = RunnerConfig {
            processes: Some(u64::MAX),
            samples: Some(u64::MAX),
            ..RunnerConfig::default()
        };
        let defaults = RunnerDefaults::default();
        let rigorous = Settings::resolve(&parse(&["--rigorous"]), &config, &defaults).unwrap();
        assert_eq!(rigorous.processes, u64::MAX);
        let fast = Settings::resolve(&parse(&["--fast"]), &config, &defaults).unwrap();
        assert_eq!(fast.samples, u64::MAX / 3);
    }

    #[test]
    fn test_presets_conflict() {
        assert!(Cli::try_parse_from(["bench", "--fast", "--rigorous"]).is_err());
        assert!(Cli::try_parse_from(["bench", "--tracemalloc", "--track-memory"]).is_err());
    }

    #[test]
    fn test_invalid_counts_rejected_by_parser() {
        assert!(Cli::try_parse_from(["bench", "-p", "0"]).is_err());
        assert!(Cli::try_parse_from(["bench", "-n", "0"]).is_err());
        assert!(Cli::try_parse_from(["bench", "-w", "-1"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let config = RunnerConfig {
            processes: Some(6),
            samples: Some(5),
            min_time: Some(0.2),
            inherit_environ: vec!["FROM_FILE".into()],
            worker_timeout: Some("1m".into()),
            ..RunnerConfig::default()
        };
        let cli = parse(&["-p", "2", "--inherit-environ", "A,B"]);
        let settings = Settings::resolve(&cli, &config, &RunnerDefaults::default()).unwrap();
        assert_eq!(settings.processes, 2);
        assert_eq!(settings.samples, 5);
        assert_eq!(settings.min_time, 0.2);
        assert_eq!(settings.inherit_environ, vec!["FROM_FILE", "A", "B"]);
        assert_eq!(settings.worker_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_min_time() {
        let cli = parse(&["--min-time", "0"]);
        let err = Settings::resolve(&cli, &RunnerConfig::default(), &RunnerDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_existing_output_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cli = parse(&["-o", &path]);
        let err = Settings::resolve(&cli, &RunnerConfig::default(), &RunnerDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutputExists(_)));
    }

    #[test]
    fn test_quiet_disables_verbose() {
        let settings = resolve(&["-q", "-v"]);
        assert!(!settings.verbose);
        assert!(settings.quiet);
        assert!(!settings.display.check_unstable);
    }

    #[test]
    fn test_memory_modes() {
        assert_eq!(resolve(&["--track-memory"]).mode, MeasureMode::TrackMemory);
        assert_eq!(resolve(&["--tracemalloc"]).mode_flag(), "--tracemalloc");
    }

    #[test]
    fn test_worker_flags_roundtrip() {
        let request = WorkerRequest {
            index: 1,
            samples: 4,
            warmups: 2,
            loops: 64,
            min_time: 0.05,
            verbose: true,
            affinity: Some(vec![1, 2]),
            mode: MeasureMode::TrackMemory,
        };
        let args = request.worker_args();
        let settings = resolve(&args.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(settings.worker);
        assert!(settings.stdout);
        assert_eq!((settings.samples, settings.warmups, settings.loops), (4, 2, 64));
        assert_eq!(settings.min_time, 0.05);
        assert_eq!(settings.affinity.as_deref(), Some("1-2"));
        assert_eq!(settings.mode, MeasureMode::TrackMemory);
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(RunnerError::Interrupted.exit_code(), 130);
        assert_eq!(
            RunnerError::from(SupervisorError::Interrupted).exit_code(),
            INTERRUPTED_EXIT_CODE
        );
        assert_eq!(
            RunnerError::from(ConfigError::Invalid("x".into())).exit_code(),
            1
        );
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(
            log_filter(true, false),
            "perfrun=debug,perfrun_cli=debug,perfrun_core=debug,perfrun_ipc=debug"
        );
        assert!(log_filter(false, true).starts_with("perfrun=warn"));
        assert!(log_filter(false, false).starts_with("perfrun=info"));
    }
}
