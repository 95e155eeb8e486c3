//! Benchmark Runner
//!
//! [`Runner`] is the entry point of a benchmark binary. It parses the command
//! line, then either measures one run in-process (worker mode) or spawns the
//! worker processes and merges their runs (supervisor mode), and finally
//! displays and writes the result.

use crate::config::{ConfigError, PerfConfig, RunnerConfig};
use crate::display::format_benchmark;
use crate::metadata::collect_metadata;
use crate::progress::Progress;
use crate::supervisor::{
    PrepareArgs, ProcessSpawner, Supervisor, SupervisorConfig, WorkerRequest,
    install_interrupt_handler, interrupt_flag,
};
use crate::{Cli, RunnerError, Settings, init_logging};
use clap::Parser;
use perfrun_core::affinity::{format_cpu_list, isolated_cpus, parse_cpu_list, set_cpu_affinity};
use perfrun_core::{MonotonicClock, Worker, WorkerConfig, async_sampler, func_sampler};
use perfrun_ipc::{Benchmark, BenchmarkSuite, Metadata, MetadataValue, add_runs, encode_suite};
use std::ffi::OsString;
use std::future::Future;
use std::io::Write;
use std::sync::atomic::AtomicBool;

/// Values used when neither a flag nor `perfrun.toml` sets them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerDefaults {
    /// Worker processes
    pub processes: u64,
    /// Samples per process
    pub samples: u64,
    /// Warmups per process
    pub warmups: u64,
    /// Loops per sample, 0 calibrates
    pub loops: u64,
    /// Minimum sample duration in seconds
    pub min_time: f64,
}

impl Default for RunnerDefaults {
    fn default() -> Self {
        Self {
            processes: 20,
            samples: 3,
            warmups: 1,
            loops: 0,
            min_time: 0.1,
        }
    }
}

/// Runs one named benchmark per invocation.
pub struct Runner {
    name: String,
    defaults: RunnerDefaults,
    metadata: Metadata,
    inner_loops: u64,
    calibrate_warmups: bool,
    program_args: Option<Vec<String>>,
    prepare_args: Option<PrepareArgs>,
    config: Option<RunnerConfig>,
    settings: Option<Settings>,
    loops: u64,
    interrupted: &'static AtomicBool,
}

impl Runner {
    /// Runner for benchmark `name` with the default counts
    pub fn new(name: impl Into<String>) -> Result<Self, RunnerError> {
        Self::with_defaults(name, RunnerDefaults::default())
    }

    /// Runner for benchmark `name` with custom default counts
    pub fn with_defaults(name: impl Into<String>, defaults: RunnerDefaults) -> Result<Self, RunnerError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::Invalid("benchmark name must be a non-empty string".into()).into());
        }
        Ok(Self {
            name,
            defaults,
            metadata: Metadata::new(),
            inner_loops: 1,
            calibrate_warmups: false,
            program_args: None,
            prepare_args: None,
            config: None,
            settings: None,
            loops: 0,
            interrupted: interrupt_flag(),
        })
    }

    /// Benchmark name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a metadata entry to every run
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Number of logical iterations per call of the timed operation
    pub fn inner_loops(mut self, inner_loops: u64) -> Result<Self, RunnerError> {
        if inner_loops == 0 {
            return Err(ConfigError::Invalid("inner_loops must be >= 1".into()).into());
        }
        self.inner_loops = inner_loops;
        Ok(self)
    }

    /// Command used to start workers (default: the current executable)
    pub fn program_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.program_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Hook that may append arguments to every worker command line
    pub fn prepare_worker_args<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerRequest, &mut Vec<String>) + 'static,
    {
        self.prepare_args = Some(Box::new(hook));
        self
    }

    /// Keep calibrating the loop count during warmups even when it is fixed
    pub fn calibrate_warmups(mut self, enabled: bool) -> Self {
        self.calibrate_warmups = enabled;
        self
    }

    /// Use `config` instead of discovering `perfrun.toml`
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loop count of the last supervised benchmark (0 before one ran)
    pub fn loops(&self) -> u64 {
        self.loops
    }

    /// Parse the process command line
    pub fn parse_args(&mut self) -> Result<&Settings, RunnerError> {
        let cli = Cli::try_parse()?;
        self.apply_cli(cli)
    }

    /// Parse `args`; the first item is the program name.
    pub fn parse_from<I, T>(&mut self, args: I) -> Result<&Settings, RunnerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        self.apply_cli(cli)
    }

    /// Settings in effect, once the command line was parsed
    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    fn apply_cli(&mut self, cli: Cli) -> Result<&Settings, RunnerError> {
        let config = match &self.config {
            Some(config) => config.clone(),
            None => PerfConfig::discover()?.map(|c| c.runner).unwrap_or_default(),
        };
        let settings = Settings::resolve(&cli, &config, &self.defaults)?;
        init_logging(settings.verbose, settings.quiet);
        Ok(&*self.settings.insert(settings))
    }

    /// Benchmark `f()` called in a tight loop.
    pub fn bench_func<F, T>(&mut self, f: F) -> Result<Benchmark, RunnerError>
    where
        F: FnMut() -> T,
    {
        let mut sample = func_sampler(f, MonotonicClock::new());
        self.bench_sample_func(&mut sample)
    }

    /// Benchmark an async operation on a current-thread tokio runtime.
    pub fn bench_async<F, Fut, T>(&mut self, f: F) -> Result<Benchmark, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut sample = async_sampler(f, MonotonicClock::new())?;
        self.bench_sample_func(&mut sample)
    }

    /// Benchmark a function that runs `loops` iterations and returns the
    /// total elapsed seconds.
    pub fn bench_sample_func<S>(&mut self, mut sample_fn: S) -> Result<Benchmark, RunnerError>
    where
        S: FnMut(u64) -> f64,
    {
        if self.settings.is_none() {
            self.parse_args()?;
        }
        let Some(settings) = self.settings.clone() else {
            return Err(ConfigError::Invalid("command line not parsed".into()).into());
        };

        let affinity = apply_affinity(&settings)?;
        let benchmark = if settings.worker {
            self.run_worker(&settings, affinity, &mut sample_fn)?
        } else {
            settings.mode.check_available().map_err(|e| ConfigError::TrackingUnavailable {
                flag: settings.mode_flag(),
                reason: e.to_string(),
            })?;
            self.run_supervisor(&settings, affinity)?
        };
        self.finish(&settings, &benchmark)?;
        Ok(benchmark)
    }

    fn run_worker(
        &self,
        settings: &Settings,
        affinity: Option<Vec<usize>>,
        sample_fn: &mut dyn FnMut(u64) -> f64,
    ) -> Result<Benchmark, RunnerError> {
        let mut metadata = collect_metadata(affinity.as_deref());
        metadata.merge(&self.metadata);
        let config = WorkerConfig {
            name: self.name.clone(),
            samples: settings.samples,
            warmups: settings.warmups,
            loops: settings.loops,
            min_time: settings.min_time,
            inner_loops: self.inner_loops,
            metadata,
            mode: settings.mode,
            calibrate_warmups: self.calibrate_warmups,
        };

        let run = Worker::new(config).run(sample_fn)?;
        let mut benchmark = Benchmark::new(self.name.clone())?;
        benchmark.add_run(run)?;
        Ok(benchmark)
    }

    fn run_supervisor(
        &mut self,
        settings: &Settings,
        affinity: Option<Vec<usize>>,
    ) -> Result<Benchmark, RunnerError> {
        install_interrupt_handler();

        let program_args = match &self.program_args {
            Some(args) => args.clone(),
            None => vec![std::env::current_exe()?.to_string_lossy().into_owned()],
        };
        let spawner = ProcessSpawner::new(program_args)
            .inherit_environ(settings.inherit_environ.clone())
            .timeout(settings.worker_timeout)
            .prepare_args(self.prepare_args.take());

        let config = SupervisorConfig {
            name: self.name.clone(),
            processes: settings.processes,
            samples: settings.samples,
            warmups: settings.warmups,
            loops: settings.loops,
            min_time: settings.min_time,
            verbose: settings.verbose,
            affinity,
            mode: settings.mode,
        };
        tracing::debug!(processes = config.processes, loops = config.loops, "starting workers");

        let mut supervisor = Supervisor::new(config, spawner).with_interrupt_flag(self.interrupted);
        let mut progress = Progress::new(
            text_stream(settings),
            settings.processes,
            settings.verbose,
            settings.quiet,
        );
        let result = supervisor.run(&mut progress);
        progress.finish();
        self.loops = supervisor.loops();

        result.map_err(|e| {
            if let Some((stdout, stderr)) = e.captured_output() {
                let _ = std::io::stdout().write_all(stdout);
                let _ = std::io::stderr().write_all(stderr);
            }
            RunnerError::from(e)
        })
    }

    /// Display the benchmark, then write it where requested.
    fn finish(&self, settings: &Settings, benchmark: &Benchmark) -> Result<(), RunnerError> {
        let mut options = settings.display;
        if settings.worker {
            options.check_unstable = false;
        }
        let mut out = text_stream(settings);
        if settings.verbose && !settings.worker {
            writeln!(out)?;
        }
        write!(out, "{}", format_benchmark(benchmark, options))?;
        out.flush()?;

        if let Some(path) = &settings.append {
            add_runs(path, benchmark)?;
        }

        let suite = BenchmarkSuite::single(benchmark.clone());
        if settings.stdout {
            let json = encode_suite(&suite)?;
            let mut stdout = std::io::stdout().lock();
            match writeln!(stdout, "{json}").and_then(|_| stdout.flush()) {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }
        if let Some(path) = &settings.output {
            suite.dump(path, false)?;
        }
        Ok(())
    }
}

/// Human-readable output goes to stderr when stdout carries JSON.
fn text_stream(settings: &Settings) -> Box<dyn Write> {
    if settings.stdout {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    }
}

/// Pin the process to the requested CPUs, or to the isolated CPUs when none
/// were requested. Returns the CPUs to record and forward to workers.
fn apply_affinity(settings: &Settings) -> Result<Option<Vec<usize>>, RunnerError> {
    if let Some(list) = &settings.affinity {
        let cpus = parse_cpu_list(list).map_err(|e| ConfigError::Affinity(e.to_string()))?;
        set_cpu_affinity(&cpus).map_err(|e| {
            ConfigError::Affinity(format!("unable to pin to CPUs {}: {e}", format_cpu_list(&cpus)))
        })?;
        if settings.verbose && !settings.worker {
            let _ = writeln!(text_stream(settings), "Pin process to CPUs: {}", format_cpu_list(&cpus));
        }
        return Ok(Some(cpus));
    }

    if settings.worker {
        return Ok(None);
    }
    let isolated = isolated_cpus();
    if isolated.is_empty() {
        return Ok(None);
    }
    match set_cpu_affinity(&isolated) {
        Ok(()) => {
            if settings.verbose {
                let _ = writeln!(
                    text_stream(settings),
                    "Pin process to isolated CPUs: {}",
                    format_cpu_list(&isolated)
                );
            }
            Ok(Some(isolated))
        }
        Err(e) => {
            tracing::warn!(cpus = %format_cpu_list(&isolated), error = %e, "unable to pin to isolated CPUs");
            Ok(None)
        }
    }
}
