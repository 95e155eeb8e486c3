//! Worker-Side Run Execution
//!
//! A worker process measures one [`Run`]:
//!
//! ```text
//! Start ─┬─ Calibrating ─┬─ Warmup ── Sampling ─┬─ TimingFinalize ─┬─ Done
//!        └─ FixedLoops ──┘                      └─ MemoryFinalize ─┘
//! ```
//!
//! Any error raised while calibrating, warming up or sampling moves the worker
//! to [`Stage::Failed`]; the error remembers the stage it came from.

use crate::allocator::{AllocationTracer, check_allocation_tracing};
use crate::collector::{Collector, MeasureError};
use crate::measure::{Clock, MonotonicClock};
use crate::memory::{PeakMemoryThread, PeakTracker, check_tracking_memory};
use perfrun_ipc::{BYTE_UNIT, Metadata, Run, RunError, Warmup};
use std::fmt;
use thiserror::Error;

/// What a run measures. Exactly one mode is active per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeasureMode {
    /// Per-iteration wall-clock time
    #[default]
    Timing,
    /// Peak resident set size during the sample phase
    TrackMemory,
    /// Peak traced heap bytes during the sample phase
    TraceAllocations,
}

impl MeasureMode {
    /// Whether samples are replaced by a single peak memory value
    pub fn is_memory(self) -> bool {
        !matches!(self, MeasureMode::Timing)
    }

    /// Unit recorded in metadata when it differs from seconds
    pub fn unit(self) -> Option<&'static str> {
        self.is_memory().then_some(BYTE_UNIT)
    }

    /// Fail early if the backend for this mode cannot work here.
    pub fn check_available(self) -> Result<(), MeasureError> {
        match self {
            MeasureMode::Timing => Ok(()),
            MeasureMode::TrackMemory => check_tracking_memory(),
            MeasureMode::TraceAllocations => check_allocation_tracing(),
        }
    }

    fn default_tracker(self) -> Option<Box<dyn PeakTracker>> {
        match self {
            MeasureMode::Timing => None,
            MeasureMode::TrackMemory => Some(Box::new(PeakMemoryThread::new())),
            MeasureMode::TraceAllocations => Some(Box::new(AllocationTracer::new())),
        }
    }

    fn missing_peak(self) -> MeasureError {
        match self {
            MeasureMode::TraceAllocations => MeasureError::NoTracedAllocations,
            _ => MeasureError::NoMemoryPeak,
        }
    }
}

/// Worker parameters, as passed on the worker command line.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Benchmark name
    pub name: String,
    /// Number of samples
    pub samples: u64,
    /// Number of explicit warmups
    pub warmups: u64,
    /// Loops per batch; 0 calibrates
    pub loops: u64,
    /// Minimum batch duration in seconds
    pub min_time: f64,
    /// Logical iterations per call of the timed operation
    pub inner_loops: u64,
    /// Caller metadata copied into the run
    pub metadata: Metadata,
    /// Timing or memory peak
    pub mode: MeasureMode,
    /// Keep calibrating during warmups even with a fixed loop count
    pub calibrate_warmups: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            samples: 3,
            warmups: 1,
            loops: 0,
            min_time: 0.1,
            inner_loops: 1,
            metadata: Metadata::new(),
            mode: MeasureMode::Timing,
            calibrate_warmups: false,
        }
    }
}

impl WorkerConfig {
    /// Config for benchmark `name` with default counts
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Check the values a worker cannot start with.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.name.is_empty() {
            return Err(WorkerError::Config("benchmark name must be a non-empty string".into()));
        }
        if self.samples == 0 {
            return Err(WorkerError::Config("samples must be >= 1".into()));
        }
        if self.inner_loops == 0 {
            return Err(WorkerError::Config("inner_loops must be >= 1".into()));
        }
        if !(self.min_time.is_finite() && self.min_time > 0.0) {
            return Err(WorkerError::Config(format!(
                "min_time must be a positive number of seconds, got {}",
                self.min_time
            )));
        }
        Ok(())
    }
}

/// Worker progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Calibrating,
    FixedLoops,
    Warmup,
    Sampling,
    TimingFinalize,
    MemoryFinalize,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::Calibrating => "calibrating",
            Stage::FixedLoops => "fixed loops",
            Stage::Warmup => "warmup",
            Stage::Sampling => "sampling",
            Stage::TimingFinalize => "timing finalize",
            Stage::MemoryFinalize => "memory finalize",
            Stage::Done => "done",
            Stage::Failed => "failed",
        })
    }
}

/// Why a worker could not produce its run
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Config(String),

    /// Message is the measurement error, unchanged
    #[error("{source}")]
    Measure {
        stage: Stage,
        #[source]
        source: MeasureError,
    },

    #[error(transparent)]
    Run(#[from] RunError),
}

impl WorkerError {
    /// Stage the error was raised in, for measurement errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkerError::Measure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Executes one run of a sample function.
pub struct Worker<C = MonotonicClock> {
    config: WorkerConfig,
    clock: C,
    tracker: Option<Box<dyn PeakTracker>>,
    stage: Stage,
}

impl Worker<MonotonicClock> {
    /// Worker timed by the monotonic clock
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            clock: MonotonicClock::new(),
            tracker: None,
            stage: Stage::Start,
        }
    }
}

impl<C: Clock> Worker<C> {
    /// Replace the clock used for the run duration
    pub fn with_clock<D: Clock>(self, clock: D) -> Worker<D> {
        Worker {
            config: self.config,
            clock,
            tracker: self.tracker,
            stage: self.stage,
        }
    }

    /// Use `tracker` instead of the mode's default backend.
    ///
    /// The availability check is skipped for injected trackers.
    pub fn with_tracker(mut self, tracker: Box<dyn PeakTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Worker configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Calibrate (if needed), warm up, sample and build the run.
    pub fn run<S>(&mut self, sample_fn: &mut S) -> Result<Run, WorkerError>
    where
        S: FnMut(u64) -> f64 + ?Sized,
    {
        let result = self.execute(sample_fn);
        if result.is_err() {
            self.stage = Stage::Failed;
        }
        result
    }

    fn execute<S>(&mut self, sample_fn: &mut S) -> Result<Run, WorkerError>
    where
        S: FnMut(u64) -> f64 + ?Sized,
    {
        self.config.validate()?;
        let mode = self.config.mode;
        let mut tracker = match self.tracker.take() {
            Some(tracker) if mode.is_memory() => Some(tracker),
            Some(_) | None => {
                mode.check_available().map_err(|source| WorkerError::Measure {
                    stage: Stage::Start,
                    source,
                })?;
                mode.default_tracker()
            }
        };

        let config = &self.config;
        let mut collector = Collector::new(sample_fn, config.inner_loops, config.min_time)
            .map_err(|e| fail(Stage::Start, e))?;

        let start = self.clock.now();

        let mut warmups: Vec<Warmup> = Vec::new();
        let mut loops = config.loops;
        let calibrated = loops == 0;
        if calibrated {
            self.stage = Stage::Calibrating;
            let (calibrated_loops, calibration) =
                collector.calibrate().map_err(|e| fail(Stage::Calibrating, e))?;
            tracing::debug!(loops = calibrated_loops, batches = calibration.len(), "calibrated");
            loops = calibrated_loops;
            warmups.extend(calibration);
        } else {
            self.stage = Stage::FixedLoops;
        }

        self.stage = Stage::Warmup;
        if config.warmups > 0 {
            let keep_calibrating = calibrated || config.calibrate_warmups;
            let (warmup_loops, explicit) = collector
                .collect_warmups(loops, config.warmups, keep_calibrating)
                .map_err(|e| fail(Stage::Warmup, e))?;
            loops = warmup_loops;
            warmups.extend(explicit);
        }

        self.stage = Stage::Sampling;
        if let Some(tracker) = tracker.as_mut() {
            tracker.start().map_err(|e| fail(Stage::Sampling, e))?;
        }
        let sampled = collector.collect_samples(loops, config.samples);
        let peak = tracker.as_mut().map(|tracker| tracker.stop());
        let (loops, values) = sampled.map_err(|e| fail(Stage::Sampling, e))?;

        let duration = self.clock.now() - start;

        let (values, warmups) = match peak {
            None => {
                self.stage = Stage::TimingFinalize;
                (values, warmups)
            }
            Some(peak) => {
                self.stage = Stage::MemoryFinalize;
                if peak == 0 {
                    return Err(fail(Stage::MemoryFinalize, mode.missing_peak()));
                }
                (vec![peak as f64], Vec::new())
            }
        };

        let mut metadata = config.metadata.clone();
        metadata.insert("name", config.name.as_str());
        metadata.insert("duration", duration);
        metadata.insert("loops", loops);
        if config.inner_loops != 1 {
            metadata.insert("inner_loops", config.inner_loops);
        }
        if let Some(unit) = mode.unit() {
            metadata.insert("unit", unit);
        }

        let run = Run::new(values, warmups, metadata)?;
        self.stage = Stage::Done;
        Ok(run)
    }
}

fn fail(stage: Stage, source: MeasureError) -> WorkerError {
    WorkerError::Measure { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Clock advancing one second per reading
    struct TickClock(Cell<f64>);

    impl Clock for TickClock {
        fn now(&self) -> f64 {
            let now = self.0.get();
            self.0.set(now + 1.0);
            now
        }
    }

    /// Tracker reporting a fixed peak
    struct FixedPeak {
        peak: u64,
        started: bool,
    }

    impl PeakTracker for FixedPeak {
        fn start(&mut self) -> Result<(), MeasureError> {
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> u64 {
            if self.started { self.peak } else { 0 }
        }
    }

    fn config(loops: u64, samples: u64, warmups: u64) -> WorkerConfig {
        WorkerConfig {
            loops,
            samples,
            warmups,
            ..WorkerConfig::new("bench")
        }
    }

    #[test]
    fn test_fixed_loops_deterministic_values() {
        let mut worker = Worker::new(config(1000, 5, 0));
        let mut sample = |_loops: u64| 5.0;
        let run = worker.run(&mut sample).unwrap();

        assert_eq!(run.values(), &[0.005; 5]);
        assert!(run.warmups().is_empty());
        assert_eq!(run.loops(), Some(1000));
        assert_eq!(run.name(), Some("bench"));
        assert_eq!(worker.stage(), Stage::Done);
    }

    #[test]
    fn test_calibrated_run() {
        // ~1 ms per loop, min_time 0.1
        let mut worker = Worker::new(config(0, 3, 1));
        let mut sample = |loops: u64| loops as f64 * 0.001;
        let run = worker.run(&mut sample).unwrap();

        assert_eq!(run.loops(), Some(128));
        assert_eq!(run.values().len(), 3);
        for value in run.values() {
            assert!((value - 0.001).abs() < 1e-12);
        }

        // Calibration batches first, then the one requested warmup
        let loops: Vec<u64> = run.warmups().iter().map(|w| w.loops()).collect();
        assert_eq!(loops, vec![1, 2, 4, 8, 16, 32, 64, 128, 128]);
        let explicit = run.warmups().last().unwrap();
        assert!(explicit.raw() >= 0.1);
    }

    #[test]
    fn test_calibrate_warmups_with_fixed_loops() {
        let mut cfg = config(1, 2, 1);
        cfg.calibrate_warmups = true;
        let mut worker = Worker::new(cfg);
        let mut sample = |loops: u64| loops as f64 * 0.03;
        let run = worker.run(&mut sample).unwrap();

        // 0.03, 0.06 and 0.12 seconds
        assert_eq!(run.warmups().len(), 3);
        assert_eq!(run.loops(), Some(4));
    }

    #[test]
    fn test_fixed_loops_skip_warmup_calibration() {
        let mut worker = Worker::new(config(1, 2, 2));
        let mut sample = |loops: u64| loops as f64 * 0.001;
        let run = worker.run(&mut sample).unwrap();

        assert_eq!(run.warmups(), &[Warmup(1, 0.001), Warmup(1, 0.001)]);
        assert_eq!(run.loops(), Some(1));
    }

    #[test]
    fn test_metadata() {
        let mut cfg = config(10, 2, 0);
        cfg.inner_loops = 4;
        cfg.metadata.insert("description", "sum");
        let mut worker = Worker::new(cfg).with_clock(TickClock(Cell::new(0.0)));
        let mut sample = |_loops: u64| 1.0;
        let run = worker.run(&mut sample).unwrap();

        assert_eq!(run.values(), &[0.025, 0.025]);
        assert_eq!(run.inner_loops(), 4);
        assert_eq!(run.duration(), Some(1.0));
        assert_eq!(run.metadata().get("description").and_then(|v| v.as_str()), Some("sum"));
        assert!(!run.metadata().contains_key("unit"));
    }

    #[test]
    fn test_inner_loops_one_is_omitted() {
        let mut worker = Worker::new(config(1, 1, 0));
        let mut sample = |_loops: u64| 1.0;
        let run = worker.run(&mut sample).unwrap();
        assert!(!run.metadata().contains_key("inner_loops"));
    }

    #[test]
    fn test_memory_mode_replaces_samples() {
        let mut cfg = config(0, 3, 2);
        cfg.mode = MeasureMode::TrackMemory;
        let mut worker = Worker::new(cfg).with_tracker(Box::new(FixedPeak {
            peak: 4096,
            started: false,
        }));
        let mut sample = |loops: u64| loops as f64 * 0.01;
        let run = worker.run(&mut sample).unwrap();

        assert_eq!(run.values(), &[4096.0]);
        assert!(run.warmups().is_empty());
        assert_eq!(run.unit(), BYTE_UNIT);
        assert_eq!(worker.stage(), Stage::Done);
    }

    #[test]
    fn test_memory_mode_zero_peak_fails() {
        let mut cfg = config(1, 1, 0);
        cfg.mode = MeasureMode::TraceAllocations;
        let mut worker = Worker::new(cfg).with_tracker(Box::new(FixedPeak {
            peak: 0,
            started: false,
        }));
        let mut sample = |_loops: u64| 1.0;
        let err = worker.run(&mut sample).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::MemoryFinalize));
        assert!(matches!(
            err,
            WorkerError::Measure {
                source: MeasureError::NoTracedAllocations,
                ..
            }
        ));
        assert_eq!(worker.stage(), Stage::Failed);
    }

    #[test]
    fn test_zero_sample_fails_in_sampling() {
        let mut worker = Worker::new(config(5, 3, 1));
        let mut sample = |_loops: u64| 0.0;
        let err = worker.run(&mut sample).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Sampling));
        assert_eq!(err.to_string(), "sample function returned zero");
    }

    #[test]
    fn test_calibration_overflow_is_reported_verbatim() {
        let mut worker = Worker::new(config(0, 1, 0));
        let mut sample = |_loops: u64| 0.0;
        let err = worker.run(&mut sample).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Calibrating));
        assert_eq!(
            err.to_string(),
            format!("error in calibration, loops is too big: {}", 1u64 << 33)
        );
    }

    #[test]
    fn test_invalid_config() {
        let mut sample = |_loops: u64| 1.0;

        let mut worker = Worker::new(config(1, 0, 0));
        assert!(matches!(worker.run(&mut sample), Err(WorkerError::Config(_))));

        let mut cfg = config(1, 1, 0);
        cfg.min_time = 0.0;
        assert!(matches!(Worker::new(cfg).run(&mut sample), Err(WorkerError::Config(_))));

        let mut worker = Worker::new(WorkerConfig::default());
        assert!(matches!(worker.run(&mut sample), Err(WorkerError::Config(_))));
    }
}
