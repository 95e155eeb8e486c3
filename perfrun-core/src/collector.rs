//! Sample Collector and Calibrator
//!
//! A *sample function* runs `loops` iterations of the timed operation and
//! returns the total elapsed time of that batch. The collector calls it in
//! batches and turns the raw batch times into observations:
//!
//! - warmup and calibration batches are kept raw, paired with the loop count
//!   that produced them;
//! - sample batches are normalized to a per-iteration value,
//!   `raw / (loops * inner_loops)`.
//!
//! With calibration enabled, every batch shorter than `min_time` doubles the
//! loop count for the following batches and asks for one more batch.
//! [`CalibrationState`] owns that cursor so the termination condition stays in
//! one place.

use perfrun_ipc::Warmup;
use std::fmt;
use thiserror::Error;

/// Loop counts above this value abort calibration.
pub const MAX_LOOPS: u64 = 1 << 32;

/// Measurement failures. All of them are fatal for the worker process.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeasureError {
    #[error("loops must be >= 1")]
    InvalidLoops,

    #[error("inner_loops must be >= 1")]
    InvalidInnerLoops,

    #[error("min_time must be a positive number of seconds, got {0}")]
    InvalidMinTime(f64),

    #[error("sample function returned zero")]
    ZeroSample,

    #[error("sample function returned an invalid elapsed time: {0}")]
    InvalidSample(f64),

    #[error("error in calibration, loops is too big: {loops}")]
    CalibrationOverflow { loops: u64 },

    #[error("failed to get the memory peak usage")]
    NoMemoryPeak,

    #[error("the allocation tracer didn't trace any memory allocation")]
    NoTracedAllocations,

    #[error("unable to track the memory usage: {0}")]
    TrackingUnavailable(String),
}

/// Which pass a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loop count discovery; recorded as warmups
    Calibration,
    /// Discarded from statistics, kept raw
    Warmup,
    /// Normalized per-iteration values
    Sample,
}

impl Phase {
    /// Whether batches of this phase are stored raw as warmup pairs
    pub fn is_warmup(self) -> bool {
        !matches!(self, Phase::Sample)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Calibration => "Calibration",
            Phase::Warmup => "Warmup",
            Phase::Sample => "Sample",
        })
    }
}

/// Batch cursor: current loop count and how many batches are still owed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationState {
    loops: u64,
    completed: u64,
    required: u64,
}

impl CalibrationState {
    /// Cursor for `nsample` batches of `loops` iterations
    pub fn new(loops: u64, nsample: u64) -> Result<Self, MeasureError> {
        if loops == 0 {
            return Err(MeasureError::InvalidLoops);
        }
        Ok(Self {
            loops,
            completed: 0,
            required: nsample,
        })
    }

    /// Loop count for the next batch
    pub fn loops(&self) -> u64 {
        self.loops
    }

    /// Batches taken so far
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Batches the call must take in total; grows with every doubling
    pub fn required(&self) -> u64 {
        self.required
    }

    /// Claim the next batch, returning its 1-based index
    fn next_batch(&mut self) -> Option<u64> {
        if self.completed >= self.required {
            return None;
        }
        self.completed += 1;
        Some(self.completed)
    }

    /// The last batch was too short: double the loops and owe one more batch.
    fn grow(&mut self) -> Result<(), MeasureError> {
        let loops = self.loops.saturating_mul(2);
        if loops > MAX_LOOPS {
            return Err(MeasureError::CalibrationOverflow { loops });
        }
        self.loops = loops;
        self.required += 1;
        Ok(())
    }
}

/// Drives a sample function in batches.
pub struct Collector<'a, S: ?Sized> {
    sample_fn: &'a mut S,
    inner_loops: u64,
    min_time: f64,
}

impl<'a, S> Collector<'a, S>
where
    S: FnMut(u64) -> f64 + ?Sized,
{
    /// Create a collector. `min_time` is the calibration threshold in seconds.
    pub fn new(sample_fn: &'a mut S, inner_loops: u64, min_time: f64) -> Result<Self, MeasureError> {
        if inner_loops == 0 {
            return Err(MeasureError::InvalidInnerLoops);
        }
        if !(min_time.is_finite() && min_time > 0.0) {
            return Err(MeasureError::InvalidMinTime(min_time));
        }
        Ok(Self {
            sample_fn,
            inner_loops,
            min_time,
        })
    }

    /// Find a loop count whose batch lasts at least `min_time`.
    ///
    /// Starts from one loop and one batch; every short batch doubles the loops.
    /// All batches are returned as warmups so no measurement is thrown away.
    pub fn calibrate(&mut self) -> Result<(u64, Vec<Warmup>), MeasureError> {
        let mut warmups = Vec::new();
        let loops = self.run(1, 1, Phase::Calibration, true, |loops, raw, _| {
            warmups.push(Warmup(loops, raw));
        })?;
        Ok((loops, warmups))
    }

    /// Take `nsample` raw warmup batches, optionally still calibrating.
    pub fn collect_warmups(
        &mut self,
        loops: u64,
        nsample: u64,
        calibrate: bool,
    ) -> Result<(u64, Vec<Warmup>), MeasureError> {
        let mut warmups = Vec::with_capacity(reserve(nsample));
        let loops = self.run(loops, nsample, Phase::Warmup, calibrate, |loops, raw, _| {
            warmups.push(Warmup(loops, raw));
        })?;
        Ok((loops, warmups))
    }

    /// Take `nsample` normalized samples at a fixed loop count.
    pub fn collect_samples(&mut self, loops: u64, nsample: u64) -> Result<(u64, Vec<f64>), MeasureError> {
        let mut values = Vec::with_capacity(reserve(nsample));
        let loops = self.run(loops, nsample, Phase::Sample, false, |_, _, value| {
            values.push(value);
        })?;
        Ok((loops, values))
    }

    /// Shared batch loop. Returns the loop count in effect at the end.
    fn run(
        &mut self,
        loops: u64,
        nsample: u64,
        phase: Phase,
        calibrate: bool,
        mut record: impl FnMut(u64, f64, f64),
    ) -> Result<u64, MeasureError> {
        let mut state = CalibrationState::new(loops, nsample)?;

        while let Some(index) = state.next_batch() {
            let loops = state.loops();
            let raw = (self.sample_fn)(loops);
            if !raw.is_finite() || raw < 0.0 {
                return Err(MeasureError::InvalidSample(raw));
            }

            let value = normalize(raw, loops, self.inner_loops);
            if value == 0.0 && !phase.is_warmup() {
                return Err(MeasureError::ZeroSample);
            }

            tracing::debug!(%phase, index, loops, raw, value, "batch");
            record(loops, raw, value);

            if calibrate && raw < self.min_time {
                state.grow()?;
                tracing::trace!(loops = state.loops(), required = state.required(), "calibration doubled loops");
            }
        }

        Ok(state.loops())
    }
}

/// Up-front reservation for `nsample` observations; larger counts grow on demand.
fn reserve(nsample: u64) -> usize {
    nsample.min(MAX_RESERVED) as usize
}

const MAX_RESERVED: u64 = 1024;

/// Per-iteration value of a batch
#[inline]
pub fn normalize(raw: f64, loops: u64, inner_loops: u64) -> f64 {
    raw / loops.saturating_mul(inner_loops) as f64
}
