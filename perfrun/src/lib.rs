#![warn(missing_docs)]
//! # perfrun
//!
//! Calibrated micro-benchmarks run across isolated worker processes.
//!
//! - **Calibration**: the loop count doubles until a batch lasts at least
//!   `min_time`, so fast operations are measured above the clock resolution
//! - **Process isolation**: every run happens in a fresh worker process; the
//!   first worker calibrates and the others reuse its loop count
//! - **Memory modes**: `--track-memory` records the peak RSS and
//!   `--tracemalloc` the peak traced heap instead of timings
//! - **CPU pinning**: workers run on `--affinity` CPUs, or on isolated CPUs
//!   when the kernel has some
//! - **JSON results**: `-o`, `--append` and `--stdout` write the result
//!   document
//!
//! ## Quick Start
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
//!
//! ## Caller-Timed Operations
//!
//! ```ignore
//! let mut runner = perfrun::Runner::new("sleep")?;
//! runner.bench_sample_func(|loops| {
//!     let t0 = std::time::Instant::now();
//!     for _ in 0..loops {
//!         std::thread::sleep(std::time::Duration::from_micros(100));
//!     }
//!     t0.elapsed().as_secs_f64()
//! })?;
//! ```
//!
//! ## Traced Allocations
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: perfrun::TrackingAllocator = perfrun::TrackingAllocator;
//! ```

// Runner front-end
pub use perfrun_cli::{
    Cli, ConfigError, DisplayOptions, PerfConfig, Runner, RunnerConfig, RunnerDefaults,
    RunnerError, Settings, WorkerRequest, format_benchmark, init_logging,
};

// Worker runtime
pub use perfrun_core::{
    Clock, MeasureError, MeasureMode, MonotonicClock, PeakTracker, TrackingAllocator, Worker,
    WorkerConfig, WorkerError, current_allocation, reset_allocation_counter,
};

// Result documents
pub use perfrun_ipc::{
    Benchmark, BenchmarkError, BenchmarkSuite, FormatError, Metadata, MetadataValue, Run,
    RunError, Warmup, add_runs, decode_suite, encode_suite,
};

/// Lower-level building blocks
pub mod core {
    pub use perfrun_core::*;
}

/// Data model and JSON codec
pub mod ipc {
    pub use perfrun_ipc::*;
}

/// Worker orchestration
pub mod supervisor {
    pub use perfrun_cli::{
        ProcessSpawner, Supervisor, SupervisorConfig, SupervisorError, SupervisorObserver,
        WorkerSpawner, parse_worker_output,
    };
}
