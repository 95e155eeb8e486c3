#![warn(missing_docs)]
//! perfrun Core - Worker Runtime
//!
//! Everything that runs inside one worker process:
//! - [`Collector`]: batched sampling with calibration feedback
//! - [`Worker`]: calibrate, warm up, sample and build a [`perfrun_ipc::Run`]
//! - Memory peak backends for the `--track-memory` and `--tracemalloc` modes
//! - CPU affinity and isolated CPU discovery

mod allocator;
pub mod affinity;
mod bencher;
mod collector;
mod measure;
mod memory;
mod worker;

pub use allocator::{
    AllocationTracer, TrackingAllocator, check_allocation_tracing, current_allocation,
    reset_allocation_counter,
};
pub use bencher::{async_sampler, func_sampler};
pub use collector::{CalibrationState, Collector, MAX_LOOPS, MeasureError, Phase, normalize};
pub use measure::{Clock, MonotonicClock};
pub use memory::{
    DEFAULT_POLL_INTERVAL, PeakMemoryThread, PeakTracker, check_tracking_memory, read_rss_bytes,
};
pub use worker::{MeasureMode, Stage, Worker, WorkerConfig, WorkerError};
