#![warn(missing_docs)]
//! perfrun IPC Format
//!
//! Data model shared by the supervisor and its worker processes, and the JSON
//! document they exchange over the worker's stdout:
//! - [`Run`]: warmups, normalized values and metadata of one worker process
//! - [`Benchmark`]: runs of one measurement, with unit and name checks
//! - [`BenchmarkSuite`]: the on-disk / on-wire document

mod codec;
mod messages;

pub use codec::{
    FormatError, add_runs, decode_benchmark, decode_suite, encode_benchmark, encode_suite,
    read_suite, write_suite,
};
pub use messages::{
    Benchmark, BenchmarkError, BenchmarkSuite, DEFAULT_UNIT, Metadata, MetadataValue, Run,
    RunError, Warmup,
};

/// Document format version
pub const FORMAT_VERSION: &str = "1.0";

/// Unit recorded by memory-peak runs
pub const BYTE_UNIT: &str = "byte";
