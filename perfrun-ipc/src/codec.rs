//! JSON Document Encoding
//!
//! Workers write one suite document to stdout; the supervisor reads it back
//! in full before parsing. The same document format is used for `--output`
//! and `--append` files.
//!
//! Document format:
//! ```text
//! {"version": "1.0",
//!  "benchmarks": [{"name": ..., "runs": [{"metadata": {...},
//!                                         "warmups": [[loops, raw], ...],
//!                                         "values": [...]}]}]}
//! ```

use crate::messages::{Benchmark, BenchmarkError, BenchmarkSuite};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while encoding or decoding documents
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported document version {found:?} (expected {expected:?})")]
    UnsupportedVersion { found: String, expected: String },

    #[error("document contains {found} benchmarks instead of 1")]
    BenchmarkCount { found: usize },

    #[error("the JSON file {} already exists", .0.display())]
    FileExists(PathBuf),

    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
}

/// Serialize a suite to a JSON string
pub fn encode_suite(suite: &BenchmarkSuite) -> Result<String, FormatError> {
    Ok(serde_json::to_string(suite)?)
}

/// Parse a suite and check its version
pub fn decode_suite(bytes: &[u8]) -> Result<BenchmarkSuite, FormatError> {
    let suite: BenchmarkSuite = serde_json::from_slice(bytes)?;
    check_version(&suite)?;
    Ok(suite)
}

/// Serialize a single benchmark, wrapped in a suite document
pub fn encode_benchmark(benchmark: &Benchmark) -> Result<String, FormatError> {
    encode_suite(&BenchmarkSuite::single(benchmark.clone()))
}

/// Parse a document that must contain exactly one benchmark
pub fn decode_benchmark(bytes: &[u8]) -> Result<Benchmark, FormatError> {
    let suite = decode_suite(bytes)?;
    let mut benchmarks = suite.into_benchmarks();
    if benchmarks.len() != 1 {
        return Err(FormatError::BenchmarkCount {
            found: benchmarks.len(),
        });
    }
    Ok(benchmarks.remove(0))
}

/// Write a suite followed by a newline
pub fn write_suite<W: Write>(writer: W, suite: &BenchmarkSuite) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer(&mut writer, suite)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read a full suite document from a reader
pub fn read_suite<R: Read>(reader: R) -> Result<BenchmarkSuite, FormatError> {
    let mut buf = Vec::new();
    BufReader::new(reader).read_to_end(&mut buf)?;
    decode_suite(&buf)
}

impl BenchmarkSuite {
    /// Load a suite file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        read_suite(File::open(path)?)
    }

    /// Write the suite to `path`; refuses to overwrite unless `replace` is set.
    pub fn dump(&self, path: impl AsRef<Path>, replace: bool) -> Result<(), FormatError> {
        let path = path.as_ref();
        let file = if replace {
            File::create(path)?
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => FormatError::FileExists(path.to_path_buf()),
                    _ => FormatError::Io(e),
                })?
        };
        write_suite(file, self)
    }
}

/// Merge `benchmark` into the suite stored at `path`, creating the file if needed.
pub fn add_runs(path: impl AsRef<Path>, benchmark: &Benchmark) -> Result<(), FormatError> {
    let path = path.as_ref();
    let mut suite = if path.exists() {
        BenchmarkSuite::load(path)?
    } else {
        BenchmarkSuite::new()
    };
    suite.add_benchmark(benchmark.clone())?;
    suite.dump(path, true)
}

fn check_version(suite: &BenchmarkSuite) -> Result<(), FormatError> {
    if suite.version() != crate::FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: suite.version().to_string(),
            expected: crate::FORMAT_VERSION.to_string(),
        });
    }
    Ok(())
}
