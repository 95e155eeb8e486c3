//! Benchmark Data Model
//!
//! Everything a worker hands back to the supervisor: one [`Run`] per process,
//! collected into a [`Benchmark`], collected into a [`BenchmarkSuite`] on disk.
//!
//! Runs validate on construction and on deserialization, so a `Run` obtained
//! from a worker's stdout obeys the same invariants as one built in-process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Unit used when a run carries no `unit` metadata.
pub const DEFAULT_UNIT: &str = "second";

/// Errors raised when building a [`Run`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error("a run needs at least one value")]
    NoValues,

    #[error("run value #{index} is not finite: {value}")]
    NonFiniteValue { index: usize, value: f64 },

    #[error("warmup #{index} has invalid loops={loops}")]
    InvalidWarmupLoops { index: usize, loops: u64 },
}

/// Errors raised when adding runs to a [`Benchmark`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchmarkError {
    #[error("benchmark name must be a non-empty string")]
    EmptyName,

    #[error("run belongs to benchmark {found:?}, not {expected:?}")]
    NameMismatch { expected: String, found: String },

    #[error("incompatible units: benchmark uses {expected:?}, run uses {found:?}")]
    UnitMismatch { expected: String, found: String },
}

/// A single metadata scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Integer value (loop counts, CPU counts)
    Int(i64),
    /// Floating point value (durations)
    Float(f64),
    /// Free-form text
    Str(String),
}

impl MetadataValue {
    /// Integer view; floats with no fractional part are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            MetadataValue::Int(v) => Some(v),
            MetadataValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            _ => None,
        }
    }

    /// Float view of numeric values
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            MetadataValue::Int(v) => Some(v as f64),
            MetadataValue::Float(v) => Some(v),
            MetadataValue::Str(_) => None,
        }
    }

    /// String view of text values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(MetadataValue::Int)
            .unwrap_or(MetadataValue::Float(v as f64))
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(v.into())
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::from(v as u64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Ordered description of a run. Never holds samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    /// Empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Copy every entry of `other` into `self`, `other` wins on conflicts
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Raw warmup observation: the loop count used and the unnormalized elapsed value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Warmup(pub u64, pub f64);

impl Warmup {
    /// Loop count that produced this observation
    #[inline]
    pub fn loops(&self) -> u64 {
        self.0
    }

    /// Raw elapsed value of the whole batch
    #[inline]
    pub fn raw(&self) -> f64 {
        self.1
    }
}

/// Results of one worker process. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RunRepr")]
pub struct Run {
    metadata: Metadata,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warmups: Vec<Warmup>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RunRepr {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    warmups: Vec<Warmup>,
    values: Vec<f64>,
}

impl TryFrom<RunRepr> for Run {
    type Error = RunError;

    fn try_from(repr: RunRepr) -> Result<Self, Self::Error> {
        Run::new(repr.values, repr.warmups, repr.metadata)
    }
}

impl Run {
    /// Build a run, checking that values are present and finite.
    pub fn new(values: Vec<f64>, warmups: Vec<Warmup>, metadata: Metadata) -> Result<Self, RunError> {
        if values.is_empty() {
            return Err(RunError::NoValues);
        }
        if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(RunError::NonFiniteValue { index, value });
        }
        if let Some((index, w)) = warmups.iter().enumerate().find(|(_, w)| w.loops() == 0) {
            return Err(RunError::InvalidWarmupLoops {
                index,
                loops: w.loops(),
            });
        }
        Ok(Self {
            metadata,
            warmups,
            values,
        })
    }

    /// Normalized sample values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Warmup observations, calibration batches first
    pub fn warmups(&self) -> &[Warmup] {
        &self.warmups
    }

    /// Run metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Benchmark name recorded by the worker
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(MetadataValue::as_str)
    }

    /// Loop count the samples were taken with
    pub fn loops(&self) -> Option<u64> {
        self.metadata
            .get("loops")
            .and_then(MetadataValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
    }

    /// Inner loops multiplier, 1 when absent
    pub fn inner_loops(&self) -> u64 {
        self.metadata
            .get("inner_loops")
            .and_then(MetadataValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(1)
    }

    /// Unit of `values`
    pub fn unit(&self) -> &str {
        self.metadata
            .get("unit")
            .and_then(MetadataValue::as_str)
            .unwrap_or(DEFAULT_UNIT)
    }

    /// Wall-clock duration of the worker in seconds
    pub fn duration(&self) -> Option<f64> {
        self.metadata.get("duration").and_then(MetadataValue::as_float)
    }
}

/// All runs of one logical measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BenchmarkRepr")]
pub struct Benchmark {
    name: String,
    runs: Vec<Run>,
}

#[derive(Deserialize)]
struct BenchmarkRepr {
    name: String,
    #[serde(default)]
    runs: Vec<Run>,
}

impl TryFrom<BenchmarkRepr> for Benchmark {
    type Error = BenchmarkError;

    fn try_from(repr: BenchmarkRepr) -> Result<Self, Self::Error> {
        let mut bench = Benchmark::new(repr.name)?;
        for run in repr.runs {
            bench.add_run(run)?;
        }
        Ok(bench)
    }
}

impl Benchmark {
    /// Create an empty benchmark
    pub fn new(name: impl Into<String>) -> Result<Self, BenchmarkError> {
        let name = name.into();
        if name.is_empty() {
            return Err(BenchmarkError::EmptyName);
        }
        Ok(Self {
            name,
            runs: Vec::new(),
        })
    }

    /// Benchmark name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs in the order they were added
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// Unit shared by all runs (the default unit while empty)
    pub fn unit(&self) -> &str {
        self.runs.first().map(Run::unit).unwrap_or(DEFAULT_UNIT)
    }

    /// Append a run after checking name and unit compatibility
    pub fn add_run(&mut self, run: Run) -> Result<(), BenchmarkError> {
        if let Some(found) = run.name() {
            if found != self.name {
                return Err(BenchmarkError::NameMismatch {
                    expected: self.name.clone(),
                    found: found.to_string(),
                });
            }
        }
        if let Some(first) = self.runs.first() {
            if first.unit() != run.unit() {
                return Err(BenchmarkError::UnitMismatch {
                    expected: first.unit().to_string(),
                    found: run.unit().to_string(),
                });
            }
        }
        self.runs.push(run);
        Ok(())
    }

    /// Append every run of `other`, in order
    pub fn add_runs(&mut self, other: Benchmark) -> Result<(), BenchmarkError> {
        if other.name != self.name {
            return Err(BenchmarkError::NameMismatch {
                expected: self.name.clone(),
                found: other.name,
            });
        }
        for run in other.runs {
            self.add_run(run)?;
        }
        Ok(())
    }

    /// Concatenation of every run's values
    pub fn values(&self) -> Vec<f64> {
        self.runs.iter().flat_map(|r| r.values().iter().copied()).collect()
    }

    /// Total number of values across runs
    pub fn total_values(&self) -> usize {
        self.runs.iter().map(|r| r.values().len()).sum()
    }

    /// Summed worker durations, if every run recorded one
    pub fn total_duration(&self) -> Option<f64> {
        self.runs.iter().map(Run::duration).sum()
    }
}

/// A file's worth of benchmarks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    version: String,
    benchmarks: Vec<Benchmark>,
}

impl Default for BenchmarkSuite {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkSuite {
    /// Empty suite tagged with the current format version
    pub fn new() -> Self {
        Self {
            version: crate::FORMAT_VERSION.to_string(),
            benchmarks: Vec::new(),
        }
    }

    /// Suite holding a single benchmark
    pub fn single(benchmark: Benchmark) -> Self {
        let mut suite = Self::new();
        suite.benchmarks.push(benchmark);
        suite
    }

    /// Format version read from the document
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Benchmarks in insertion order
    pub fn benchmarks(&self) -> &[Benchmark] {
        &self.benchmarks
    }

    /// Look up a benchmark by name
    pub fn get_benchmark(&self, name: &str) -> Option<&Benchmark> {
        self.benchmarks.iter().find(|b| b.name() == name)
    }

    /// Add a benchmark, merging its runs into an existing one of the same name.
    pub fn add_benchmark(&mut self, benchmark: Benchmark) -> Result<(), BenchmarkError> {
        match self
            .benchmarks
            .iter_mut()
            .find(|b| b.name() == benchmark.name())
        {
            Some(existing) => existing.add_runs(benchmark),
            None => {
                self.benchmarks.push(benchmark);
                Ok(())
            }
        }
    }

    /// Consume the suite
    pub fn into_benchmarks(self) -> Vec<Benchmark> {
        self.benchmarks
    }
}
