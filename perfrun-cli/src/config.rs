//! Configuration loading from perfrun.toml
//!
//! Runner settings can be specified in a `perfrun.toml` file in the project
//! root. The file is discovered by walking up from the current directory.
//! Command-line flags override the file, which overrides the defaults given
//! to the `Runner`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file
pub const CONFIG_FILE: &str = "perfrun.toml";

/// Problems detected before any worker is spawned
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),

    #[error("The JSON file {0:?} already exists")]
    OutputExists(PathBuf),

    #[error("CPU affinity not available: {0}")]
    Affinity(String),

    #[error("unable to track the memory usage ({flag}): {reason}")]
    TrackingUnavailable { flag: &'static str, reason: String },

    #[error("failed to load {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// perfrun configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerfConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// `[runner]` section. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Number of worker processes
    #[serde(default)]
    pub processes: Option<u64>,
    /// Samples per process
    #[serde(default)]
    pub samples: Option<u64>,
    /// Warmups per process
    #[serde(default)]
    pub warmups: Option<u64>,
    /// Loops per sample, 0 calibrates
    #[serde(default)]
    pub loops: Option<u64>,
    /// Minimum duration of a sample in seconds
    #[serde(default)]
    pub min_time: Option<f64>,
    /// CPU list workers are pinned to (e.g., "2-3")
    #[serde(default)]
    pub affinity: Option<String>,
    /// Environment variables inherited by workers
    #[serde(default)]
    pub inherit_environ: Vec<String>,
    /// Kill a worker running longer than this (e.g., "60s", "5m")
    #[serde(default)]
    pub worker_timeout: Option<String>,
}

impl RunnerConfig {
    /// Parsed `worker_timeout`
    pub fn worker_timeout(&self) -> anyhow::Result<Option<Duration>> {
        self.worker_timeout
            .as_deref()
            .map(|s| PerfConfig::parse_duration(s).map(Duration::from_nanos))
            .transpose()
    }
}

impl PerfConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.runner.worker_timeout()?;
        Ok(config)
    }

    /// Find `perfrun.toml` by walking up from the current directory.
    ///
    /// A file that exists but does not parse is an error, not a miss.
    pub fn discover() -> Result<Option<Self>, ConfigError> {
        let Ok(dir) = std::env::current_dir() else {
            return Ok(None);
        };
        match Self::find(&dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::load(&path)
                    .map(Some)
                    .map_err(|source| ConfigError::File { path, source })
            }
            None => Ok(None),
        }
    }

    /// Path of the nearest `perfrun.toml` at or above `start`
    pub fn find(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.is_file() {
                return Some(config_path);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# perfrun configuration

[runner]
# Number of worker processes
# processes = 20
# Samples per worker process
# samples = 3
# Warmups per worker process
# warmups = 1
# Loops per sample, 0 means automatic calibration
# loops = 0
# Minimum duration of a sample in seconds, used by the calibration
# min_time = 0.1
# Pin workers to these CPUs (default: isolated CPUs, if any)
# affinity = "2-3"
# Environment variables inherited by workers, on top of PATH and HOME
inherit_environ = []
# Kill a worker that runs longer than this (uncomment to enable)
# worker_timeout = "5m"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !(value.is_finite() && value >= 0.0) {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "sec" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PerfConfig::default();
        assert_eq!(config.runner, RunnerConfig::default());
        assert!(config.runner.processes.is_none());
        assert!(config.runner.inherit_environ.is_empty());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(PerfConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(PerfConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(PerfConfig::parse_duration("100us").unwrap(), 100_000);
        assert_eq!(PerfConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(PerfConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(PerfConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(PerfConfig::parse_duration("30").unwrap(), 30_000_000_000);
        assert!(PerfConfig::parse_duration("").is_err());
        assert!(PerfConfig::parse_duration("3 weeks").is_err());
        assert!(PerfConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            processes = 4
            min_time = 0.05
            affinity = "0-1"
            inherit_environ = ["PYTHONPATH", "LD_LIBRARY_PATH"]
            worker_timeout = "90s"
        "#;

        let config: PerfConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.processes, Some(4));
        assert_eq!(config.runner.min_time, Some(0.05));
        assert_eq!(config.runner.affinity.as_deref(), Some("0-1"));
        assert_eq!(config.runner.inherit_environ.len(), 2);
        assert_eq!(
            config.runner.worker_timeout().unwrap(),
            Some(Duration::from_secs(90))
        );
        // Unset keys stay unset
        assert!(config.runner.samples.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let toml_str = r#"
            [runner]
            proceses = 4
        "#;
        assert!(toml::from_str::<PerfConfig>(toml_str).is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let config: PerfConfig = toml::from_str(&PerfConfig::default_toml()).unwrap();
        assert_eq!(config.runner, RunnerConfig::default());
    }

    #[test]
    fn test_load_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[runner]\nsamples = 7\nworker_timeout = \"2m\"\n",
        )
        .unwrap();

        let path = PerfConfig::find(&nested).unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILE));
        let config = PerfConfig::load(&path).unwrap();
        assert_eq!(config.runner.samples, Some(7));
    }

    #[test]
    fn test_load_rejects_bad_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[runner]\nworker_timeout = \"soon\"\n").unwrap();
        assert!(PerfConfig::load(&path).is_err());
    }
}
