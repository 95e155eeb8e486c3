//! Output Formatting
//!
//! Human-readable text for runs and benchmarks. Every function returns a
//! `String`; the caller decides which stream it goes to (stderr when JSON is
//! written to stdout).

use perfrun_ipc::{BYTE_UNIT, Benchmark, Run};
use std::fmt::Write;

/// Relative standard deviation above which a benchmark is flagged unstable
const UNSTABLE_STDEV_RATIO: f64 = 0.10;

/// Raw batches shorter than this are flagged as too short
const MIN_RAW_SECONDS: f64 = 1e-3;

/// What [`format_benchmark`] shows besides the final summary line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Every run's values
    pub dump: bool,
    /// Metadata of the first run
    pub metadata: bool,
    /// Min, max, median, ...
    pub stats: bool,
    /// Warn about a high standard deviation or too short batches
    pub check_unstable: bool,
}

/// Format seconds with an adapted unit (`"1.25 ms"`)
pub fn format_timedelta(seconds: f64) -> String {
    const UNITS: [(&str, f64); 4] = [("sec", 1.0), ("ms", 1e-3), ("us", 1e-6), ("ns", 1e-9)];
    let abs = seconds.abs();
    let (name, scale) = UNITS
        .iter()
        .copied()
        .find(|&(_, scale)| abs >= scale)
        .unwrap_or(UNITS[UNITS.len() - 1]);
    format!("{} {}", format_significant(seconds / scale), name)
}

/// Format a byte count (`"4096 bytes"`, `"12.5 MB"`)
pub fn format_filesize(bytes: f64) -> String {
    const UNITS: [(&str, f64); 3] = [("GB", 1024.0 * 1024.0 * 1024.0), ("MB", 1024.0 * 1024.0), ("kB", 1024.0)];
    for (name, scale) in UNITS {
        if bytes.abs() >= scale * 10.0 {
            return format!("{} {}", format_significant(bytes / scale), name);
        }
    }
    format!("{} bytes", bytes.round())
}

/// Format a value of the given unit
pub fn format_value(unit: &str, value: f64) -> String {
    if unit == BYTE_UNIT {
        format_filesize(value)
    } else {
        format_timedelta(value)
    }
}

/// Format an integer, with an optional unit pluralized as needed.
///
/// Powers of two from 1024 are shown as `2^N`; other numbers get thousands
/// separators.
pub fn format_number(number: u64, unit: Option<&str>) -> String {
    let text = if number >= 1024 && number.is_power_of_two() {
        format!("2^{}", number.trailing_zeros())
    } else {
        group_thousands(number)
    };
    match unit {
        Some(unit) if number == 1 => format!("{text} {unit}"),
        Some(unit) => format!("{text} {unit}s"),
        None => text,
    }
}

fn group_thousands(number: u64) -> String {
    let digits = number.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_significant(value: f64) -> String {
    let abs = value.abs();
    if abs >= 100.0 {
        format!("{value:.0}")
    } else if abs >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    }
}

/// One line describing a run, e.g. for verbose worker progress:
/// `Run 2/20: warmup (1): 1.02 ms; samples (3): 1.00 ms, 1.01 ms, 0.99 ms`
pub fn format_run(unit: &str, index: &str, run: &Run) -> String {
    let mut line = format!("Run {index}:");
    if !run.warmups().is_empty() {
        let warmups: Vec<String> = run
            .warmups()
            .iter()
            .map(|w| format_value(unit, w.raw() / w.loops().saturating_mul(run.inner_loops()) as f64))
            .collect();
        let _ = write!(line, " warmup ({}): {};", warmups.len(), warmups.join(", "));
    }
    let values: Vec<String> = run.values().iter().map(|&v| format_value(unit, v)).collect();
    let _ = write!(line, " samples ({}): {}", values.len(), values.join(", "));
    line
}

/// Summary statistics of a value set
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 for a single value
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl Summary {
    /// `None` for an empty slice
    pub fn new(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let stdev = if count > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        Some(Self {
            count,
            mean,
            stdev,
            min: sorted[0],
            max: sorted[count - 1],
            median,
        })
    }
}

/// Instability warnings for a benchmark, one per line
pub fn unstable_warnings(benchmark: &Benchmark) -> Vec<String> {
    let mut warnings = Vec::new();
    let Some(summary) = Summary::new(&benchmark.values()) else {
        return warnings;
    };
    let unit = benchmark.unit();

    if summary.count > 1 && summary.mean > 0.0 && summary.stdev / summary.mean > UNSTABLE_STDEV_RATIO {
        warnings.push(format!(
            "the standard deviation ({}) is {:.0}% of the mean ({})",
            format_value(unit, summary.stdev),
            summary.stdev * 100.0 / summary.mean,
            format_value(unit, summary.mean),
        ));
    }

    if unit != BYTE_UNIT {
        let shortest = benchmark
            .runs()
            .iter()
            .flat_map(|run| {
                let scale = run.loops().unwrap_or(1).saturating_mul(run.inner_loops()) as f64;
                run.values().iter().map(move |v| v * scale)
            })
            .fold(f64::INFINITY, f64::min);
        if shortest.is_finite() && shortest < MIN_RAW_SECONDS {
            warnings.push(format!(
                "the shortest raw value is only {} (loops should be increased)",
                format_timedelta(shortest)
            ));
        }
    }
    warnings
}

/// Full human-readable report of a benchmark
pub fn format_benchmark(benchmark: &Benchmark, options: DisplayOptions) -> String {
    let mut output = String::new();
    let unit = benchmark.unit();

    if options.metadata {
        if let Some(run) = benchmark.runs().first() {
            output.push_str("Metadata:\n");
            for (key, value) in run.metadata().iter() {
                let _ = writeln!(output, "- {key}: {value}");
            }
            output.push('\n');
        }
    }

    if options.dump {
        let total = benchmark.runs().len();
        for (i, run) in benchmark.runs().iter().enumerate() {
            let index = format!("{}/{}", i + 1, total);
            let _ = writeln!(output, "{}", format_run(unit, &index, run));
        }
        output.push('\n');
    }

    let Some(summary) = Summary::new(&benchmark.values()) else {
        let _ = writeln!(output, "{}: <no value>", benchmark.name());
        return output;
    };

    if options.stats {
        let _ = writeln!(output, "Total duration: {}", benchmark.total_duration().map_or_else(|| "-".to_string(), format_timedelta));
        let _ = writeln!(output, "Runs: {}", format_number(benchmark.runs().len() as u64, None));
        let _ = writeln!(output, "Values: {}", format_number(summary.count as u64, None));
        if let Some(loops) = benchmark.runs().first().and_then(Run::loops) {
            let _ = writeln!(output, "Loops: {}", format_number(loops, None));
        }
        let _ = writeln!(output, "Minimum: {}", format_value(unit, summary.min));
        let _ = writeln!(output, "Median: {}", format_value(unit, summary.median));
        let _ = writeln!(output, "Mean: {}", format_value(unit, summary.mean));
        let _ = writeln!(output, "Standard deviation: {}", format_value(unit, summary.stdev));
        let _ = writeln!(output, "Maximum: {}", format_value(unit, summary.max));
        output.push('\n');
    }

    if options.check_unstable {
        let warnings = unstable_warnings(benchmark);
        if !warnings.is_empty() {
            output.push_str("WARNING: the benchmark result may be unstable\n");
            for warning in warnings {
                let _ = writeln!(output, "* {warning}");
            }
            output.push('\n');
        }
    }

    if summary.count == 1 {
        let _ = writeln!(output, "{}: {}", benchmark.name(), format_value(unit, summary.mean));
    } else {
        let _ = writeln!(
            output,
            "{}: Mean +- std dev: {} +- {}",
            benchmark.name(),
            format_value(unit, summary.mean),
            format_value(unit, summary.stdev)
        );
    }
    output
}
