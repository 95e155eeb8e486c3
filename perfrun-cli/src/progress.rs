//! Supervisor progress
//!
//! Verbose mode prints every worker's run and the calibrated loop count;
//! otherwise a progress bar advances once per worker. Quiet mode shows
//! nothing.

use crate::display::{format_number, format_run};
use crate::supervisor::SupervisorObserver;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use perfrun_ipc::Benchmark;
use std::io::Write;

pub struct Progress<W: Write> {
    out: W,
    verbose: bool,
    bar: Option<ProgressBar>,
}

impl<W: Write> Progress<W> {
    pub fn new(out: W, total: u64, verbose: bool, quiet: bool) -> Self {
        let bar = (!verbose && !quiet).then(|| {
            let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_message("workers");
            pb
        });
        Self { out, verbose, bar }
    }

    /// Remove the bar once every worker is done
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        let _ = self.out.flush();
    }

    /// Hidden bar, for tests
    #[cfg(test)]
    fn hidden(out: W, verbose: bool) -> Self {
        let bar = (!verbose).then(ProgressBar::hidden);
        Self { out, verbose, bar }
    }
}

impl<W: Write> SupervisorObserver for Progress<W> {
    fn worker_done(&mut self, index: usize, total: u64, benchmark: &Benchmark) {
        if self.verbose {
            if let Some(run) = benchmark.runs().last() {
                let index = format!("{}/{}", index + 1, total);
                let _ = writeln!(self.out, "{}", format_run(benchmark.unit(), &index, run));
            }
        } else if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn calibrated(&mut self, loops: u64) {
        if self.verbose {
            let _ = writeln!(self.out, "Calibration: use {}", format_number(loops, Some("loop")));
        } else if let Some(bar) = &self.bar {
            bar.set_message(format_number(loops, Some("loop")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfrun_ipc::{Metadata, Run};

    fn bench() -> Benchmark {
        let mut metadata = Metadata::new();
        metadata.insert("name", "b");
        metadata.insert("loops", 128u64);
        let mut bench = Benchmark::new("b").unwrap();
        bench.add_run(Run::new(vec![0.001], Vec::new(), metadata).unwrap()).unwrap();
        bench
    }

    #[test]
    fn test_verbose_prints_runs_and_calibration() {
        let mut progress = Progress::hidden(Vec::new(), true);
        progress.worker_done(0, 2, &bench());
        progress.calibrated(128);
        progress.finish();
        let text = String::from_utf8(progress.out).unwrap();
        assert_eq!(text, "Run 1/2: samples (1): 1.00 ms\nCalibration: use 128 loops\n");
    }

    #[test]
    fn test_bar_advances_silently() {
        let mut progress = Progress::hidden(Vec::new(), false);
        progress.worker_done(0, 2, &bench());
        assert_eq!(progress.bar.as_ref().map(|b| b.position()), Some(1));
        assert!(progress.out.is_empty());
    }
}
