//! Peak Memory Tracking
//!
//! Memory modes replace the timing samples of a run with a single number: the
//! peak memory observed while the sample phase ran. Backends implement
//! [`PeakTracker`]:
//! - [`PeakMemoryThread`]: samples the resident set size from a background
//!   thread (`--track-memory`)
//! - [`crate::AllocationTracer`]: peak live heap bytes seen by
//!   [`crate::TrackingAllocator`] (`--tracemalloc`)
//!
//! The background thread only reads `/proc/self/statm`; it never touches the
//! timed operation's data.

use crate::collector::MeasureError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default interval between two RSS readings
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A backend that observes peak memory between `start` and `stop`.
pub trait PeakTracker: Send {
    /// Begin tracking
    fn start(&mut self) -> Result<(), MeasureError>;

    /// Stop tracking and return the peak in bytes (0 if nothing was observed)
    fn stop(&mut self) -> u64;
}

/// Check that RSS tracking works on this platform.
pub fn check_tracking_memory() -> Result<(), MeasureError> {
    match read_rss_bytes() {
        Some(_) => Ok(()),
        None => Err(MeasureError::TrackingUnavailable(unavailable_reason())),
    }
}

#[cfg(target_os = "linux")]
fn unavailable_reason() -> String {
    "unable to read /proc/self/statm".to_string()
}

#[cfg(not(target_os = "linux"))]
fn unavailable_reason() -> String {
    "memory tracking is only supported on Linux".to_string()
}

/// Resident set size of the current process in bytes.
#[cfg(target_os = "linux")]
pub fn read_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn read_rss_bytes() -> Option<u64> {
    None
}

/// Background thread recording the highest RSS seen.
pub struct PeakMemoryThread {
    interval: Duration,
    peak: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeakMemoryThread {
    /// Tracker polling every [`DEFAULT_POLL_INTERVAL`]
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Tracker polling at a custom interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            peak: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Peak observed so far
    pub fn peak_usage(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for PeakMemoryThread {
    fn default() -> Self {
        Self::new()
    }
}

impl PeakTracker for PeakMemoryThread {
    fn start(&mut self) -> Result<(), MeasureError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let initial = read_rss_bytes()
            .ok_or_else(|| MeasureError::TrackingUnavailable(unavailable_reason()))?;
        self.peak.store(initial, Ordering::Relaxed);
        self.stop.store(false, Ordering::Relaxed);

        let peak = Arc::clone(&self.peak);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        let handle = std::thread::Builder::new()
            .name("perfrun-memory".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if let Some(rss) = read_rss_bytes() {
                        peak.fetch_max(rss, Ordering::Relaxed);
                    }
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| MeasureError::TrackingUnavailable(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("memory tracking thread panicked");
            }
        }
        // One last reading so short sample phases still see their peak
        if let Some(rss) = read_rss_bytes() {
            self.peak.fetch_max(rss, Ordering::Relaxed);
        }
        self.peak_usage()
    }
}

impl Drop for PeakMemoryThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}
