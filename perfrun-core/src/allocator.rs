//! Allocation Tracing
//!
//! [`TrackingAllocator`] wraps the system allocator and, while tracing is
//! enabled, keeps a running count of live heap bytes and their high-water
//! mark. Install it in the benchmark binary to use `--tracemalloc`:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: perfrun::TrackingAllocator = perfrun::TrackingAllocator;
//! ```
//!
//! Frees of blocks allocated before tracing started are clamped at zero.

use crate::collector::MeasureError;
use crate::memory::PeakTracker;
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static TRACING: AtomicBool = AtomicBool::new(false);
static CURRENT_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);
static ALLOC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Global allocator that records traced heap usage
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() && TRACING.load(Ordering::Relaxed) {
            record_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() && TRACING.load(Ordering::Relaxed) {
            record_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        if TRACING.load(Ordering::Relaxed) {
            record_free(layout.size() as u64);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() && TRACING.load(Ordering::Relaxed) {
            let old_size = layout.size() as u64;
            let new_size = new_size as u64;
            if new_size >= old_size {
                record_alloc(new_size - old_size);
            } else {
                record_free(old_size - new_size);
            }
        }
        new_ptr
    }
}

#[inline]
fn record_alloc(size: u64) {
    let current = CURRENT_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_BYTES.fetch_max(current, Ordering::Relaxed);
    ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn record_free(size: u64) {
    let _ = CURRENT_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(size))
    });
}

/// Live traced bytes and number of traced allocations since tracing started
pub fn current_allocation() -> (u64, u64) {
    (
        CURRENT_BYTES.load(Ordering::Relaxed),
        ALLOC_COUNT.load(Ordering::Relaxed),
    )
}

/// Clear all counters
pub fn reset_allocation_counter() {
    CURRENT_BYTES.store(0, Ordering::Relaxed);
    PEAK_BYTES.store(0, Ordering::Relaxed);
    ALLOC_COUNT.store(0, Ordering::Relaxed);
}

/// [`PeakTracker`] over the [`TrackingAllocator`] counters.
#[derive(Debug, Default)]
pub struct AllocationTracer {
    running: bool,
}

impl AllocationTracer {
    /// New, stopped tracer
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeakTracker for AllocationTracer {
    fn start(&mut self) -> Result<(), MeasureError> {
        reset_allocation_counter();
        TRACING.store(true, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> u64 {
        if self.running {
            TRACING.store(false, Ordering::SeqCst);
            self.running = false;
        }
        PEAK_BYTES.load(Ordering::Relaxed)
    }
}

impl Drop for AllocationTracer {
    fn drop(&mut self) {
        if self.running {
            TRACING.store(false, Ordering::SeqCst);
        }
    }
}

/// Check that [`TrackingAllocator`] is the global allocator of this binary.
pub fn check_allocation_tracing() -> Result<(), MeasureError> {
    let mut tracer = AllocationTracer::new();
    tracer.start()?;
    let probe: Vec<u8> = Vec::with_capacity(64);
    std::hint::black_box(&probe);
    drop(probe);
    if tracer.stop() == 0 {
        return Err(MeasureError::TrackingUnavailable(
            "TrackingAllocator is not installed as #[global_allocator]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[global_allocator]
    static TEST_ALLOC: TrackingAllocator = TrackingAllocator;

    // The tracing switch is process-wide
    static SERIAL: Mutex<()> = Mutex::new(());

    // Other tests allocate concurrently, so these only assert lower bounds.

    #[test]
    fn test_tracer_sees_allocation() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let mut tracer = AllocationTracer::new();
        tracer.start().unwrap();
        let block: Vec<u8> = vec![0; 4096];
        std::hint::black_box(&block);
        drop(block);
        let peak = tracer.stop();
        assert!(peak >= 4096, "peak {peak}");
    }

    #[test]
    fn test_check_allocation_tracing_when_installed() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        assert!(check_allocation_tracing().is_ok());
    }

    #[test]
    fn test_realloc_growth_is_counted() {
        let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let mut tracer = AllocationTracer::new();
        tracer.start().unwrap();
        let mut block: Vec<u8> = Vec::with_capacity(16);
        block.reserve_exact(8192);
        std::hint::black_box(&block);
        let peak = tracer.stop();
        drop(block);
        assert!(peak >= 8192, "peak {peak}");
    }
}
