//! Peak heap usage instead of timings
//!
//! With the tracking allocator installed, `--tracemalloc` records the peak
//! traced heap of the sample phase. `--track-memory` records the peak RSS and
//! works without it.
//!
//! Run with: cargo run --example track_memory -p perfrun --release -- --tracemalloc

use perfrun::{Runner, TrackingAllocator};
use std::hint::black_box;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn main() {
    let mut runner = Runner::new("vec_1mib").unwrap_or_else(|e| e.exit());

    if let Err(e) = runner.bench_func(|| black_box(vec![0u8; 1 << 20])) {
        e.exit();
    }
}
