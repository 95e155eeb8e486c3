//! Time a closure in a tight loop
//!
//! The first worker calibrates the loop count, the others reuse it.
//!
//! Run with: cargo run --example sum_loop -p perfrun --release -- --fast

use perfrun::Runner;
use std::hint::black_box;

fn main() {
    let runner = Runner::new("sum_0_to_1000").unwrap_or_else(|e| e.exit());
    let mut runner = runner.metadata("description", "sum of the first 1000 integers");

    if let Err(e) = runner.bench_func(|| (0..black_box(1000u64)).sum::<u64>()) {
        e.exit();
    }
}
