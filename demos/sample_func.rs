//! Caller-timed sample function
//!
//! The sample function runs `loops` iterations itself and returns the total
//! elapsed seconds, so setup can stay outside the timed region. Each call of
//! `sort_unstable` counts as 16 logical iterations.
//!
//! Run with: cargo run --example sample_func -p perfrun --release -- -v

use perfrun::Runner;
use std::hint::black_box;
use std::time::Instant;

const INNER_LOOPS: u64 = 16;

fn main() {
    let mut runner = Runner::new("sort_256")
        .and_then(|runner| runner.inner_loops(INNER_LOOPS))
        .unwrap_or_else(|e| e.exit());

    let input: Vec<u32> = (0..256u32).map(|i| i.wrapping_mul(2_654_435_761) >> 7).collect();
    let result = runner.bench_sample_func(|loops| {
        let mut buffers: Vec<Vec<u32>> = (0..INNER_LOOPS).map(|_| input.clone()).collect();
        let t0 = Instant::now();
        for _ in 0..loops {
            for buffer in buffers.iter_mut() {
                buffer.copy_from_slice(&input);
                buffer.sort_unstable();
                black_box(&buffer);
            }
        }
        t0.elapsed().as_secs_f64()
    });

    if let Err(e) = result {
        e.exit();
    }
}
