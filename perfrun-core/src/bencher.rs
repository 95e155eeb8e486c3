//! Timed Operations
//!
//! Adapters that turn a user operation into a *sample function*: a
//! `FnMut(u64) -> f64` that runs the operation `loops` times and returns the
//! total elapsed seconds. Callers that time their own code can pass such a
//! function directly.

use crate::measure::Clock;
use std::future::Future;

/// Time `f()` called `loops` times in a tight loop.
///
/// The return value of every call goes through [`std::hint::black_box`] so the
/// optimizer cannot drop the work.
pub fn func_sampler<F, T, C>(mut f: F, clock: C) -> impl FnMut(u64) -> f64
where
    F: FnMut() -> T,
    C: Clock,
{
    move |loops| {
        let t0 = clock.now();
        for _ in 0..loops {
            std::hint::black_box(f());
        }
        clock.now() - t0
    }
}

/// Time an async operation on a dedicated current-thread tokio runtime.
///
/// The runtime is built once and reused for every batch; the whole batch runs
/// inside a single `block_on`.
pub fn async_sampler<F, Fut, T, C>(
    mut f: F,
    clock: C,
) -> Result<impl FnMut(u64) -> f64, std::io::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    C: Clock,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    Ok(move |loops| {
        let t0 = clock.now();
        runtime.block_on(async {
            for _ in 0..loops {
                std::hint::black_box(f().await);
            }
        });
        clock.now() - t0
    })
}
