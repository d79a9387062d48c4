//! Thread pool helpers for the fragment writer's filter/I-O phase.

use std::thread;

/// Number of worker threads to use when the writer is not configured
/// explicitly.
pub fn default_thread_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Run `f` inside a dedicated rayon pool of `threads` workers.
///
/// A single-thread request (or a pool build failure) runs `f` on the calling
/// thread; rayon calls inside then execute on the global pool, which keeps
/// the output deterministic either way.
pub fn with_thread_pool<R: Send>(threads: usize, f: impl FnOnce() -> R + Send) -> R {
    if threads <= 1 {
        return f();
    }
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(f),
        Err(_) => f(),
    }
}
