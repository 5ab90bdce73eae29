use crate::utilities::enums::Engine;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

static BEST_ENGINE: OnceLock<Engine> = OnceLock::new();

/// Resolve `Engine::Auto` to a concrete engine, probing CUDA at most once
/// per process.
#[inline]
pub fn detect_best_engine() -> Engine {
    *BEST_ENGINE.get_or_init(|| {
        if crate::cuda::cuda_available() {
            Engine::Cuda
        } else {
            Engine::Cpu
        }
    })
}

/// Resolve a requested engine against what the build and the machine offer.
pub fn resolve_engine(requested: Engine) -> Engine {
    match requested {
        Engine::Auto => detect_best_engine(),
        other => other,
    }
}

/// Stderr percentage display for the long phases (pairwise DTW, centroid
/// convergence). A ruler line is printed up front, then one dot per percent
/// of progress; safe to update from rayon workers.
pub struct ProgressMeter {
    total: usize,
    dots_printed: AtomicUsize,
    completed: AtomicUsize,
}

impl ProgressMeter {
    pub fn start(title: &str, total: usize) -> Self {
        eprintln!("{}", title);
        eprintln!("0%        10%       20%       30%       40%       50%       60%       70%       80%       90%       100%");
        ProgressMeter {
            total: total.max(1),
            dots_printed: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Record one finished work item and extend the dot line if a percent
    /// boundary was crossed.
    pub fn tick(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let target = 100 * done / self.total;
        loop {
            let printed = self.dots_printed.load(Ordering::Relaxed);
            if printed >= target {
                return;
            }
            if self
                .dots_printed
                .compare_exchange(printed, target, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                let mut err = io::stderr().lock();
                for _ in printed..target {
                    let _ = err.write_all(b".");
                }
                let _ = err.flush();
                return;
            }
        }
    }

    pub fn finish(&self) {
        eprintln!();
    }
}
