use crate::config::ExecutionStrategy;
use crate::error::{Result, SimError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A contiguous range of independent work items. Each batch draws from its
/// own RNG stream, so seeded results do not depend on batch scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub start: usize,
    pub len: usize,
}

impl Batch {
    /// RNG stream for this batch, a pure function of `(seed, index)`.
    pub fn rng(&self, seed: u64) -> StdRng {
        StdRng::seed_from_u64(mix_seed(seed, self.index as u64))
    }
}

/// Splits `total` items into batches of at most `batch_size`.
pub fn partition(total: usize, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    (0..total.div_ceil(batch_size))
        .map(|index| {
            let start = index * batch_size;
            Batch {
                index,
                start,
                len: batch_size.min(total - start),
            }
        })
        .collect()
}

/// Runs `f` on every batch, in parallel when requested. `Auto` must be
/// resolved by the caller; it is treated as `Parallel` here. On failure the
/// sequential path returns the first error in batch order, the parallel path
/// whichever batch failed first in wall-clock time.
pub fn map_batches<T, F>(strategy: ExecutionStrategy, batches: Vec<Batch>, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(Batch) -> Result<T> + Sync + Send,
{
    match strategy {
        ExecutionStrategy::Sequential => batches.into_iter().map(f).collect(),
        ExecutionStrategy::Parallel | ExecutionStrategy::Auto => batches.into_par_iter().map(f).collect(),
    }
}

/// SplitMix64 finalizer over seed and stream index.
fn mix_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Shared flag for cooperative cancellation of long simulation or sampling
/// calls. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SimError::Cancelled)
        } else {
            Ok(())
        }
    }
}
