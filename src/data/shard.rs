use std::{num::NonZeroUsize, ops::Range};

use crate::error::{Result, SyncErr};

/// Splits `total` samples among `count` replicas and returns the shard of replica `index`.
///
/// Ranges are contiguous, disjoint and cover `0..total`, their sizes differ by at most 1.
pub fn shard_range(total: usize, index: usize, count: NonZeroUsize) -> Range<usize> {
    let count = count.get();
    let base = total / count;
    let rem = total % count;

    let start = index * base + index.min(rem);
    let extra = usize::from(index < rem);

    start..start + base + extra
}

/// Which slice of the dataset a replica trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    index: usize,
    count: NonZeroUsize,
}

impl ShardSpec {
    /// Creates a new `ShardSpec`.
    ///
    /// # Arguments
    /// * `index` - The replica's position among the replicas.
    /// * `count` - The amount of replicas.
    ///
    /// # Returns
    /// The shard or a `Data` error if `index` is out of range.
    pub fn new(index: usize, count: NonZeroUsize) -> Result<Self> {
        if index >= count.get() {
            return Err(SyncErr::Data(format!(
                "shard {index} out of range for {count} replicas"
            )));
        }

        Ok(Self { index, count })
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn count(self) -> NonZeroUsize {
        self.count
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.index, self.count)
    }
}
