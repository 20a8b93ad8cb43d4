mod dataset;
mod prefetch;
mod shard;

pub use dataset::{Batch, InMemoryDataset};
pub use prefetch::{BatchLoader, PREFETCH_COUNT, Prefetcher, ShardLoader};
pub use shard::{ShardSpec, shard_range};
