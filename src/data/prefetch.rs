use std::{ops::Range, sync::Arc};

use log::{debug, error};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{Batch, InMemoryDataset, ShardSpec};
use crate::{
    device::{self, DeviceId},
    error::{Result, SyncErr},
    sync::{BackgroundTask, BlockingQueue, StopSignal},
};

/// The amount of batches in flight between a loader thread and its consumer.
pub const PREFETCH_COUNT: usize = 3;

/// Fills batches on the prefetch thread.
pub trait BatchLoader: Send + 'static {
    /// Overwrites `batch` with the next batch of samples.
    fn load(&mut self, batch: &mut Batch) -> Result<()>;
}

/// Loads fixed-size batches from one shard of a dataset, reshuffling the shard on every
/// pass over it.
#[derive(Debug)]
pub struct ShardLoader {
    dataset: Arc<InMemoryDataset>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    rng: StdRng,
}

impl ShardLoader {
    /// Creates a new `ShardLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The whole dataset, shared by every replica.
    /// * `shard` - The slice of it this loader walks.
    /// * `batch_size` - The amount of samples per batch.
    /// * `seed` - Seeds the shuffling.
    ///
    /// # Returns
    /// The loader or a `Data` error if the shard is empty or `batch_size` is zero.
    pub fn new(
        dataset: Arc<InMemoryDataset>,
        shard: ShardSpec,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        let range: Range<usize> = shard.range(dataset.len());

        if range.is_empty() || batch_size == 0 {
            return Err(SyncErr::Data(format!(
                "shard {} holds {} samples for batches of {batch_size}",
                shard.index(),
                range.len()
            )));
        }

        let mut loader = Self {
            dataset,
            order: range.collect(),
            cursor: 0,
            batch_size,
            rng: StdRng::seed_from_u64(seed),
        };

        loader.order.shuffle(&mut loader.rng);
        Ok(loader)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl BatchLoader for ShardLoader {
    fn load(&mut self, batch: &mut Batch) -> Result<()> {
        batch.clear();
        batch.x_size = self.dataset.x_size();

        while batch.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }

            let (x, y) = self.dataset.row(self.order[self.cursor]);
            batch.push(x, y);
            self.cursor += 1;
        }

        Ok(())
    }
}

/// Keeps up to `PREFETCH_COUNT` batches loaded ahead of the consumer.
///
/// Batches cycle between two queues: the loader thread pops a free one, fills it and
/// pushes it to the full queue, the consumer pops full ones and recycles them back.
pub struct Prefetcher {
    free: Arc<BlockingQueue<Batch>>,
    full: Arc<BlockingQueue<Batch>>,
    task: Option<BackgroundTask>,
}

impl Prefetcher {
    /// Creates a new `Prefetcher` and starts its loader thread.
    ///
    /// # Arguments
    /// * `loader` - Fills the batches.
    /// * `device` - The device the loader thread binds, `None` for the host.
    ///
    /// # Returns
    /// The running prefetcher or `ThreadStart` if its thread couldn't be spawned.
    pub fn new<L: BatchLoader>(mut loader: L, device: Option<DeviceId>) -> Result<Self> {
        let free = Arc::new(BlockingQueue::new());
        let full = Arc::new(BlockingQueue::new());

        for _ in 0..PREFETCH_COUNT {
            free.push(Batch::default());
        }

        let name = match device {
            Some(device) => format!("prefetch-{device}"),
            None => "prefetch-host".to_string(),
        };

        let task = {
            let free = Arc::clone(&free);
            let full = Arc::clone(&full);

            BackgroundTask::spawn(name, move |stop| {
                if let Some(device) = device {
                    device::set_current(device);
                }

                let result = prefetch(&mut loader, &free, &full, &stop);

                if let Err(e) = &result {
                    error!("prefetching failed: {e}");
                }

                // Wakes up a consumer that would otherwise wait forever.
                full.close();
                result
            })?
        };

        Ok(Self {
            free,
            full,
            task: Some(task),
        })
    }

    /// Pops the next loaded batch, blocking until there is one.
    ///
    /// # Returns
    /// The batch, or a `Data` error if the loader thread is gone.
    pub fn next_batch(&self) -> Result<Batch> {
        self.full
            .pop_logged("waiting for data")
            .ok_or_else(|| SyncErr::Data("prefetch thread stopped".into()))
    }

    /// Hands a consumed batch back to the loader.
    pub fn recycle(&self, batch: Batch) {
        self.free.push(batch);
    }

    /// Stops the loader thread and waits for it.
    ///
    /// # Returns
    /// The loader's own error, if it failed.
    pub fn stop(mut self) -> Result<()> {
        self.close();
        self.task.take().map_or(Ok(()), BackgroundTask::stop)
    }

    fn close(&self) {
        self.free.close();
        self.full.close();
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn prefetch<L: BatchLoader>(
    loader: &mut L,
    free: &BlockingQueue<Batch>,
    full: &BlockingQueue<Batch>,
    stop: &StopSignal,
) -> Result<()> {
    while !stop.is_requested() {
        let Some(mut batch) = free.pop() else {
            break;
        };

        loader.load(&mut batch)?;
        debug!(size = batch.len(); "prefetched batch");

        if !full.push(batch) {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn dataset(len: usize) -> Arc<InMemoryDataset> {
        let xs = (0..len).map(|i| i as f32).collect();
        let ys = (0..len).map(|i| i as f32 + 100.).collect();
        Arc::new(InMemoryDataset::new(1, xs, ys).unwrap())
    }

    fn shard(index: usize, count: usize) -> ShardSpec {
        ShardSpec::new(index, NonZeroUsize::new(count).unwrap()).unwrap()
    }

    #[test]
    fn loader_stays_within_its_shard() {
        let mut loader = ShardLoader::new(dataset(10), shard(1, 3), 2, 7).unwrap();
        let mut batch = Batch::default();

        for _ in 0..6 {
            loader.load(&mut batch).unwrap();
            assert_eq!(batch.len(), 2);
            assert!(batch.xs.iter().all(|x| (4. ..7.).contains(x)));
        }
    }

    #[test]
    fn loader_covers_the_whole_shard_each_pass() {
        let mut loader = ShardLoader::new(dataset(4), shard(0, 1), 4, 3).unwrap();
        let mut batch = Batch::default();

        loader.load(&mut batch).unwrap();
        let mut xs = batch.xs.clone();
        xs.sort_by(f32::total_cmp);

        assert_eq!(xs, [0., 1., 2., 3.]);
    }

    #[test]
    fn same_seed_same_batches() {
        let mut a = ShardLoader::new(dataset(20), shard(0, 1), 5, 11).unwrap();
        let mut b = ShardLoader::new(dataset(20), shard(0, 1), 5, 11).unwrap();
        let (mut ba, mut bb) = (Batch::default(), Batch::default());

        for _ in 0..4 {
            a.load(&mut ba).unwrap();
            b.load(&mut bb).unwrap();
            assert_eq!(ba.xs, bb.xs);
        }
    }

    #[test]
    fn loader_rejects_empty_shard() {
        assert!(ShardLoader::new(dataset(2), shard(3, 4), 1, 0).is_err());
        assert!(ShardLoader::new(dataset(2), shard(0, 1), 0, 0).is_err());
    }

    #[test]
    fn prefetcher_delivers_and_recycles() {
        let loader = ShardLoader::new(dataset(6), shard(0, 2), 2, 1).unwrap();
        let prefetcher = Prefetcher::new(loader, Some(DeviceId::new(2))).unwrap();

        for _ in 0..10 {
            let batch = prefetcher.next_batch().unwrap();
            assert_eq!(batch.len(), 2);
            assert!(batch.xs.iter().all(|x| *x < 3.));
            prefetcher.recycle(batch);
        }

        prefetcher.stop().unwrap();
    }

    struct Failing;

    impl BatchLoader for Failing {
        fn load(&mut self, _: &mut Batch) -> Result<()> {
            Err(SyncErr::Data("disk on fire".into()))
        }
    }

    #[test]
    fn failing_loader_unblocks_the_consumer() {
        let prefetcher = Prefetcher::new(Failing, None).unwrap();

        assert!(matches!(prefetcher.next_batch(), Err(SyncErr::Data(_))));
        assert!(matches!(prefetcher.stop(), Err(SyncErr::Data(msg)) if msg == "disk on fire"));
    }
}
