use std::{fs, path::Path};

use log::info;

use crate::error::{Result, SyncErr};

/// A supervised dataset held in host memory, features stored row major.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    x_size: usize,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Arguments
    /// * `x_size` - The amount of features per sample.
    /// * `xs` - Every sample's features, one row after the other.
    /// * `ys` - Every sample's target.
    ///
    /// # Returns
    /// The dataset or a `Data` error if the buffers don't describe the same samples.
    pub fn new(x_size: usize, xs: Vec<f32>, ys: Vec<f32>) -> Result<Self> {
        if x_size == 0 || ys.is_empty() {
            return Err(SyncErr::Data("dataset must be non-empty".into()));
        }

        if xs.len() != ys.len() * x_size {
            return Err(SyncErr::Data(format!(
                "{} features don't fit {} samples of size {x_size}",
                xs.len(),
                ys.len()
            )));
        }

        Ok(Self { x_size, xs, ys })
    }

    /// Loads a dataset from a CSV file without header, the last column is the target.
    ///
    /// # Arguments
    /// * `path` - The file to read.
    ///
    /// # Returns
    /// The dataset or a `Data` error if the file can't be read or parsed.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SyncErr::Data(format!("failed to read {}: {e}", path.display())))?;

        let mut x_size = None;
        let mut xs = Vec::new();
        let mut ys = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let row = line
                .split(',')
                .map(|field| field.trim().parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SyncErr::Data(format!("{}:{}: {e}", path.display(), i + 1)))?;

            let Some((y, x)) = row.split_last() else {
                continue;
            };

            let expected = *x_size.get_or_insert(x.len());
            if x.len() != expected {
                return Err(SyncErr::Data(format!(
                    "{}:{}: expected {} columns, got {}",
                    path.display(),
                    i + 1,
                    expected + 1,
                    row.len()
                )));
            }

            xs.extend_from_slice(x);
            ys.push(*y);
        }

        let dataset = Self::new(x_size.unwrap_or_default(), xs, ys)?;
        info!("loaded {} samples from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    /// The amount of features per sample.
    #[inline]
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// The features and target of sample `idx`.
    ///
    /// # Panics
    /// If `idx` is out of bounds.
    #[inline]
    pub fn row(&self, idx: usize) -> (&[f32], f32) {
        let start = idx * self.x_size;
        (&self.xs[start..start + self.x_size], self.ys[idx])
    }
}

/// A reusable batch buffer, filled by a loader and drained by a net.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub x_size: usize,
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
}

impl Batch {
    /// Creates a new empty `Batch` with room for `capacity` samples.
    pub fn with_capacity(x_size: usize, capacity: usize) -> Self {
        Self {
            x_size,
            xs: Vec::with_capacity(x_size * capacity),
            ys: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    /// Empties the batch keeping its allocation.
    pub fn clear(&mut self) {
        self.xs.clear();
        self.ys.clear();
    }

    pub fn push(&mut self, x: &[f32], y: f32) {
        self.xs.extend_from_slice(x);
        self.ys.push(y);
    }

    /// Iterates over the batch's samples.
    pub fn rows(&self) -> impl Iterator<Item = (&[f32], f32)> + '_ {
        self.xs
            .chunks_exact(self.x_size.max(1))
            .zip(self.ys.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn dataset_rows() {
        let ds = InMemoryDataset::new(2, vec![1., 2., 3., 4.], vec![5., 6.]).unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.x_size(), 2);
        assert_eq!(ds.row(1), (&[3., 4.][..], 6.));
    }

    #[test]
    fn dataset_rejects_ragged_buffers() {
        assert!(InMemoryDataset::new(2, vec![1., 2., 3.], vec![5., 6.]).is_err());
        assert!(InMemoryDataset::new(1, vec![], vec![]).is_err());
    }

    #[test]
    fn loads_csv() {
        let path = env::temp_dir().join(format!("p2p_sync_dataset_{}.csv", std::process::id()));
        fs::write(&path, "1,2,3\n4, 5, 6\n\n").unwrap();

        let ds = InMemoryDataset::from_csv(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.row(0), (&[1., 2.][..], 3.));
        assert_eq!(ds.row(1), (&[4., 5.][..], 6.));
    }

    #[test]
    fn csv_with_uneven_rows_fails() {
        let path = env::temp_dir().join(format!("p2p_sync_ragged_{}.csv", std::process::id()));
        fs::write(&path, "1,2,3\n4,5\n").unwrap();

        let result = InMemoryDataset::from_csv(&path);
        fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(SyncErr::Data(_))));
    }

    #[test]
    fn batch_reuses_its_buffers() {
        let mut batch = Batch::with_capacity(1, 2);
        batch.push(&[1.], 2.);
        batch.push(&[3.], 4.);

        assert_eq!(batch.rows().collect::<Vec<_>>(), [(&[1.][..], 2.), (&[3.][..], 4.)]);

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.ys.capacity() >= 2);
    }
}
