use crate::data::ExpressionMatrix;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Mini-batch iterator over the rows of an expression matrix.
///
/// Row order is reshuffled at the start of every epoch when `shuffle` is
/// set; the last batch may be smaller than `batch_size`.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    batch_size: usize,
    shuffle: bool,
    rng: ChaCha8Rng,
    order: Vec<usize>,
}

impl BatchLoader {
    pub fn new(n_samples: usize, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            shuffle,
            rng: ChaCha8Rng::seed_from_u64(seed),
            order: (0..n_samples).collect(),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.order.len()
    }

    pub fn n_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Row indices of every batch of the next epoch
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        self.order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Batches of the next epoch as tensors
    pub fn epoch_tensors<B: Backend>(
        &mut self,
        matrix: &ExpressionMatrix,
        device: &B::Device,
    ) -> Vec<Tensor<B, 2>> {
        self.epoch()
            .iter()
            .map(|rows| matrix.rows_to_tensor(rows, device))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_cover_every_row_once() {
        let mut loader = BatchLoader::new(10, 4, true, 7);
        assert_eq!(loader.n_batches(), 3);

        let batches = loader.epoch();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);

        let mut rows: Vec<usize> = batches.into_iter().flatten().collect();
        rows.sort_unstable();
        assert_eq!(rows, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_order() {
        let mut a = BatchLoader::new(32, 8, true, 2026);
        let mut b = BatchLoader::new(32, 8, true, 2026);
        assert_eq!(a.epoch(), b.epoch());
        assert_eq!(a.epoch(), b.epoch());
    }

    #[test]
    fn test_no_shuffle_keeps_row_order() {
        let mut loader = BatchLoader::new(5, 2, false, 0);
        assert_eq!(loader.epoch(), vec![vec![0, 1], vec![2, 3], vec![4]]);
    }
}
