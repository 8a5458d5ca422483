use ndarray::{Array1, Array2, Axis};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::SchemaError;

/// Row-disjoint train/test partition of an encoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSplit {
    /// Training features.
    pub x_train: Array2<f64>,
    /// Held-out features.
    pub x_test: Array2<f64>,
    /// Training target.
    pub y_train: Array1<f64>,
    /// Held-out target.
    pub y_test: Array1<f64>,
    /// Source rows of the training partition, in partition order.
    pub train_rows: Vec<usize>,
    /// Source rows of the held-out partition, in partition order.
    pub test_rows: Vec<usize>,
}

/// Splits `n` row indices into `(train, test)`.
///
/// The test partition holds `ceil(test_size * n)` rows taken from the front of
/// a seeded permutation; both partitions must be non-empty.
pub fn split_indices(n: usize, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>), SchemaError> {
    let n_test = test_count(n, test_size);
    if n_test == 0 || n_test >= n {
        return Err(SchemaError::InsufficientRows { rows: n, test_size });
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let train = order.split_off(n_test);
    Ok((train, order))
}

fn test_count(n: usize, test_size: f64) -> usize {
    // Tolerance absorbs products like 0.2 * 10 landing just above an integer.
    let raw = (test_size * n as f64 - 1e-9).ceil();
    if raw <= 0.0 {
        0
    } else {
        raw as usize
    }
}

impl FeatureSplit {
    /// Partitions aligned features and target.
    pub fn new(
        features: &Array2<f64>,
        target: &Array1<f64>,
        test_size: f64,
        seed: u64,
    ) -> Result<Self, SchemaError> {
        let (train_rows, test_rows) = split_indices(features.nrows(), test_size, seed)?;
        Ok(Self {
            x_train: features.select(Axis(0), &train_rows),
            x_test: features.select(Axis(0), &test_rows),
            y_train: target.select(Axis(0), &train_rows),
            y_test: target.select(Axis(0), &test_rows),
            train_rows,
            test_rows,
        })
    }
}
