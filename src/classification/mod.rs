//! Nearest-neighbour classification.
//!
//! [`KNearestNeighbors`] projects samples onto clusters that were fitted
//! without them: held-out rows of a node, reassigned noise, and new data
//! routed through a stored hierarchy with [`classify`].
//!
//! # Example
//!
//! ```
//! use recluster::classification::KNearestNeighbors;
//! use recluster::prelude::*;
//!
//! let x = Matrix::from_vec(6, 2, vec![
//!     0.0, 0.0,
//!     0.0, 1.0,
//!     1.0, 0.0,
//!     5.0, 5.0,
//!     5.0, 6.0,
//!     6.0, 5.0,
//! ]).expect("6x2 matrix with 12 values");
//! let y = vec![0, 0, 0, 1, 1, 1];
//!
//! let mut knn = KNearestNeighbors::new(3).with_weights(true);
//! knn.fit(&x, &y).expect("valid training data with 6 samples");
//!
//! let test = Matrix::from_vec(1, 2, vec![0.5, 0.5]).expect("1x2 test matrix");
//! assert_eq!(knn.predict(&test).expect("model is fitted"), vec![0]);
//! ```

mod hierarchy;

pub use hierarchy::{classify, classify_from_path, ClassifySettings, Classification};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::primitives::{k_nearest, Matrix, Metric};

/// Smallest distance used when weighting by inverse distance.
const MIN_DISTANCE: f32 = 1e-6;

/// K-Nearest Neighbors classifier.
///
/// Lazy learner: `fit` stores the reference rows and the work happens at
/// prediction time. The effective `k` is capped by the number of
/// reference rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KNearestNeighbors {
    /// Number of neighbors to use
    k: usize,
    /// Distance metric
    metric: Metric,
    /// Whether to use weighted voting (inverse distance)
    weights: bool,
    /// Training feature matrix (stored during fit)
    x_train: Option<Matrix<f32>>,
    /// Training labels (stored during fit)
    y_train: Option<Vec<usize>>,
    /// Number of classes seen during fit
    n_classes: usize,
}

impl KNearestNeighbors {
    /// Creates a new classifier voting over `k` neighbours.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            metric: Metric::Euclidean,
            weights: false,
            x_train: None,
            y_train: None,
            n_classes: 0,
        }
    }

    /// Sets the distance metric.
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Enables weighted voting (inverse distance weighting).
    #[must_use]
    pub fn with_weights(mut self, weights: bool) -> Self {
        self.weights = weights;
        self
    }

    /// Number of classes, `max(label) + 1`.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Check if model has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.x_train.is_some()
    }

    /// Stores the reference rows and their class indices.
    ///
    /// # Errors
    ///
    /// Returns error if there are no rows, if the label count differs from
    /// the row count, or if `k` is zero.
    pub fn fit(&mut self, x: &Matrix<f32>, y: &[usize]) -> Result<()> {
        let n_samples = x.n_rows();
        if n_samples == 0 {
            return Err(ReclusterError::empty_input("nearest-neighbour reference rows"));
        }
        if y.len() != n_samples {
            return Err(ReclusterError::dimension_mismatch("labels", n_samples, y.len()));
        }
        if self.k == 0 {
            return Err(ReclusterError::invalid_config("knn", self.k, ">= 1"));
        }

        self.n_classes = y.iter().max().map_or(0, |m| m + 1);
        self.x_train = Some(x.clone());
        self.y_train = Some(y.to_vec());
        Ok(())
    }

    /// Predicts the most probable class of every row.
    ///
    /// Ties go to the lowest class index.
    ///
    /// # Errors
    ///
    /// Returns error if model is not fitted or dimensions mismatch.
    pub fn predict(&self, x: &Matrix<f32>) -> Result<Vec<usize>> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|p| argmax(p))
            .collect())
    }

    /// Class membership probabilities of every row.
    ///
    /// Each row of the result has [`KNearestNeighbors::n_classes`] entries
    /// summing to one.
    ///
    /// # Errors
    ///
    /// Returns error if model is not fitted or dimensions mismatch.
    pub fn predict_proba(&self, x: &Matrix<f32>) -> Result<Vec<Vec<f32>>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err("KNearestNeighbors not fitted".into()),
        };
        if x.n_cols() != x_train.n_cols() {
            return Err(ReclusterError::dimension_mismatch(
                "features",
                x_train.n_cols(),
                x.n_cols(),
            ));
        }

        let k = self.k.min(x_train.n_rows());
        let probabilities = (0..x.n_rows())
            .into_par_iter()
            .map(|i| {
                let neighbors = k_nearest(x_train, x.row(i), k, self.metric, None);
                let mut class_weights = vec![0.0_f32; self.n_classes];
                for (j, dist) in neighbors {
                    let weight = if self.weights {
                        1.0 / dist.max(MIN_DISTANCE)
                    } else {
                        1.0
                    };
                    class_weights[y_train[j]] += weight;
                }
                let total: f32 = class_weights.iter().sum();
                if total > 0.0 {
                    class_weights.iter_mut().for_each(|w| *w /= total);
                }
                class_weights
            })
            .collect();
        Ok(probabilities)
    }
}

/// Index of the largest entry; the first one on ties.
pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
#[path = "tests_knn_contract.rs"]
mod tests_knn_contract;
