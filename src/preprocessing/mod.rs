//! Per-node normalization applied before the feature filter.
//!
//! # Example
//!
//! ```
//! use recluster::prelude::*;
//! use recluster::preprocessing::{Norm, Normalizer};
//!
//! let data = Matrix::from_vec(2, 2, vec![3.0, 4.0, 0.0, 2.0]).expect("valid matrix dimensions");
//!
//! let mut normalizer = Normalizer::new(Norm::L2);
//! let scaled = normalizer.fit_transform(&data).expect("fit_transform should succeed");
//!
//! // Each row now has unit length
//! assert!((scaled.get(0, 0) - 0.6).abs() < 1e-6);
//! assert!((scaled.get(1, 1) - 1.0).abs() < 1e-6);
//! ```

use crate::error::{ReclusterError, Result};
use crate::primitives::Matrix;
use crate::traits::Transformer;
use serde::{Deserialize, Serialize};

/// Normalization family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    /// Rows scaled to unit L1 norm
    L1,
    /// Rows scaled to unit L2 norm
    L2,
    /// Rows scaled by their largest absolute value
    Max,
    /// Columns centered and scaled to unit variance
    Standard,
}

/// Normalizes samples (row norms) or features (standardization).
///
/// Row norms are stateless; standardization remembers the column statistics
/// of the fitted population and reuses them for projected samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    norm: Norm,
    /// Column means and standard deviations (standardization only).
    stats: Option<(Vec<f32>, Vec<f32>)>,
    fitted: bool,
}

impl Normalizer {
    /// Creates an unfitted normalizer.
    #[must_use]
    pub fn new(norm: Norm) -> Self {
        Self {
            norm,
            stats: None,
            fitted: false,
        }
    }

    /// The normalization family.
    #[must_use]
    pub fn norm(&self) -> Norm {
        self.norm
    }

    /// Returns true if the normalizer has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn row_scale(&self, row: &[f32]) -> f32 {
        match self.norm {
            Norm::L1 => row.iter().map(|v| v.abs()).sum(),
            Norm::L2 => row.iter().map(|v| v * v).sum::<f32>().sqrt(),
            Norm::Max => row.iter().fold(0.0_f32, |m, v| m.max(v.abs())),
            Norm::Standard => 1.0,
        }
    }
}

impl Transformer for Normalizer {
    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        let (n_samples, n_features) = x.shape();
        if n_samples == 0 {
            return Err("Cannot fit with zero samples".into());
        }

        if self.norm == Norm::Standard {
            let mean = x.column_means();
            let mut std = vec![0.0; n_features];
            for (j, std_j) in std.iter_mut().enumerate() {
                let mut sum_sq = 0.0;
                for i in 0..n_samples {
                    let diff = x.get(i, j) - mean[j];
                    sum_sq += diff * diff;
                }
                // Population std, divide by n
                *std_j = (sum_sq / n_samples as f32).sqrt();
            }
            self.stats = Some((mean, std));
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        if !self.fitted {
            return Err("Normalizer not fitted".into());
        }
        let (n_samples, n_features) = x.shape();
        let mut result = Vec::with_capacity(n_samples * n_features);

        if let Some((mean, std)) = &self.stats {
            if n_features != mean.len() {
                return Err(ReclusterError::dimension_mismatch(
                    "features",
                    mean.len(),
                    n_features,
                ));
            }
            for row in x.rows_iter() {
                for (j, &v) in row.iter().enumerate() {
                    let centered = v - mean[j];
                    result.push(if std[j] > 1e-10 { centered / std[j] } else { centered });
                }
            }
        } else {
            for row in x.rows_iter() {
                let scale = self.row_scale(row);
                // All-zero rows stay zero
                let scale = if scale > 1e-12 { scale } else { 1.0 };
                result.extend(row.iter().map(|v| v / scale));
            }
        }

        Matrix::from_vec(n_samples, n_features, result)
    }
}
