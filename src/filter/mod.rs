//! Feature filters: the first stage of a node's pipeline.
//!
//! Threshold filters rank features by a dispersion measure and keep the
//! leading features whose cumulative share of the total dispersion stays
//! within the cutoff fraction; the top-ranked feature is always kept.
//! Truncated SVD projects onto the leading right singular vectors, with
//! the cutoff read as a component count.
//!
//! # Example
//!
//! ```
//! use recluster::prelude::*;
//! use recluster::filter::{FeatureFilter, FilterKind};
//!
//! // Column 0 carries almost all of the variance
//! let data = Matrix::from_vec(4, 2, vec![
//!     0.0, 0.0,
//!     10.0, 1.0,
//!     0.0, 0.0,
//!     10.0, 1.0,
//! ]).expect("valid matrix dimensions");
//!
//! let mut filter = FeatureFilter::new(FilterKind::Variance, 0.995);
//! let reduced = filter.fit_transform(&data).expect("fit_transform should succeed");
//! assert_eq!(reduced.n_cols(), 1);
//! assert_eq!(filter.selected(), Some(&[0][..]));
//! ```

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::primitives::Matrix;
use crate::traits::Transformer;

/// Feature filter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Rank by variance
    #[default]
    Variance,
    /// Rank by median absolute deviation
    Mad,
    /// Project onto leading singular vectors
    TruncatedSvd,
}

/// Fitted state of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Fitted {
    /// Indices of the kept columns, in dispersion order
    Columns(Vec<usize>),
    /// Right singular vectors, one per row (`n_components x n_features`)
    Projection(Matrix<f32>),
}

/// A configured feature filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    kind: FilterKind,
    cutoff: f64,
    n_features_in: usize,
    fitted: Option<Fitted>,
}

impl FeatureFilter {
    /// Creates an unfitted filter.
    ///
    /// `cutoff` is a cumulative fraction for threshold filters and a
    /// component count for truncated SVD.
    #[must_use]
    pub fn new(kind: FilterKind, cutoff: f64) -> Self {
        Self {
            kind,
            cutoff,
            n_features_in: 0,
            fitted: None,
        }
    }

    /// The filter family.
    #[must_use]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// The cutoff parameter.
    #[must_use]
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Indices of the kept columns (threshold filters only).
    #[must_use]
    pub fn selected(&self) -> Option<&[usize]> {
        match &self.fitted {
            Some(Fitted::Columns(cols)) => Some(cols),
            _ => None,
        }
    }

    /// Number of output features once fitted.
    #[must_use]
    pub fn n_features_out(&self) -> Option<usize> {
        match &self.fitted {
            Some(Fitted::Columns(cols)) => Some(cols.len()),
            Some(Fitted::Projection(v)) => Some(v.n_rows()),
            None => None,
        }
    }

    fn fit_threshold(&self, x: &Matrix<f32>) -> Result<Vec<usize>> {
        if !(self.cutoff > 0.0 && self.cutoff <= 1.0) {
            return Err(ReclusterError::stage(
                "filter",
                format!("cutoff {} outside (0, 1]", self.cutoff),
            ));
        }
        let dispersion: Vec<f64> = (0..x.n_cols())
            .map(|j| {
                let column = x.column(j);
                match self.kind {
                    FilterKind::Mad => median_absolute_deviation(&column),
                    _ => variance(&column),
                }
            })
            .collect();
        let total: f64 = dispersion.iter().sum();
        if total <= 0.0 {
            return Err(ReclusterError::stage("filter", "all features are constant"));
        }

        let mut order: Vec<usize> = (0..dispersion.len()).collect();
        order.sort_by(|&a, &b| {
            dispersion[b]
                .partial_cmp(&dispersion[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let limit = total * self.cutoff;
        let mut cumulative = 0.0;
        let mut kept = Vec::new();
        for j in order {
            cumulative += dispersion[j];
            // The leading feature is always kept; tolerate rounding at cutoff = 1
            if !kept.is_empty() && cumulative > limit * (1.0 + 1e-9) {
                break;
            }
            kept.push(j);
        }
        Ok(kept)
    }

    fn fit_svd(&self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        let (n_samples, n_features) = x.shape();
        let k = self.cutoff.round();
        if k < 1.0 {
            return Err(ReclusterError::stage(
                "filter",
                format!("component count {} < 1", self.cutoff),
            ));
        }
        let k = (k as usize).min(n_features);

        // Gram matrix XᵀX; its eigenvectors are the right singular vectors
        let data = DMatrix::from_row_slice(
            n_samples,
            n_features,
            &x.as_slice().iter().map(|&v| f64::from(v)).collect::<Vec<_>>(),
        );
        let gram = data.transpose() * &data;
        let eigen = SymmetricEigen::new(gram);

        let mut indices: Vec<usize> = (0..n_features).collect();
        indices.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut components = Vec::with_capacity(k * n_features);
        for &idx in indices.iter().take(k) {
            for j in 0..n_features {
                components.push(eigen.eigenvectors[(j, idx)] as f32);
            }
        }
        Matrix::from_vec(k, n_features, components)
    }
}

impl Transformer for FeatureFilter {
    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        if x.n_rows() == 0 || x.n_cols() == 0 {
            return Err(ReclusterError::stage("filter", "empty input"));
        }
        let fitted = match self.kind {
            FilterKind::Variance | FilterKind::Mad => Fitted::Columns(self.fit_threshold(x)?),
            FilterKind::TruncatedSvd => Fitted::Projection(self.fit_svd(x)?),
        };
        self.n_features_in = x.n_cols();
        self.fitted = Some(fitted);
        Ok(())
    }

    fn transform(&self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| ReclusterError::from("FeatureFilter not fitted"))?;
        if x.n_cols() != self.n_features_in {
            return Err(ReclusterError::dimension_mismatch(
                "features",
                self.n_features_in,
                x.n_cols(),
            ));
        }
        match fitted {
            Fitted::Columns(cols) => Ok(x.select_cols(cols)),
            Fitted::Projection(v) => {
                let (n, k) = (x.n_rows(), v.n_rows());
                let mut out = Vec::with_capacity(n * k);
                for row in x.rows_iter() {
                    for c in 0..k {
                        out.push(row.iter().zip(v.row(c)).map(|(a, b)| a * b).sum());
                    }
                }
                Matrix::from_vec(n, k, out)
            }
        }
    }
}

fn variance(values: &[f32]) -> f64 {
    let n = values.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn median_absolute_deviation(values: &[f32]) -> f64 {
    let mut centered: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
    let med = median(&mut centered.clone());
    for v in &mut centered {
        *v = (*v - med).abs();
    }
    median(&mut centered)
}
