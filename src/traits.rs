//! Core traits for pipeline stages.
//!
//! Every stage of the filter → embed → cluster pipeline implements one of
//! these contracts, so a node can fit its stages on the fitted population
//! and replay them on held-out or newly arriving samples.

use crate::error::Result;
use crate::primitives::Matrix;

/// Trait for clustering models.
///
/// # Examples
///
/// ```
/// use recluster::prelude::*;
///
/// // Two tight groups far apart
/// let data = Matrix::from_vec(6, 2, vec![
///     0.0, 0.0, 0.1, 0.1, 0.2, 0.0,
///     10.0, 10.0, 10.1, 10.1, 10.0, 10.2,
/// ]).unwrap();
///
/// let mut dbscan = Dbscan::new(0.5, 2);
/// dbscan.fit(&data).unwrap();
/// let labels = dbscan.predict(&data);
/// assert_eq!(labels.len(), 6);
/// assert_ne!(labels[0], labels[5]);
/// ```
pub trait UnsupervisedEstimator {
    /// The type of labels/clusters produced.
    type Labels;

    /// Fits the model to data.
    ///
    /// # Errors
    ///
    /// Returns an error if fitting fails (empty data, invalid parameters, etc.).
    fn fit(&mut self, x: &Matrix<f32>) -> Result<()>;

    /// Returns the cluster assignments of the fitted data.
    fn predict(&self, x: &Matrix<f32>) -> Self::Labels;
}

/// Trait for data transformers (normalizers, feature filters, embedders).
///
/// ```text
/// let mut filter = FeatureFilter::new(FilterKind::Variance, 0.8);
/// let reduced = filter.fit_transform(&x)?;
/// let held_out = filter.transform(&x_new)?;
/// ```
pub trait Transformer {
    /// Fits the transformer to data.
    ///
    /// # Errors
    ///
    /// Returns an error if fitting fails.
    fn fit(&mut self, x: &Matrix<f32>) -> Result<()>;

    /// Transforms data using fitted parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if transformer is not fitted.
    fn transform(&self, x: &Matrix<f32>) -> Result<Matrix<f32>>;

    /// Fits and transforms in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if fitting fails.
    fn fit_transform(&mut self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        self.fit(x)?;
        self.transform(x)
    }
}
