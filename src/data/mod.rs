//! `Dataset` module: an immutable sample-by-feature table with stable
//! sample identifiers.
//!
//! Recursion never mutates a dataset in place; every sub-population is a
//! fresh row selection of its parent.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::primitives::Matrix;

/// Samples as rows (unique identifiers), features as named columns.
///
/// # Examples
///
/// ```
/// use recluster::data::Dataset;
/// use recluster::primitives::Matrix;
///
/// let values = Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("valid");
/// let ds = Dataset::with_default_names(values).expect("valid dataset");
/// assert_eq!(ds.shape(), (3, 2));
/// assert_eq!(ds.sample_ids()[2], "2");
///
/// let sub = ds.subset(&[2, 0]);
/// assert_eq!(sub.sample_ids(), &["2".to_string(), "0".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    sample_ids: Vec<String>,
    feature_names: Vec<String>,
    values: Matrix<f32>,
}

impl Dataset {
    /// Creates a dataset from explicit sample and feature names.
    ///
    /// # Errors
    ///
    /// Returns an error if the name counts don't match the matrix shape,
    /// if sample identifiers are not unique, or if a value is not finite.
    pub fn new(
        sample_ids: Vec<String>,
        feature_names: Vec<String>,
        values: Matrix<f32>,
    ) -> Result<Self> {
        let (rows, cols) = values.shape();
        if sample_ids.len() != rows {
            return Err(ReclusterError::dimension_mismatch(
                "sample_ids",
                rows,
                sample_ids.len(),
            ));
        }
        if feature_names.len() != cols {
            return Err(ReclusterError::dimension_mismatch(
                "feature_names",
                cols,
                feature_names.len(),
            ));
        }
        let mut seen = HashSet::with_capacity(rows);
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(format!("duplicate sample identifier: {id}").into());
            }
        }
        if !values.is_finite() {
            return Err("dataset contains non-finite values".into());
        }
        Ok(Self {
            sample_ids,
            feature_names,
            values,
        })
    }

    /// Creates a dataset whose samples and features are named by position.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is not finite.
    pub fn with_default_names(values: Matrix<f32>) -> Result<Self> {
        let (rows, cols) = values.shape();
        Self::new(
            (0..rows).map(|i| i.to_string()).collect(),
            (0..cols).map(|j| format!("f{j}")).collect(),
            values,
        )
    }

    /// Returns the shape as (`n_samples`, `n_features`).
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    /// Number of samples.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.values.n_rows()
    }

    /// Number of features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.values.n_cols()
    }

    /// Sample identifiers, in row order.
    #[must_use]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Feature names, in column order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// The underlying values.
    #[must_use]
    pub fn values(&self) -> &Matrix<f32> {
        &self.values
    }

    /// Map from sample identifier to row index.
    #[must_use]
    pub fn index(&self) -> HashMap<&str, usize> {
        self.sample_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    /// Returns a new dataset with the given rows, in the given order.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    #[must_use]
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            sample_ids: rows.iter().map(|&i| self.sample_ids[i].clone()).collect(),
            feature_names: self.feature_names.clone(),
            values: self.values.select_rows(rows),
        }
    }

    /// Returns a new dataset with the given samples, in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is unknown.
    pub fn subset_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<Self> {
        let index = self.index();
        let rows = ids
            .iter()
            .map(|id| {
                index
                    .get(id.as_ref())
                    .copied()
                    .ok_or_else(|| ReclusterError::from(format!("unknown sample: {}", id.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.subset(&rows))
    }

    /// Returns a new dataset with the given features, in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if a feature name is unknown.
    pub fn select_features<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let cols = names
            .iter()
            .map(|name| {
                self.feature_names
                    .iter()
                    .position(|f| f == name.as_ref())
                    .ok_or_else(|| ReclusterError::from(format!("unknown feature: {}", name.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sample_ids: self.sample_ids.clone(),
            feature_names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            values: self.values.select_cols(&cols),
        })
    }

    /// Stacks two datasets with identical features; sample identifiers must stay unique.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature names differ or identifiers collide.
    pub fn concat(&self, other: &Self) -> Result<Self> {
        if self.feature_names != other.feature_names {
            return Err("cannot concatenate datasets with different features".into());
        }
        let mut ids = self.sample_ids.clone();
        ids.extend(other.sample_ids.iter().cloned());
        let mut data = self.values.as_slice().to_vec();
        data.extend_from_slice(other.values.as_slice());
        let values = Matrix::from_vec(ids.len(), self.n_features(), data)?;
        Self::new(ids, self.feature_names.clone(), values)
    }
}
