//! HDBSCAN adapter over the `hdbscan` crate.

use hdbscan::{Hdbscan as HdbscanModel, HdbscanHyperParams};
use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::primitives::{Matrix, Metric};
use crate::traits::UnsupervisedEstimator;

/// Hierarchical density-based clustering.
///
/// The searched parameter is the minimum cluster size; `min_samples`
/// (the core-distance neighbourhood) is fixed per run. Cosine distance is
/// handled by clustering L2-normalized rows with Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hdbscan {
    min_cluster_size: usize,
    min_samples: usize,
    metric: Metric,
    labels: Option<Vec<i32>>,
}

impl Hdbscan {
    /// Creates an unfitted model.
    #[must_use]
    pub fn new(min_cluster_size: usize, min_samples: usize) -> Self {
        Self {
            min_cluster_size,
            min_samples,
            metric: Metric::Euclidean,
            labels: None,
        }
    }

    /// Sets the distance metric.
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Returns the minimum cluster size.
    #[must_use]
    pub fn min_cluster_size(&self) -> usize {
        self.min_cluster_size
    }

    /// Returns the cluster labels (-1 for noise), if fitted.
    #[must_use]
    pub fn labels(&self) -> Option<&[i32]> {
        self.labels.as_deref()
    }

    fn rows(&self, x: &Matrix<f32>) -> Vec<Vec<f32>> {
        x.rows_iter()
            .map(|row| match self.metric {
                Metric::Euclidean => row.to_vec(),
                Metric::Cosine => {
                    let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
                    if norm > 0.0 {
                        row.iter().map(|v| v / norm).collect()
                    } else {
                        row.to_vec()
                    }
                }
            })
            .collect()
    }
}

impl UnsupervisedEstimator for Hdbscan {
    type Labels = Vec<i32>;

    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(ReclusterError::stage(
                "cluster",
                format!("min_cluster_size = {} must be >= 2", self.min_cluster_size),
            ));
        }
        if x.n_rows() < self.min_cluster_size {
            return Err(ReclusterError::stage(
                "cluster",
                format!(
                    "{} samples cannot hold a cluster of {}",
                    x.n_rows(),
                    self.min_cluster_size
                ),
            ));
        }
        let data = self.rows(x);
        let params = HdbscanHyperParams::builder()
            .min_cluster_size(self.min_cluster_size)
            .min_samples(self.min_samples.clamp(1, x.n_rows()))
            .build();
        let labels = HdbscanModel::new(&data, params)
            .cluster()
            .map_err(|e| ReclusterError::stage("cluster", format!("hdbscan: {e:?}")))?;
        self.labels = Some(labels);
        Ok(())
    }

    fn predict(&self, _x: &Matrix<f32>) -> Self::Labels {
        self.labels.clone().unwrap_or_default()
    }
}
