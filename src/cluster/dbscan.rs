//! DBSCAN (Density-Based Spatial Clustering of Applications with Noise).
//!
//! Density-based clustering algorithm that can find arbitrarily-shaped clusters
//! and identify outliers as noise points.

use crate::error::{ReclusterError, Result};
use crate::primitives::{pairwise, Matrix, Metric};
use crate::traits::UnsupervisedEstimator;
use serde::{Deserialize, Serialize};

/// DBSCAN (Density-Based Spatial Clustering of Applications with Noise).
///
/// # Algorithm
///
/// 1. For each unvisited point:
///    - Find all neighbors within eps distance (the point itself included)
///    - If neighbors < `min_samples`: mark as noise
///    - Else: create new cluster and expand through core points
/// 2. Noise points are labeled as -1
/// 3. Clusters are labeled 0, 1, 2, ...
///
/// # Examples
///
/// ```
/// use recluster::prelude::*;
///
/// let data = Matrix::from_vec(7, 2, vec![
///     1.0, 1.0,  // Cluster 0
///     1.2, 1.1,  // Cluster 0
///     1.1, 1.2,  // Cluster 0
///     5.0, 5.0,  // Cluster 1
///     5.1, 5.2,  // Cluster 1
///     5.2, 5.1,  // Cluster 1
///     10.0, 10.0, // Noise
/// ]).expect("Valid matrix dimensions and data length");
///
/// let mut dbscan = Dbscan::new(0.5, 2);
/// dbscan.fit(&data).expect("Fit succeeds with valid data");
///
/// let labels = dbscan.labels().expect("fitted");
/// assert_eq!(labels[6], -1); // Last point is noise
/// ```
///
/// # Performance
///
/// - Time complexity: O(n²) for distance computations
/// - Space complexity: O(n²) for the distance table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dbscan {
    /// Maximum distance between two samples to be neighbors.
    eps: f32,
    /// Minimum number of samples in a neighborhood to form a core point.
    min_samples: usize,
    /// Distance metric.
    metric: Metric,
    /// Cluster labels after fitting (-1 for noise).
    labels: Option<Vec<i32>>,
}

impl Dbscan {
    /// Creates a new DBSCAN with specified parameters.
    ///
    /// # Arguments
    ///
    /// * `eps` - Maximum distance between neighbors
    /// * `min_samples` - Minimum points to form a dense region
    #[must_use]
    pub fn new(eps: f32, min_samples: usize) -> Self {
        Self {
            eps,
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

    /// Returns the eps parameter.
    #[must_use]
    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Returns the `min_samples` parameter.
    #[must_use]
    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Returns true if the model has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.labels.is_some()
    }

    /// Returns the cluster labels (-1 for noise), if fitted.
    #[must_use]
    pub fn labels(&self) -> Option<&[i32]> {
        self.labels.as_deref()
    }

    /// All points within eps of point `i`, from a precomputed distance table.
    fn region_query(&self, distances: &[f32], n: usize, i: usize) -> Vec<usize> {
        (0..n).filter(|&j| distances[i * n + j] <= self.eps).collect()
    }

    /// Expands a cluster from a core point.
    fn expand_cluster(
        &self,
        distances: &[f32],
        n: usize,
        labels: &mut [i32],
        point: usize,
        neighbors: &mut Vec<usize>,
        cluster_id: i32,
    ) {
        labels[point] = cluster_id;
        let mut queued = vec![false; n];
        for &p in neighbors.iter() {
            queued[p] = true;
        }

        let mut i = 0;
        while i < neighbors.len() {
            let neighbor = neighbors[i];

            // If unlabeled or noise, assign to cluster
            if labels[neighbor] == -2 {
                labels[neighbor] = cluster_id;

                // If core point, add its neighbors to expansion
                let neighbor_neighbors = self.region_query(distances, n, neighbor);
                if neighbor_neighbors.len() >= self.min_samples {
                    for nn in neighbor_neighbors {
                        if !queued[nn] {
                            queued[nn] = true;
                            neighbors.push(nn);
                        }
                    }
                }
            } else if labels[neighbor] == -1 {
                // Border point: noise becomes part of cluster
                labels[neighbor] = cluster_id;
            }

            i += 1;
        }
    }
}

impl UnsupervisedEstimator for Dbscan {
    type Labels = Vec<i32>;

    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(ReclusterError::stage("cluster", format!("eps = {} must be > 0", self.eps)));
        }
        if self.min_samples == 0 {
            return Err(ReclusterError::stage("cluster", "min_samples must be >= 1"));
        }
        let n_samples = x.n_rows();
        let distances = pairwise(x, self.metric);
        let mut labels = vec![-2; n_samples]; // -2 = unlabeled
        let mut cluster_id = 0;

        for i in 0..n_samples {
            // Skip if already processed
            if labels[i] != -2 {
                continue;
            }

            let mut neighbors = self.region_query(&distances, n_samples, i);

            // Not a core point -> mark as noise (for now)
            if neighbors.len() < self.min_samples {
                labels[i] = -1;
                continue;
            }

            self.expand_cluster(&distances, n_samples, &mut labels, i, &mut neighbors, cluster_id);
            cluster_id += 1;
        }

        self.labels = Some(labels);
        Ok(())
    }

    fn predict(&self, _x: &Matrix<f32>) -> Self::Labels {
        // Fitted labels; new points are assigned by nearest neighbours instead
        self.labels.clone().unwrap_or_default()
    }
}
