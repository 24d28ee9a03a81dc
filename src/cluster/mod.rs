//! Cluster identification: the last stage of a node's pipeline.
//!
//! Both identifiers label noise as -1. [`ClusterIdentifier`] wraps the
//! configured algorithm together with the minimum-cluster-size cutoff and
//! the relabelling that turns raw labels into child indices.

mod dbscan;
mod hdbscan;

pub use dbscan::Dbscan;
pub use hdbscan::Hdbscan;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::primitives::{k_nearest, Matrix, Metric};
use crate::traits::UnsupervisedEstimator;

/// Noise marker in label vectors.
pub const NOISE: i32 = -1;

/// Cluster identification family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// Radius-based density clustering; the parameter is the radius
    #[default]
    Dbscan,
    /// Hierarchical density clustering; the parameter is the minimum cluster size
    Hdbscan,
}

/// A configured cluster identifier with its post-processing.
///
/// # Examples
///
/// ```
/// use recluster::prelude::*;
/// use recluster::cluster::{ClusterIdentifier, ClusterKind};
///
/// let data = Matrix::from_vec(8, 1, vec![0.0, 0.1, 0.2, 0.3, 9.0, 9.1, 9.2, 9.3])
///     .expect("valid matrix dimensions");
/// let mut identifier = ClusterIdentifier::new(ClusterKind::Dbscan, 0.5, 3);
/// let labels = identifier.identify(&data).expect("clustering succeeds");
/// assert_eq!(labels, vec![0, 0, 0, 0, 1, 1, 1, 1]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIdentifier {
    kind: ClusterKind,
    param: f64,
    min_cluster_size: usize,
    metric: Metric,
    labels: Option<Vec<i32>>,
}

impl ClusterIdentifier {
    /// Creates an identifier.
    ///
    /// `param` is the DBSCAN radius or the HDBSCAN minimum cluster size.
    #[must_use]
    pub fn new(kind: ClusterKind, param: f64, min_cluster_size: usize) -> Self {
        Self {
            kind,
            param,
            min_cluster_size,
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

    /// The algorithm family.
    #[must_use]
    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    /// The resolved clustering parameter.
    #[must_use]
    pub fn param(&self) -> f64 {
        self.param
    }

    /// Labels of the fitted data after post-processing.
    #[must_use]
    pub fn labels(&self) -> Option<&[i32]> {
        self.labels.as_deref()
    }

    /// Clusters `x` and returns post-processed labels.
    ///
    /// For DBSCAN, clusters smaller than the minimum cluster size are
    /// dissolved into noise. Surviving clusters are renumbered 0, 1, …
    /// in order of first appearance.
    ///
    /// # Errors
    ///
    /// Returns a stage failure if the algorithm rejects its input.
    pub fn identify(&mut self, x: &Matrix<f32>) -> Result<Vec<i32>> {
        let raw = match self.kind {
            ClusterKind::Dbscan => {
                let mut model = Dbscan::new(self.param as f32, self.min_cluster_size)
                    .with_metric(self.metric);
                model.fit(x)?;
                dissolve_small(&model.predict(x), self.min_cluster_size)
            }
            ClusterKind::Hdbscan => {
                let size = self.param.round().max(2.0) as usize;
                let mut model = Hdbscan::new(size, self.min_cluster_size.min(size))
                    .with_metric(self.metric);
                model.fit(x)?;
                relabel(&model.predict(x))
            }
        };
        self.labels = Some(raw.clone());
        Ok(raw)
    }
}

impl UnsupervisedEstimator for ClusterIdentifier {
    type Labels = Vec<i32>;

    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        self.identify(x).map(|_| ())
    }

    fn predict(&self, _x: &Matrix<f32>) -> Self::Labels {
        self.labels.clone().unwrap_or_default()
    }
}

/// Renumbers non-noise labels 0, 1, … in order of first appearance.
#[must_use]
pub fn relabel(labels: &[i32]) -> Vec<i32> {
    let mut mapping: Vec<(i32, i32)> = Vec::new();
    labels
        .iter()
        .map(|&l| {
            if l < 0 {
                return NOISE;
            }
            if let Some(&(_, m)) = mapping.iter().find(|(from, _)| *from == l) {
                m
            } else {
                let m = mapping.len() as i32;
                mapping.push((l, m));
                m
            }
        })
        .collect()
}

/// Turns clusters with fewer than `min_size` members into noise, then relabels.
#[must_use]
pub fn dissolve_small(labels: &[i32], min_size: usize) -> Vec<i32> {
    let sizes = cluster_sizes(labels);
    let kept: Vec<i32> = labels
        .iter()
        .map(|&l| {
            if l >= 0 && sizes.iter().any(|&(c, n)| c == l && n < min_size) {
                NOISE
            } else {
                l
            }
        })
        .collect();
    relabel(&kept)
}

/// `(label, size)` of every non-noise cluster, ordered by label.
#[must_use]
pub fn cluster_sizes(labels: &[i32]) -> Vec<(i32, usize)> {
    let mut sizes: std::collections::BTreeMap<i32, usize> = std::collections::BTreeMap::new();
    for &l in labels.iter().filter(|&&l| l >= 0) {
        *sizes.entry(l).or_insert(0) += 1;
    }
    sizes.into_iter().collect()
}

/// Number of non-noise clusters.
#[must_use]
pub fn n_clusters(labels: &[i32]) -> usize {
    cluster_sizes(labels).len()
}

/// Sorted distances of every row to its `k`-th nearest other row.
#[must_use]
pub fn k_distances(x: &Matrix<f32>, k: usize, metric: Metric) -> Vec<f32> {
    let k = k.clamp(1, x.n_rows().saturating_sub(1).max(1));
    let mut distances: Vec<f32> = (0..x.n_rows())
        .map(|i| {
            k_nearest(x, x.row(i), k, metric, Some(i))
                .last()
                .map_or(0.0, |p| p.1)
        })
        .collect();
    distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distances
}

/// k-distance quantile at which a relative radius starts.
pub const RELATIVE_RADIUS_FLOOR: f64 = 0.75;

/// Multiple of the largest k-distance at which a relative radius ends.
pub const RELATIVE_RADIUS_CEILING: f64 = 2.0;

/// Maps a relative radius position in [0, 1] onto the k-distance distribution.
///
/// Position 0 is the [`RELATIVE_RADIUS_FLOOR`] quantile, where most
/// samples are already core points, and position 1 is
/// [`RELATIVE_RADIUS_CEILING`] times the largest k-distance, wide enough
/// to bridge every gap inside a density mode. Positions in between are
/// spaced geometrically.
#[must_use]
pub fn relative_radius(sorted_k_distances: &[f32], position: f64) -> f64 {
    let Some(&largest) = sorted_k_distances.last() else {
        return 0.0;
    };
    let pos = RELATIVE_RADIUS_FLOOR * (sorted_k_distances.len() - 1) as f64;
    let below = pos.floor() as usize;
    let above = pos.ceil() as usize;
    let t = pos - below as f64;
    let a = f64::from(sorted_k_distances[below]);
    let b = f64::from(sorted_k_distances[above]);
    // A zero radius would make every duplicate its own neighbourhood only
    let floor = (a + t * (b - a)).max(f64::from(f32::EPSILON));
    let ceiling = (f64::from(largest) * RELATIVE_RADIUS_CEILING).max(floor);
    floor * (ceiling / floor).powf(position.clamp(0.0, 1.0))
}

#[cfg(test)]
#[path = "tests_dbscan_contract.rs"]
mod tests_dbscan_contract;

#[cfg(test)]
#[path = "tests_identifier_contract.rs"]
mod tests_identifier_contract;
