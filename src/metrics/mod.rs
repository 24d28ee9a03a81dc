//! Clustering quality scores.
//!
//! Scores are computed in the embedded space under the clustering metric.
//! Higher is better for both scores.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::NOISE;
use crate::primitives::{pairwise, Matrix, Metric};

/// Clustering quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Mean silhouette coefficient, in [-1, 1]
    #[default]
    Silhouette,
    /// Dunn index: smallest inter-cluster gap over largest cluster diameter
    Dunn,
}

/// Scores a labelling of embedded points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvaluator {
    kind: ScoreKind,
    metric: Metric,
}

impl ScoreEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(kind: ScoreKind, metric: Metric) -> Self {
        Self { kind, metric }
    }

    /// The score family.
    #[must_use]
    pub fn kind(&self) -> ScoreKind {
        self.kind
    }

    /// Scores `labels` (noise = -1) of the rows of `data`.
    #[must_use]
    pub fn score(&self, data: &Matrix<f32>, labels: &[i32]) -> f64 {
        match self.kind {
            ScoreKind::Silhouette => silhouette_score(data, labels, self.metric),
            ScoreKind::Dunn => dunn_index(data, labels, self.metric),
        }
    }
}

/// Computes the silhouette coefficient for a single point.
fn silhouette_coefficient(a_i: f64, b_i: f64) -> f64 {
    let max_ab = a_i.max(b_i);
    if max_ab == 0.0 {
        0.0
    } else {
        (b_i - a_i) / max_ab
    }
}

/// Dense group index of every label; noise forms its own group.
fn group_index(labels: &[i32]) -> (Vec<usize>, usize) {
    let mut seen: Vec<i32> = labels.to_vec();
    seen.sort_unstable();
    seen.dedup();
    let index = labels
        .iter()
        .map(|l| seen.binary_search(l).unwrap_or(0))
        .collect();
    (index, seen.len())
}

/// Computes the silhouette score for clustering quality.
///
/// s(i) = (b(i) - a(i)) / max(a(i), b(i))
///
/// where:
/// - a(i) = mean distance to other points in same group
/// - b(i) = mean distance to points in nearest other group
///
/// Noise points (label -1) form one group of their own, so a labelling
/// that discards many points as noise is scored on that grouping too.
/// Members of singleton groups contribute 0. Fewer than two groups
/// score 0.
///
/// # Examples
///
/// ```
/// use recluster::metrics::silhouette_score;
/// use recluster::primitives::{Matrix, Metric};
///
/// let data = Matrix::from_vec(4, 2, vec![
///     0.0, 0.0,
///     0.1, 0.1,
///     5.0, 5.0,
///     5.1, 5.1,
/// ]).expect("Matrix dimensions and data length are valid");
/// let labels = vec![0, 0, 1, 1];
/// let score = silhouette_score(&data, &labels, Metric::Euclidean);
/// assert!(score > 0.5);
/// ```
#[must_use]
pub fn silhouette_score(data: &Matrix<f32>, labels: &[i32], metric: Metric) -> f64 {
    let n = data.n_rows();
    if n < 2 || labels.len() != n {
        return 0.0;
    }
    let (groups, n_groups) = group_index(labels);
    if n_groups < 2 {
        return 0.0;
    }
    let mut sizes = vec![0usize; n_groups];
    for &g in &groups {
        sizes[g] += 1;
    }
    let distances = pairwise(data, metric);

    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = groups[i];
            if sizes[own] < 2 {
                return 0.0;
            }
            let mut sums = vec![0.0_f64; n_groups];
            for j in 0..n {
                if j != i {
                    sums[groups[j]] += f64::from(distances[i * n + j]);
                }
            }
            let a_i = sums[own] / (sizes[own] - 1) as f64;
            let b_i = (0..n_groups)
                .filter(|&g| g != own && sizes[g] > 0)
                .map(|g| sums[g] / sizes[g] as f64)
                .fold(f64::INFINITY, f64::min);
            silhouette_coefficient(a_i, b_i)
        })
        .sum();
    total / n as f64
}

/// Computes the Dunn index over non-noise clusters.
///
/// D = min inter-cluster point distance / max intra-cluster diameter.
/// Fewer than two clusters, or zero diameters everywhere, score 0.
#[must_use]
pub fn dunn_index(data: &Matrix<f32>, labels: &[i32], metric: Metric) -> f64 {
    let n = data.n_rows();
    if labels.len() != n {
        return 0.0;
    }
    let members: Vec<usize> = (0..n).filter(|&i| labels[i] != NOISE).collect();
    let mut distinct: Vec<i32> = members.iter().map(|&i| labels[i]).collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        return 0.0;
    }

    let mut min_between = f64::INFINITY;
    let mut max_diameter = 0.0_f64;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            let d = f64::from(metric.distance(data.row(i), data.row(j)));
            if labels[i] == labels[j] {
                max_diameter = max_diameter.max(d);
            } else {
                min_between = min_between.min(d);
            }
        }
    }
    if max_diameter == 0.0 || !min_between.is_finite() {
        return 0.0;
    }
    min_between / max_diameter
}

#[cfg(test)]
#[path = "tests_clustering_contract.rs"]
mod tests_clustering_contract;
