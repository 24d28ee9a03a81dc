//! Neighbour-graph embedding: the second stage of a node's pipeline.
//!
//! A fuzzy k-nearest-neighbour graph is built in the filtered feature
//! space and laid out in a low-dimensional space by stochastic gradient
//! descent with negative sampling.
//!
//! # Algorithm
//!
//! 1. k-nearest neighbours of every sample under the map metric
//! 2. Per-sample bandwidth σᵢ by binary search so that
//!    `Σⱼ exp(-(dᵢⱼ - ρᵢ)/σᵢ) = log2(k)`, with ρᵢ the nearest distance
//! 3. Fuzzy union of the directed memberships: `w = a + b - a·b`
//! 4. Optional supervision: edges between differently labelled samples are down-weighted
//! 5. Principal-axis initialization, then attractive/repulsive SGD with
//!    the low-dimensional kernel `1 / (1 + a·d^(2b))`
//!
//! Inputs with no more features than embedding dimensions skip steps 1-4
//! and the SGD: their principal-axis layout is returned as is.
//!
//! Held-out samples are placed at the kernel-weighted mean of their
//! neighbours' embedded positions, so they never influence the layout.
//!
//! # Example
//!
//! ```
//! use recluster::prelude::*;
//! use recluster::manifold::NeighborEmbedding;
//!
//! let mut rows = Vec::new();
//! for i in 0..30 {
//!     let offset = if i < 15 { 0.0 } else { 20.0 };
//!     let jitter = (i % 5) as f32 * 0.1;
//!     rows.extend_from_slice(&[offset + jitter, offset - jitter, offset + 0.5 * jitter]);
//! }
//! let data = Matrix::from_vec(30, 3, rows).expect("valid matrix dimensions");
//!
//! let mut embedder = NeighborEmbedding::new(2, 5).with_random_state(7);
//! let embedding = embedder.fit_transform(&data).expect("fit_transform should succeed");
//! assert_eq!(embedding.shape(), (30, 2));
//! ```

use std::collections::BTreeMap;

use nalgebra::{DMatrix, SymmetricEigen};
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::primitives::{k_nearest, Matrix, Metric};
use crate::traits::Transformer;

/// Layout optimization settings shared by every node of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    /// SGD epochs
    pub n_epochs: usize,
    /// Minimum distance between embedded points
    pub min_dist: f32,
    /// Scale of the embedded clusters
    pub spread: f32,
    /// Initial SGD learning rate
    pub learning_rate: f32,
    /// Negative samples per positive edge sample
    pub negative_sample_rate: usize,
    /// Down-weighting of edges between differently labelled samples, in [0, 1]
    pub supervised_weight: f32,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            n_epochs: 200,
            min_dist: 0.1,
            spread: 1.0,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            supervised_weight: 0.5,
        }
    }
}

impl EmbedSettings {
    /// Checks the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] for out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if self.n_epochs == 0 {
            return Err(ReclusterError::invalid_config("embedding.n_epochs", 0, ">= 1"));
        }
        if !(self.spread > 0.0) {
            return Err(ReclusterError::invalid_config("embedding.spread", self.spread, "> 0"));
        }
        if !(self.min_dist >= 0.0 && self.min_dist < self.spread) {
            return Err(ReclusterError::invalid_config(
                "embedding.min_dist",
                self.min_dist,
                "in [0, spread)",
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ReclusterError::invalid_config(
                "embedding.learning_rate",
                self.learning_rate,
                "> 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.supervised_weight) {
            return Err(ReclusterError::invalid_config(
                "embedding.supervised_weight",
                self.supervised_weight,
                "in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Fits `(a, b)` of the kernel `1 / (1 + a·x^(2b))` to the offset
    /// exponential decay defined by `min_dist` and `spread`.
    #[must_use]
    pub fn curve(&self) -> (f32, f32) {
        let xs: Vec<f32> = (0..100).map(|i| i as f32 * 3.0 * self.spread / 99.0).collect();
        let target: Vec<f32> = xs
            .iter()
            .map(|&x| {
                if x < self.min_dist {
                    1.0
                } else {
                    (-(x - self.min_dist) / self.spread).exp()
                }
            })
            .collect();
        let error = |a: f32, b: f32| -> f32 {
            xs.iter()
                .zip(&target)
                .map(|(&x, &t)| {
                    let y = 1.0 / (1.0 + a * x.powf(2.0 * b));
                    (y - t) * (y - t)
                })
                .sum()
        };

        // Coarse grid, then a finer grid around the coarse optimum
        let mut best = (1.0_f32, 1.0_f32, f32::INFINITY);
        for ia in 0..60 {
            let a = (0.05_f32.ln() + ia as f32 * (20.0_f32.ln() - 0.05_f32.ln()) / 59.0).exp();
            for ib in 0..40 {
                let b = 0.2 + ib as f32 * 1.8 / 39.0;
                let e = error(a, b);
                if e < best.2 {
                    best = (a, b, e);
                }
            }
        }
        let (a0, b0) = (best.0, best.1);
        for ia in 0..41 {
            let a = a0 * (0.8 + ia as f32 * 0.01);
            for ib in 0..41 {
                let b = (b0 - 0.05 + ib as f32 * 0.0025).max(0.05);
                let e = error(a, b);
                if e < best.2 {
                    best = (a, b, e);
                }
            }
        }
        (best.0, best.1)
    }
}

/// Nonlinear embedding built from a fuzzy neighbour graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEmbedding {
    /// Number of dimensions of the embedding.
    n_components: usize,
    /// Neighbourhood size of the graph.
    n_neighbors: usize,
    /// Metric of the input space.
    metric: Metric,
    /// Layout settings.
    settings: EmbedSettings,
    /// Random seed for reproducibility.
    random_state: Option<u64>,
    /// Supervision codes, negative for unknown.
    #[serde(skip)]
    labels: Option<Vec<i64>>,
    /// Fitted input rows, kept to place new samples.
    training: Option<Matrix<f32>>,
    /// The learned embedding of the fitted rows.
    embedding: Option<Matrix<f32>>,
}

impl NeighborEmbedding {
    /// Create an embedder with default layout settings.
    #[must_use]
    pub fn new(n_components: usize, n_neighbors: usize) -> Self {
        Self {
            n_components,
            n_neighbors,
            metric: Metric::Euclidean,
            settings: EmbedSettings::default(),
            random_state: None,
            labels: None,
            training: None,
            embedding: None,
        }
    }

    /// Set the input-space metric.
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the layout settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EmbedSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set random seed for reproducibility.
    #[must_use]
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Supervise the layout with per-sample label codes (negative = unknown).
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<i64>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Number of embedding dimensions.
    #[must_use]
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Neighbourhood size.
    #[must_use]
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Check if model has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.embedding.is_some()
    }

    /// The learned embedding of the fitted rows.
    #[must_use]
    pub fn embedding(&self) -> Option<&Matrix<f32>> {
        self.embedding.as_ref()
    }

    /// Whether `x` has more features than the embedding has dimensions.
    ///
    /// Only then is the layout optimized; otherwise the principal-axis
    /// layout is already an exact image of the input.
    #[must_use]
    pub fn is_reducing(&self, x: &Matrix<f32>) -> bool {
        x.n_cols() > self.n_components
    }

    /// Directed k-nearest-neighbour lists of every row.
    fn knn_graph(&self, x: &Matrix<f32>) -> Vec<Vec<(usize, f32)>> {
        (0..x.n_rows())
            .into_par_iter()
            .map(|i| k_nearest(x, x.row(i), self.n_neighbors, self.metric, Some(i)))
            .collect()
    }

    /// Symmetrized, optionally supervised, edge list `(i, j, weight)` with `i < j`.
    fn fuzzy_edges(&self, graph: &[Vec<(usize, f32)>]) -> Vec<(usize, usize, f32)> {
        let mut directed: BTreeMap<(usize, usize), (f32, f32)> = BTreeMap::new();
        for (i, neighbors) in graph.iter().enumerate() {
            let distances: Vec<f32> = neighbors.iter().map(|p| p.1).collect();
            let (rho, sigma) = smooth_knn(&distances, self.n_neighbors);
            for &(j, d) in neighbors {
                let w = (-(d - rho).max(0.0) / sigma).exp();
                let key = (i.min(j), i.max(j));
                let entry = directed.entry(key).or_insert((0.0, 0.0));
                if i < j {
                    entry.0 = w;
                } else {
                    entry.1 = w;
                }
            }
        }

        let sw = self.settings.supervised_weight;
        directed
            .into_iter()
            .filter_map(|((i, j), (a, b))| {
                let mut w = a + b - a * b;
                if let Some(labels) = &self.labels {
                    let (li, lj) = (labels[i], labels[j]);
                    if li >= 0 && lj >= 0 && li != lj {
                        w *= 1.0 - sw;
                    }
                }
                (w > 0.0).then_some((i, j, w))
            })
            .collect()
    }

    /// Principal-axis initialization scaled to [-10, 10].
    fn initial_layout(&self, x: &Matrix<f32>, rng: &mut StdRng) -> Vec<f32> {
        let (n, p) = x.shape();
        let dim = self.n_components;
        let means = x.column_means();
        let centered: Vec<f64> = x
            .rows_iter()
            .flat_map(|row| row.iter().zip(&means).map(|(v, m)| f64::from(v - m)))
            .collect();
        let data = DMatrix::from_row_slice(n, p, &centered);
        let cov = data.transpose() * &data;
        let eigen = SymmetricEigen::new(cov);
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut y = vec![0.0_f32; n * dim];
        for i in 0..n {
            for c in 0..dim {
                y[i * dim + c] = match order.get(c) {
                    Some(&axis) => (0..p)
                        .map(|k| centered[i * p + k] * eigen.eigenvectors[(k, axis)])
                        .sum::<f64>() as f32,
                    None => rng.gen_range(-1.0..1.0),
                };
            }
        }

        let max_abs = y.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
        let scale = if max_abs > 1e-12 { 10.0 / max_abs } else { 1.0 };
        for v in &mut y {
            *v = *v * scale + rng.gen_range(-1e-4..1e-4);
        }
        y
    }

    /// Attractive/repulsive SGD over the edge list.
    fn optimize_layout(&self, y: &mut [f32], edges: &[(usize, usize, f32)], rng: &mut StdRng) {
        let n = y.len() / self.n_components.max(1);
        let dim = self.n_components;
        let (a, b) = self.settings.curve();
        let n_epochs = self.settings.n_epochs;
        let neg_rate = self.settings.negative_sample_rate as f32;

        let max_w = edges.iter().fold(0.0_f32, |m, e| m.max(e.2));
        if max_w <= 0.0 {
            return;
        }
        let per_sample: Vec<f32> = edges.iter().map(|e| max_w / e.2).collect();
        let per_negative: Vec<f32> = per_sample
            .iter()
            .map(|&s| if neg_rate > 0.0 { s / neg_rate } else { f32::INFINITY })
            .collect();
        let mut next_sample = per_sample.clone();
        let mut next_negative = per_negative.clone();

        let clip = |g: f32| g.clamp(-4.0, 4.0);

        for epoch in 0..n_epochs {
            let now = (epoch + 1) as f32;
            let alpha = self.settings.learning_rate * (1.0 - epoch as f32 / n_epochs as f32);

            for (e, &(i, j, _)) in edges.iter().enumerate() {
                if next_sample[e] > now {
                    continue;
                }
                let dist_sq: f32 = (0..dim)
                    .map(|d| (y[i * dim + d] - y[j * dim + d]).powi(2))
                    .sum();
                if dist_sq > 0.0 {
                    let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0)
                        / (1.0 + a * dist_sq.powf(b));
                    for d in 0..dim {
                        let g = clip(coeff * (y[i * dim + d] - y[j * dim + d]));
                        y[i * dim + d] += g * alpha;
                        y[j * dim + d] -= g * alpha;
                    }
                }
                next_sample[e] += per_sample[e];

                if per_negative[e].is_finite() {
                    let n_neg = ((now - next_negative[e]) / per_negative[e]).max(0.0) as usize;
                    for _ in 0..n_neg {
                        let k = rng.gen_range(0..n);
                        if k == i {
                            continue;
                        }
                        let dist_sq: f32 = (0..dim)
                            .map(|d| (y[i * dim + d] - y[k * dim + d]).powi(2))
                            .sum();
                        let coeff = if dist_sq > 0.0 {
                            2.0 * b / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
                        } else {
                            0.0
                        };
                        for d in 0..dim {
                            let g = clip(coeff * (y[i * dim + d] - y[k * dim + d]));
                            y[i * dim + d] += g * alpha;
                        }
                    }
                    next_negative[e] += n_neg as f32 * per_negative[e];
                }
            }
        }
    }
}

/// Nearest-distance offset ρ and bandwidth σ of one neighbour list.
///
/// Binary search for σ such that `Σ exp(-(d - ρ)/σ) = log2(k)`.
fn smooth_knn(distances: &[f32], k: usize) -> (f32, f32) {
    let rho = distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
    let target = (k.max(2) as f32).log2();
    let mean = if distances.is_empty() {
        1.0
    } else {
        distances.iter().sum::<f32>() / distances.len() as f32
    };

    let mut lo = 0.0_f32;
    let mut hi = f32::INFINITY;
    let mut sigma = 1.0_f32;
    for _ in 0..64 {
        let psum: f32 = distances
            .iter()
            .map(|&d| (-(d - rho).max(0.0) / sigma).exp())
            .sum();
        if (psum - target).abs() < 1e-5 {
            break;
        }
        if psum > target {
            hi = sigma;
            sigma = (lo + hi) / 2.0;
        } else {
            lo = sigma;
            sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    (rho, sigma.max(1e-3 * mean).max(1e-8))
}

impl Transformer for NeighborEmbedding {
    fn fit(&mut self, x: &Matrix<f32>) -> Result<()> {
        let n = x.n_rows();
        if self.n_components == 0 {
            return Err(ReclusterError::stage("embed", "n_components must be >= 1"));
        }
        if self.n_neighbors < 2 || self.n_neighbors >= n {
            return Err(ReclusterError::stage(
                "embed",
                format!("n_neighbors = {} needs 2 <= k < {n}", self.n_neighbors),
            ));
        }
        if x.n_cols() == 0 {
            return Err(ReclusterError::stage("embed", "no input features"));
        }
        if let Some(labels) = &self.labels {
            if labels.len() != n {
                return Err(ReclusterError::dimension_mismatch("labels", n, labels.len()));
            }
        }

        let mut rng = match self.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut y = self.initial_layout(x, &mut rng);
        if self.is_reducing(x) {
            let graph = self.knn_graph(x);
            let edges = self.fuzzy_edges(&graph);
            self.optimize_layout(&mut y, &edges, &mut rng);
        } else {
            tracing::trace!(
                features = x.n_cols(),
                n_components = self.n_components,
                "input fits the target dimension, keeping the principal-axis layout"
            );
        }

        if y.iter().any(|v| !v.is_finite()) {
            return Err(ReclusterError::stage("embed", "layout diverged"));
        }
        self.embedding = Some(Matrix::from_vec(n, self.n_components, y)?);
        self.training = Some(x.clone());
        Ok(())
    }

    fn transform(&self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        let (training, embedding) = match (&self.training, &self.embedding) {
            (Some(t), Some(e)) => (t, e),
            _ => return Err("NeighborEmbedding not fitted".into()),
        };
        if x.n_cols() != training.n_cols() {
            return Err(ReclusterError::dimension_mismatch(
                "features",
                training.n_cols(),
                x.n_cols(),
            ));
        }
        let dim = self.n_components;
        if x.n_rows() == 0 {
            return Ok(Matrix::zeros(0, dim));
        }
        let k = self.n_neighbors.min(training.n_rows());
        let placed: Vec<Vec<f32>> = (0..x.n_rows())
            .into_par_iter()
            .map(|i| {
                let neighbors = k_nearest(training, x.row(i), k, self.metric, None);
                let distances: Vec<f32> = neighbors.iter().map(|p| p.1).collect();
                let (rho, sigma) = smooth_knn(&distances, k);
                let mut position = vec![0.0_f32; dim];
                let mut total = 0.0_f32;
                for &(j, d) in &neighbors {
                    let w = (-(d - rho).max(0.0) / sigma).exp();
                    total += w;
                    for (c, p) in position.iter_mut().enumerate() {
                        *p += w * embedding.get(j, c);
                    }
                }
                let total = if total > 0.0 { total } else { 1.0 };
                position.iter_mut().for_each(|p| *p /= total);
                position
            })
            .collect();
        Matrix::from_rows(&placed)
    }

    /// Returns the learned layout of the fitted rows.
    fn fit_transform(&mut self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        self.fit(x)?;
        self.embedding
            .clone()
            .ok_or_else(|| ReclusterError::stage("embed", "no embedding produced"))
    }
}

#[cfg(test)]
#[path = "tests_embedding_contract.rs"]
mod tests_embedding_contract;
