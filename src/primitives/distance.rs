//! Distance metrics shared by the embedder, the clusterers and the scorer.

use serde::{Deserialize, Serialize};

use super::Matrix;

/// Distance metric between two feature rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance: `sqrt(sum((x_i - y_i)^2))`
    #[default]
    Euclidean,
    /// Cosine distance: `1 - cos(x, y)`; zero vectors are at distance 1
    Cosine,
}

impl Metric {
    /// Computes the distance between two equally sized rows.
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let mut dot = 0.0;
                let mut na = 0.0;
                let mut nb = 0.0;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0)
            }
        }
    }
}

/// The `k` rows of `reference` closest to `query`, nearest first.
///
/// Rows listed in `exclude` are skipped. Ties keep row order.
#[must_use]
pub fn k_nearest(
    reference: &Matrix<f32>,
    query: &[f32],
    k: usize,
    metric: Metric,
    exclude: Option<usize>,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = reference
        .rows_iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != exclude)
        .map(|(i, row)| (i, metric.distance(query, row)))
        .collect();
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);
    scored
}

/// Full pairwise distance matrix of the rows of `x`, row-major `n x n`.
#[must_use]
pub fn pairwise(x: &Matrix<f32>, metric: Metric) -> Vec<f32> {
    let n = x.n_rows();
    let mut distances = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = metric.distance(x.row(i), x.row(j));
            distances[i * n + j] = d;
            distances[j * n + i] = d;
        }
    }
    distances
}
