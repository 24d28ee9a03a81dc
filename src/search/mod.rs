//! Parameter search strategies.
//!
//! A node's pipeline is a staged objective: the leading stages (filter and
//! embedding) depend only on a prefix of the parameter vector, and the last
//! stage (cluster identification plus scoring) on the full vector. Both
//! strategies exploit this to share the expensive prefix between vectors.
//!
//! - [`GridSearch`]: exhaustive Cartesian product, first-found tie-break
//! - [`DifferentialEvolution`]: population search with a memoized objective
//!
//! Both return the best vector ever evaluated together with the trial log.

mod de;
mod grid;
mod mesh;
mod space;

pub use de::{DeSettings, DeStrategy, DifferentialEvolution};
pub use grid::GridSearch;
pub use mesh::{Budget, MeshPolicy};
pub use space::{Axis, ParamRange, ParamSpace, ParamVector, Scale, Tunable, AXIS_NAMES};

use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};

/// Why a trial can or cannot be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Two or more clusters with a non-negative score
    Viable,
    /// Two or more clusters, but a negative score
    Negative,
    /// Fewer than two clusters were identified
    TooFewClusters,
    /// A stage failed for this vector
    Failed,
}

/// The outcome of evaluating one parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Candidate coordinates as proposed by the strategy
    pub point: Vec<f64>,
    /// Coordinates after resolving data-relative values
    pub resolved: Vec<f64>,
    /// Quality score, or the minimal score for failed trials
    pub score: f64,
    /// Clusters identified, noise excluded
    pub n_clusters: usize,
    /// Selection status
    pub status: TrialStatus,
}

/// Score assigned to trials that produced fewer than two clusters.
pub const TOO_FEW_CLUSTERS_SCORE: f64 = -1.5;

/// Score assigned to trials whose stages failed.
pub const FAILED_SCORE: f64 = -2.0;

impl Trial {
    /// Builds a trial from a computed score.
    #[must_use]
    pub fn scored(point: Vec<f64>, resolved: Vec<f64>, score: f64, n_clusters: usize) -> Self {
        let (status, score) = if !score.is_finite() {
            (TrialStatus::Failed, FAILED_SCORE)
        } else if n_clusters < 2 {
            (TrialStatus::TooFewClusters, TOO_FEW_CLUSTERS_SCORE)
        } else if score < 0.0 {
            (TrialStatus::Negative, score)
        } else {
            (TrialStatus::Viable, score)
        };
        Self {
            point,
            resolved,
            score,
            n_clusters,
            status,
        }
    }

    /// Builds a failed trial.
    #[must_use]
    pub fn failed(point: Vec<f64>, error: &ReclusterError) -> Self {
        tracing::debug!(?point, %error, "trial failed");
        Self {
            resolved: point.clone(),
            point,
            score: FAILED_SCORE,
            n_clusters: 0,
            status: TrialStatus::Failed,
        }
    }

    /// Whether the trial may be returned as a node's optimum.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        self.status == TrialStatus::Viable
    }

    /// The resolved parameter vector.
    #[must_use]
    pub fn params(&self) -> ParamVector {
        ParamVector::from_point(&self.resolved)
    }
}

/// An objective whose leading stages depend only on a prefix of the vector.
pub trait StagedObjective: Sync {
    /// Output of the leading stages
    type Prefix: Send + Sync;

    /// Number of leading coordinates consumed by [`StagedObjective::prepare`].
    fn head_len(&self) -> usize;

    /// Runs the leading stages for the coordinates `head`.
    ///
    /// # Errors
    ///
    /// Returns an error if a leading stage fails; every vector sharing the
    /// prefix then counts as failed.
    fn prepare(&self, head: &[f64]) -> Result<Self::Prefix>;

    /// Runs the remaining stages and scores the full vector `point`.
    fn complete(&self, prefix: &Self::Prefix, point: &[f64]) -> Trial;

    /// Evaluates a single vector from scratch.
    fn evaluate(&self, point: &[f64]) -> Trial {
        let head = &point[..self.head_len().min(point.len())];
        match self.prepare(head) {
            Ok(prefix) => self.complete(&prefix, point),
            Err(e) => Trial::failed(point.to_vec(), &e),
        }
    }
}

/// Index of the first highest-scoring selectable trial.
#[must_use]
pub fn select_best(trials: &[Trial]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, trial) in trials.iter().enumerate() {
        if !trial.is_selectable() {
            continue;
        }
        match best {
            Some(b) if trials[b].score >= trial.score => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Result of a search over one node's parameter space.
#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    /// Every evaluated trial, in evaluation order
    pub trials: Vec<Trial>,
    /// Index of the selected trial
    pub best: Option<usize>,
    /// Best score after each generation (a single entry for grid search)
    pub history: Vec<f64>,
}

impl SearchReport {
    /// The selected trial, if any was selectable.
    #[must_use]
    pub fn best(&self) -> Option<&Trial> {
        self.best.and_then(|i| self.trials.get(i))
    }

    /// Number of distinct evaluations.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.trials.len()
    }

    /// Number of failed evaluations.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
            .count()
    }

    /// Whether every evaluation failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.trials.is_empty() && self.failures() == self.trials.len()
    }
}

/// A configured search strategy.
#[derive(Debug, Clone)]
pub enum Searcher {
    /// Exhaustive grid
    Grid(GridSearch),
    /// Differential evolution
    Evolution(DifferentialEvolution),
}

impl Searcher {
    /// Runs the strategy over `space`.
    pub fn run<O: StagedObjective>(&self, space: &ParamSpace, objective: &O) -> SearchReport {
        match self {
            Self::Grid(grid) => grid.run(space, objective),
            Self::Evolution(de) => de.run(space, objective),
        }
    }
}

#[cfg(test)]
#[path = "tests_search_contract.rs"]
mod tests_search_contract;
