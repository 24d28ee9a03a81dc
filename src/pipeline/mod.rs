//! Joint optimization of one node's filter → embed → cluster pipeline.
//!
//! [`NodeObjective`] scores a parameter vector by running the three stages
//! on a node's fit rows. It is a [`StagedObjective`]: the filter and the
//! embedding depend only on `(cutoff, n_neighbors)`, so a search shares
//! them between vectors that differ only in the clustering parameter, and
//! the filter output is cached per cutoff.
//!
//! [`optimize_node`] runs the configured search and refits the winning
//! stages into [`TrainedStages`], which can project unseen rows into the
//! node's embedded space.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::cluster::{k_distances, n_clusters, relative_radius, ClusterIdentifier, ClusterKind};
use crate::config::{Optimizer, RunConfig};
use crate::error::{ReclusterError, Result};
use crate::filter::FeatureFilter;
use crate::manifold::NeighborEmbedding;
use crate::metrics::ScoreEvaluator;
use crate::preprocessing::Normalizer;
use crate::primitives::Matrix;
use crate::search::{
    Budget, DifferentialEvolution, GridSearch, ParamSpace, ParamVector, SearchReport, Searcher,
    StagedObjective, Trial,
};
use crate::traits::Transformer;

/// File name of a saved [`MapStore`] inside the run's data directory.
pub const MAPS_FILE: &str = "maps.json";

/// Fitted stages of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedStages {
    /// Normalization fitted on the node's rows, if configured
    pub normalizer: Option<Normalizer>,
    /// Fitted feature filter
    pub filter: FeatureFilter,
    /// Fitted embedder
    pub embedder: NeighborEmbedding,
    /// Cluster identifier with the labels of the fitted rows
    pub clusterer: ClusterIdentifier,
    /// The winning parameter vector
    pub params: ParamVector,
}

impl TrainedStages {
    /// Projects raw feature rows into the node's embedded space.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows do not match the fitted feature count.
    pub fn embed(&self, x: &Matrix<f32>) -> Result<Matrix<f32>> {
        let normalized = match &self.normalizer {
            Some(normalizer) => normalizer.transform(x)?,
            None => x.clone(),
        };
        let filtered = self.filter.transform(&normalized)?;
        self.embedder.transform(&filtered)
    }

    /// Learned embedding of the node's fit rows.
    #[must_use]
    pub fn embedding(&self) -> Option<&Matrix<f32>> {
        self.embedder.embedding()
    }

    /// Labels of the node's fit rows.
    #[must_use]
    pub fn labels(&self) -> Option<&[i32]> {
        self.clusterer.labels()
    }
}

/// Run-scoped store of trained stages, keyed by node name.
///
/// # Examples
///
/// ```
/// use recluster::pipeline::MapStore;
///
/// let store = MapStore::new();
/// assert!(store.is_empty());
/// assert!(store.get("0").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapStore {
    maps: BTreeMap<String, TrainedStages>,
}

impl MapStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the stages of `node`, replacing earlier ones.
    pub fn insert(&mut self, node: impl Into<String>, stages: TrainedStages) {
        self.maps.insert(node.into(), stages);
    }

    /// Stages of `node`.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<&TrainedStages> {
        self.maps.get(node)
    }

    /// Removes the stages of `node`.
    pub fn remove(&mut self, node: &str) -> Option<TrainedStages> {
        self.maps.remove(node)
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Stored node names, in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    /// Writes the store as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a store written by [`MapStore::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Output of the leading stages for one `(cutoff, n_neighbors)` pair.
#[derive(Debug, Clone)]
pub struct EmbeddedPrefix {
    /// Embedding of the node's fit rows
    pub embedding: Matrix<f32>,
    /// Sorted k-distances of the embedding, for relative radii
    pub k_distances: Vec<f32>,
}

/// The clustering-quality objective of one node.
pub struct NodeObjective<'a> {
    config: &'a RunConfig,
    data: &'a Matrix<f32>,
    supervision: Option<&'a [i64]>,
    seed: u64,
    relative_radius: bool,
    evaluator: ScoreEvaluator,
    filtered: Mutex<HashMap<u64, Arc<Matrix<f32>>>>,
}

impl std::fmt::Debug for NodeObjective<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeObjective")
            .field("shape", &self.data.shape())
            .field("seed", &self.seed)
            .field("relative_radius", &self.relative_radius)
            .finish_non_exhaustive()
    }
}

impl<'a> NodeObjective<'a> {
    /// Creates the objective over the (already normalized) fit rows `data`.
    ///
    /// `relative_radius` says whether the clustering coordinate is a
    /// position on the k-distance distribution rather than a radius.
    #[must_use]
    pub fn new(config: &'a RunConfig, data: &'a Matrix<f32>, seed: u64, relative_radius: bool) -> Self {
        Self {
            config,
            data,
            supervision: None,
            seed,
            relative_radius,
            evaluator: ScoreEvaluator::new(config.score, config.metric_clu),
            filtered: Mutex::new(HashMap::new()),
        }
    }

    /// Guides the embedding with per-row label codes (negative = unknown).
    #[must_use]
    pub fn with_supervision(mut self, labels: &'a [i64]) -> Self {
        self.supervision = Some(labels);
        self
    }

    fn filter(&self, cutoff: f64) -> FeatureFilter {
        FeatureFilter::new(self.config.filter, cutoff)
    }

    fn embedder(&self, n_neighbors: usize) -> NeighborEmbedding {
        let embedder = NeighborEmbedding::new(self.config.dim, n_neighbors)
            .with_metric(self.config.metric_map)
            .with_settings(self.config.embedding.clone())
            .with_random_state(self.seed);
        match self.supervision {
            Some(labels) => embedder.with_labels(labels.to_vec()),
            None => embedder,
        }
    }

    fn identifier(&self, param: f64) -> ClusterIdentifier {
        ClusterIdentifier::new(self.config.clusterer, param, self.config.min_cluster_size)
            .with_metric(self.config.metric_clu)
    }

    /// Filter output for `cutoff`, computed once per cutoff.
    fn filtered(&self, cutoff: f64) -> Result<Arc<Matrix<f32>>> {
        let key = cutoff.to_bits();
        if let Some(hit) = self.filtered.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }
        let out = Arc::new(self.filter(cutoff).fit_transform(self.data)?);
        if let Ok(mut cache) = self.filtered.lock() {
            cache.insert(key, Arc::clone(&out));
        }
        Ok(out)
    }

    /// Turns a proposed clustering coordinate into the parameter passed to the clusterer.
    fn resolve_param(&self, prefix: &EmbeddedPrefix, coordinate: f64) -> f64 {
        if self.relative_radius {
            relative_radius(&prefix.k_distances, coordinate)
        } else {
            coordinate
        }
    }

    /// Neighbour rank whose distance sets the DBSCAN radius scale.
    fn radius_rank(&self) -> usize {
        self.config.min_cluster_size.saturating_sub(1).max(1)
    }
}

impl StagedObjective for NodeObjective<'_> {
    type Prefix = EmbeddedPrefix;

    fn head_len(&self) -> usize {
        2
    }

    fn prepare(&self, head: &[f64]) -> Result<EmbeddedPrefix> {
        let params = ParamVector::from_point(head);
        let filtered = self.filtered(params.cutoff)?;
        let embedding = self.embedder(params.n_neighbors).fit_transform(&filtered)?;
        let k_distances = if self.relative_radius && self.config.clusterer == ClusterKind::Dbscan {
            k_distances(&embedding, self.radius_rank(), self.config.metric_clu)
        } else {
            Vec::new()
        };
        Ok(EmbeddedPrefix {
            embedding,
            k_distances,
        })
    }

    fn complete(&self, prefix: &EmbeddedPrefix, point: &[f64]) -> Trial {
        let coordinate = point.get(2).copied().unwrap_or(0.0);
        let param = self.resolve_param(prefix, coordinate);
        let mut resolved = point.to_vec();
        if let Some(slot) = resolved.get_mut(2) {
            *slot = param;
        }

        let labels = match self.identifier(param).identify(&prefix.embedding) {
            Ok(labels) => labels,
            Err(e) => return Trial::failed(point.to_vec(), &e),
        };
        let found = n_clusters(&labels);
        let score = if found < 2 {
            0.0
        } else {
            self.evaluator.score(&prefix.embedding, &labels)
        };
        Trial::scored(point.to_vec(), resolved, score, found)
    }
}

/// The refitted winner of a node's search.
#[derive(Debug, Clone)]
pub struct NodeFit {
    /// Stages refitted with the winning vector
    pub stages: TrainedStages,
    /// Embedding of the fit rows
    pub embedding: Matrix<f32>,
    /// Post-processed labels of the fit rows
    pub labels: Vec<i32>,
    /// The winning trial
    pub trial: Trial,
}

/// Search log and, unless the node is degenerate, its refitted winner.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// Every evaluated trial
    pub report: SearchReport,
    /// `None` when no vector produced two or more clusters with a
    /// non-negative score
    pub fit: Option<NodeFit>,
}

/// Builds the search strategy for a node, applying a mesh budget if any.
fn searcher(config: &RunConfig, budget: Option<Budget>, seed: u64) -> Searcher {
    match &config.optimizer {
        Optimizer::Grid => Searcher::Grid(GridSearch::new().with_parallel(config.parallel)),
        Optimizer::Evolution(settings) => {
            let mut de = DifferentialEvolution::new(settings.clone())
                .with_seed(seed)
                .with_parallel(config.parallel);
            if let Some(Budget::Evolution {
                candidates,
                iterations,
            }) = budget
            {
                de = de.with_budget(candidates, iterations);
            }
            Searcher::Evolution(de)
        }
    }
}

/// Optimizes the pipeline of node `name` over its fit rows `x`.
///
/// # Errors
///
/// Returns [`ReclusterError::OptimizationFailed`] when every candidate
/// vector failed, and propagates configuration and refit errors.
pub fn optimize_node(
    config: &RunConfig,
    name: &str,
    x: &Matrix<f32>,
    supervision: Option<&[i64]>,
    seed: u64,
) -> Result<NodeOutcome> {
    let population = x.n_rows();
    let normalizer = match config.norm {
        Some(norm) => {
            let mut normalizer = Normalizer::new(norm);
            normalizer.fit(x)?;
            Some(normalizer)
        }
        None => None,
    };
    let data = match &normalizer {
        Some(n) => n.transform(x)?,
        None => x.clone(),
    };

    let budget = config
        .dyn_mesh
        .as_ref()
        .map(|mesh| mesh.derive_budget(population, &config.optimizer));
    let points = match budget {
        Some(Budget::Grid { points }) => Some(points),
        _ => None,
    };
    let space = ParamSpace::derive(config, population, data.n_cols(), points)?;
    let relative = space.axes().get(2).is_some_and(|axis| axis.relative);

    let mut objective = NodeObjective::new(config, &data, seed, relative);
    if let Some(labels) = supervision {
        objective = objective.with_supervision(labels);
    }
    let report = searcher(config, budget, seed).run(&space, &objective);

    tracing::debug!(
        node = name,
        population,
        evaluations = report.evaluations(),
        failures = report.failures(),
        "node search finished"
    );

    if report.all_failed() || report.trials.is_empty() {
        return Err(ReclusterError::OptimizationFailed {
            node: name.to_string(),
            candidates: report.evaluations(),
        });
    }
    let Some(trial) = report.best().cloned() else {
        return Ok(NodeOutcome { report, fit: None });
    };

    let params = trial.params();
    let mut filter = objective.filter(params.cutoff);
    let filtered = filter.fit_transform(&data)?;
    let mut embedder = objective.embedder(params.n_neighbors);
    let embedding = embedder.fit_transform(&filtered)?;
    let mut clusterer = objective.identifier(params.cluster_param);
    let labels = clusterer.identify(&embedding)?;

    let stages = TrainedStages {
        normalizer,
        filter,
        embedder,
        clusterer,
        params,
    };
    Ok(NodeOutcome {
        report,
        fit: Some(NodeFit {
            stages,
            embedding,
            labels,
            trial,
        }),
    })
}

#[cfg(test)]
#[path = "tests_pipeline_contract.rs"]
mod tests_pipeline_contract;
