//! Run configuration.
//!
//! A [`RunConfig`] is validated before any computation starts. It
//! serializes to JSON so a run's settings can be stored next to its
//! checkpoints and reloaded for a resume.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterKind;
use crate::error::{ReclusterError, Result};
use crate::filter::FilterKind;
use crate::manifold::EmbedSettings;
use crate::metrics::ScoreKind;
use crate::preprocessing::Norm;
use crate::primitives::Metric;
use crate::search::{DeSettings, MeshPolicy, Tunable};

/// Parameter search strategy of every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimizer {
    /// Exhaustive grid over the declared ranges
    #[default]
    Grid,
    /// Differential evolution
    Evolution(DeSettings),
}

/// What happens to samples left unclassified by cluster identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Keep them as noise at that depth
    #[default]
    Ignore,
    /// Assign them to the nearest identified cluster
    Reassign,
}

/// Full settings of a recursive clustering run.
///
/// # Examples
///
/// ```
/// use recluster::config::{OutlierPolicy, RunConfig};
///
/// let config = RunConfig::default()
///     .with_popcut(20)
///     .with_maxdepth(Some(3))
///     .with_outliers(OutlierPolicy::Reassign)
///     .with_seed(42);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Embedding dimensionality
    pub dim: usize,
    /// Feature filter family
    pub filter: FilterKind,
    /// Filter cutoff range
    pub cutoff: Tunable,
    /// Embedding neighbour count range
    pub neighbors: Tunable,
    /// Cluster identification algorithm
    pub clusterer: ClusterKind,
    /// Clustering parameter range (DBSCAN radius or HDBSCAN minimum cluster size)
    pub cluster_param: Tunable,
    /// Search strategy
    pub optimizer: Optimizer,
    /// Population-scaled search budgets
    pub dyn_mesh: Option<MeshPolicy>,
    /// Distance used to build the embedding graph
    pub metric_map: Metric,
    /// Distance used for cluster identification and scoring
    pub metric_clu: Metric,
    /// Clustering quality score
    pub score: ScoreKind,
    /// Clusters smaller than this are dissolved into noise
    pub min_cluster_size: usize,
    /// Sub-populations below this size are not expanded further
    pub popcut: usize,
    /// Nodes at this depth are not expanded further
    pub maxdepth: Option<usize>,
    /// Handling of noise samples
    pub outliers: OutlierPolicy,
    /// Optional per-node normalization
    pub norm: Option<Norm>,
    /// Embedding optimization settings
    pub embedding: EmbedSettings,
    /// Samples that never fit a stage and are only projected
    pub transform_only: Vec<String>,
    /// Neighbours used to project samples onto fitted clusters
    pub knn: usize,
    /// Run seed; drawn once from entropy when unset
    pub seed: Option<u64>,
    /// Keep every node's trained stages in memory
    pub savemap: bool,
    /// Output directory for checkpoints and results
    pub outpath: Option<PathBuf>,
    /// Write a checkpoint after every completed node
    pub checkpoint: bool,
    /// Name of the root node
    pub root: String,
    /// Evaluate candidate vectors in parallel
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dim: 2,
            filter: FilterKind::Variance,
            cutoff: Tunable::auto(4),
            neighbors: Tunable::auto(3),
            clusterer: ClusterKind::Dbscan,
            cluster_param: Tunable::auto(6),
            optimizer: Optimizer::Grid,
            dyn_mesh: None,
            metric_map: Metric::Euclidean,
            metric_clu: Metric::Euclidean,
            score: ScoreKind::Silhouette,
            min_cluster_size: 10,
            popcut: 50,
            maxdepth: None,
            outliers: OutlierPolicy::Ignore,
            norm: None,
            embedding: EmbedSettings::default(),
            transform_only: Vec::new(),
            knn: 5,
            seed: None,
            savemap: false,
            outpath: None,
            checkpoint: false,
            root: "0".to_string(),
            parallel: true,
        }
    }
}

impl RunConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the embedding dimensionality.
    #[must_use]
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    /// Sets the feature filter family.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterKind) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the filter cutoff range.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: Tunable) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Sets the neighbour count range.
    #[must_use]
    pub fn with_neighbors(mut self, neighbors: Tunable) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Sets the clustering algorithm.
    #[must_use]
    pub fn with_clusterer(mut self, clusterer: ClusterKind) -> Self {
        self.clusterer = clusterer;
        self
    }

    /// Sets the clustering parameter range.
    #[must_use]
    pub fn with_cluster_param(mut self, cluster_param: Tunable) -> Self {
        self.cluster_param = cluster_param;
        self
    }

    /// Sets the search strategy.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Enables population-scaled search budgets.
    #[must_use]
    pub fn with_dyn_mesh(mut self, policy: MeshPolicy) -> Self {
        self.dyn_mesh = Some(policy);
        self
    }

    /// Sets the embedding graph metric.
    #[must_use]
    pub fn with_metric_map(mut self, metric: Metric) -> Self {
        self.metric_map = metric;
        self
    }

    /// Sets the clustering and scoring metric.
    #[must_use]
    pub fn with_metric_clu(mut self, metric: Metric) -> Self {
        self.metric_clu = metric;
        self
    }

    /// Sets the clustering quality score.
    #[must_use]
    pub fn with_score(mut self, score: ScoreKind) -> Self {
        self.score = score;
        self
    }

    /// Sets the minimum cluster size.
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    /// Sets the population floor.
    #[must_use]
    pub fn with_popcut(mut self, popcut: usize) -> Self {
        self.popcut = popcut;
        self
    }

    /// Sets the depth limit.
    #[must_use]
    pub fn with_maxdepth(mut self, maxdepth: Option<usize>) -> Self {
        self.maxdepth = maxdepth;
        self
    }

    /// Sets the noise policy.
    #[must_use]
    pub fn with_outliers(mut self, outliers: OutlierPolicy) -> Self {
        self.outliers = outliers;
        self
    }

    /// Sets the per-node normalization.
    #[must_use]
    pub fn with_norm(mut self, norm: Option<Norm>) -> Self {
        self.norm = norm;
        self
    }

    /// Sets the embedding optimization settings.
    #[must_use]
    pub fn with_embedding(mut self, embedding: EmbedSettings) -> Self {
        self.embedding = embedding;
        self
    }

    /// Sets the samples that are only projected, never fitted.
    #[must_use]
    pub fn with_transform_only(mut self, ids: Vec<String>) -> Self {
        self.transform_only = ids;
        self
    }

    /// Sets the projection neighbour count.
    #[must_use]
    pub fn with_knn(mut self, k: usize) -> Self {
        self.knn = k;
        self
    }

    /// Sets the run seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Keeps trained stages in memory.
    #[must_use]
    pub fn with_savemap(mut self, savemap: bool) -> Self {
        self.savemap = savemap;
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_outpath(mut self, outpath: impl Into<PathBuf>) -> Self {
        self.outpath = Some(outpath.into());
        self
    }

    /// Enables per-node checkpoints.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Sets the root node name.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Enables or disables parallel candidate evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Whether a node at `depth` may be expanded.
    #[must_use]
    pub fn depth_allows(&self, depth: usize) -> bool {
        self.maxdepth.map_or(true, |max| depth < max)
    }

    /// Rejects contradictory or out-of-range settings.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(ReclusterError::invalid_config("dim", self.dim, ">= 1"));
        }
        if self.min_cluster_size < 2 {
            return Err(ReclusterError::invalid_config(
                "min_cluster_size",
                self.min_cluster_size,
                ">= 2",
            ));
        }
        if self.popcut < 2 {
            return Err(ReclusterError::invalid_config("popcut", self.popcut, ">= 2"));
        }
        if self.maxdepth == Some(0) {
            return Err(ReclusterError::invalid_config("maxdepth", 0, ">= 1 or unset"));
        }
        if self.knn == 0 {
            return Err(ReclusterError::invalid_config("knn", 0, ">= 1"));
        }
        if self.root.is_empty() || self.root.contains('_') {
            return Err(ReclusterError::invalid_config(
                "root",
                &self.root,
                "non-empty name without '_'",
            ));
        }
        if self.checkpoint && self.outpath.is_none() {
            return Err(ReclusterError::invalid_config(
                "checkpoint",
                true,
                "an outpath to write checkpoints to",
            ));
        }

        self.cutoff.validate("cutoff")?;
        self.neighbors.validate("neighbors")?;
        self.cluster_param.validate("cluster_param")?;

        match self.filter {
            FilterKind::TruncatedSvd => {
                if self.cutoff.declared_values().iter().any(|&v| v < 1.0) {
                    return Err(ReclusterError::invalid_config(
                        "cutoff",
                        format!("{:?}", self.cutoff.range),
                        "component counts >= 1 for truncated SVD",
                    ));
                }
            }
            FilterKind::Variance | FilterKind::Mad => {
                if self
                    .cutoff
                    .declared_values()
                    .iter()
                    .any(|&v| v <= 0.0 || v > 1.0)
                {
                    return Err(ReclusterError::invalid_config(
                        "cutoff",
                        format!("{:?}", self.cutoff.range),
                        "fractions in (0, 1]",
                    ));
                }
            }
        }
        if self.neighbors.declared_values().iter().any(|&v| v < 2.0) {
            return Err(ReclusterError::invalid_config(
                "neighbors",
                format!("{:?}", self.neighbors.range),
                "neighbour counts >= 2",
            ));
        }
        let cluster_floor = match self.clusterer {
            ClusterKind::Dbscan => f64::MIN_POSITIVE,
            ClusterKind::Hdbscan => 2.0,
        };
        if self
            .cluster_param
            .declared_values()
            .iter()
            .any(|&v| v < cluster_floor)
        {
            return Err(ReclusterError::invalid_config(
                "cluster_param",
                format!("{:?}", self.cluster_param.range),
                match self.clusterer {
                    ClusterKind::Dbscan => "radii > 0",
                    ClusterKind::Hdbscan => "minimum cluster sizes >= 2",
                },
            ));
        }

        if let Optimizer::Evolution(settings) = &self.optimizer {
            settings.validate()?;
        }
        if let Some(policy) = &self.dyn_mesh {
            policy.validate()?;
        }
        self.embedding.validate()?;
        Ok(())
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
