//! The recursion controller.
//!
//! Nodes are processed from a FIFO queue by a single writer. Processing a
//! node:
//!
//! 1. splits its samples into fit rows and held-out (`transform_only`) rows
//! 2. optimizes the filter → embed → cluster pipeline on the fit rows
//! 3. projects held-out rows into the winning embedding and labels them
//!    by nearest neighbours
//! 4. reassigns noise when [`OutlierPolicy::Reassign`] is set
//! 5. records every surviving cluster as a child, in the tree and in the
//!    ledger, and enqueues the children that pass `popcut` and `maxdepth`
//!
//! A node whose best solution is a single cluster (or that has no viable
//! solution) terminates. Checkpoints are written after every processed node
//! when enabled, and [`RecursiveClustering::resume`] continues from them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{
    threshold_termination, CheckpointManager, Manifest, Membership, NodeCheckpoint, DATA_DIR,
    FORMAT_VERSION,
};
use crate::classification::KNearestNeighbors;
use crate::cluster::{n_clusters, NOISE};
use crate::config::{OutlierPolicy, RunConfig};
use crate::data::Dataset;
use crate::error::{ReclusterError, Result};
use crate::ledger::{noise_column, MembershipLedger};
use crate::pipeline::{optimize_node, MapStore, TrainedStages, MAPS_FILE};
use crate::preprocessing::Norm;
use crate::primitives::{Matrix, Metric};
use crate::search::ParamVector;
use crate::tree::{ClusterTree, NodeId, Termination};

const LEDGER_FILE: &str = "ledger.json";
const RECORDS_FILE: &str = "records.json";

/// Parameters and outcome of one processed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name
    pub name: String,
    /// Node depth
    pub depth: usize,
    /// Samples in the node, held-out rows included
    pub population: usize,
    /// Clusters identified
    pub n_clusters: usize,
    /// Embedding dimension
    pub dim: usize,
    /// Winning score, absent when no solution was viable
    pub score: Option<f64>,
    /// Winning parameter vector
    pub params: Option<ParamVector>,
    /// Metric of the embedding graph
    pub metric_map: Metric,
    /// Metric of clustering and scoring
    pub metric_clu: Metric,
    /// Normalization applied
    pub norm: Option<Norm>,
    /// Noise samples forced into a cluster
    pub reassigned: usize,
    /// Samples left as noise
    pub noise: usize,
    /// Vectors evaluated by the search
    pub evaluations: usize,
    /// Seed of the node's stages
    pub seed: u64,
    /// Why the node has no children, if it has none
    pub termination: Termination,
}

/// Result of a recursive clustering run.
#[derive(Debug, Clone)]
pub struct ClusteringRun {
    /// The hierarchy
    pub tree: ClusterTree,
    /// One-hot membership table
    pub ledger: MembershipLedger,
    /// Records of processed nodes, in processing order
    pub records: Vec<NodeRecord>,
    /// Trained stages (filled when `savemap` or `checkpoint` is set)
    pub maps: MapStore,
    /// Run seed
    pub seed: u64,
}

impl ClusteringRun {
    /// Record of node `name`.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&NodeRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Deepest node depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tree.max_depth()
    }

    /// Writes the ledger, records and any stored stages under
    /// `<outpath>/recluster_data`. Returns that directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn save(&self, outpath: &Path) -> Result<PathBuf> {
        let dir = outpath.join(DATA_DIR);
        std::fs::create_dir_all(&dir)?;
        self.ledger.save(dir.join(LEDGER_FILE))?;
        std::fs::write(dir.join(RECORDS_FILE), serde_json::to_string_pretty(&self.records)?)?;
        if !self.maps.is_empty() {
            self.maps.save(dir.join(MAPS_FILE))?;
        }
        Ok(dir)
    }
}

/// Mutable state of a run between nodes.
#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) tree: ClusterTree,
    pub(crate) ledger: MembershipLedger,
    pub(crate) records: Vec<NodeRecord>,
    pub(crate) maps: MapStore,
    pub(crate) queue: VecDeque<NodeId>,
}

impl RunState {
    fn fresh(root: &str, samples: Vec<String>) -> Self {
        Self {
            tree: ClusterTree::new(root, samples.clone()),
            ledger: MembershipLedger::new(root, samples),
            records: Vec::new(),
            maps: MapStore::new(),
            queue: VecDeque::from([0]),
        }
    }

    pub(crate) fn finish(self, seed: u64) -> ClusteringRun {
        ClusteringRun {
            tree: self.tree,
            ledger: self.ledger,
            records: self.records,
            maps: self.maps,
            seed,
        }
    }
}

/// Deterministic per-node seed: the run seed mixed with an FNV-1a hash of the name.
#[must_use]
pub fn node_seed(run_seed: u64, name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    run_seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ hash
}

/// Labels `queries` from the labelled `reference` rows by weighted k-NN.
///
/// Rows labelled noise vote for noise only when `noise_votes` is set.
fn assign_by_neighbors(
    reference: &Matrix<f32>,
    labels: &[i32],
    queries: &Matrix<f32>,
    k: usize,
    metric: Metric,
    noise_votes: bool,
) -> Result<Vec<i32>> {
    let keep: Vec<usize> = (0..labels.len())
        .filter(|&i| noise_votes || labels[i] != NOISE)
        .collect();
    if keep.is_empty() || queries.n_rows() == 0 {
        return Ok(vec![NOISE; queries.n_rows()]);
    }
    let noise_class = labels.iter().copied().max().unwrap_or(NOISE).max(0) as usize + 1;
    let classes: Vec<usize> = keep
        .iter()
        .map(|&i| if labels[i] == NOISE { noise_class } else { labels[i] as usize })
        .collect();

    let mut knn = KNearestNeighbors::new(k).with_metric(metric).with_weights(true);
    knn.fit(&reference.select_rows(&keep), &classes)?;
    Ok(knn
        .predict(queries)?
        .into_iter()
        .map(|c| if c == noise_class { NOISE } else { c as i32 })
        .collect())
}

/// Drives the recursion over a dataset.
///
/// # Examples
///
/// ```no_run
/// use recluster::prelude::*;
///
/// # fn main() -> recluster::error::Result<()> {
/// let values = Matrix::from_vec(4, 2, vec![0.0, 0.0, 0.1, 0.1, 9.0, 9.0, 9.1, 9.1])?;
/// let data = Dataset::with_default_names(values)?;
/// let config = RunConfig::default().with_min_cluster_size(2).with_popcut(2).with_seed(1);
/// let run = RecursiveClustering::new(config)?.run(&data)?;
/// println!("{} columns", run.ledger.columns().len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveClustering {
    config: RunConfig,
    supervision: Option<Vec<i64>>,
}

impl RecursiveClustering {
    /// Creates a controller after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] for an invalid configuration.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            supervision: None,
        })
    }

    /// Guides every node's embedding with per-sample label codes, aligned
    /// with the dataset rows (negative = unknown).
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<i64>) -> Self {
        self.supervision = Some(labels);
        self
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn checkpoints(&self) -> Option<CheckpointManager> {
        match (&self.config.outpath, self.config.checkpoint) {
            (Some(out), true) => Some(CheckpointManager::new(out)),
            _ => None,
        }
    }

    fn check_input(&self, data: &Dataset) -> Result<()> {
        if data.n_samples() == 0 || data.n_features() == 0 {
            return Err(ReclusterError::empty_input("dataset"));
        }
        if let Some(labels) = &self.supervision {
            if labels.len() != data.n_samples() {
                return Err(ReclusterError::dimension_mismatch(
                    "labels",
                    data.n_samples(),
                    labels.len(),
                ));
            }
        }
        let index = data.index();
        if let Some(missing) = self
            .config
            .transform_only
            .iter()
            .find(|id| !index.contains_key(id.as_str()))
        {
            return Err(ReclusterError::invalid_config(
                "transform_only",
                missing,
                "identifiers present in the dataset",
            ));
        }
        Ok(())
    }

    fn run_seed(&self) -> u64 {
        let seed = self
            .config
            .seed
            .unwrap_or_else(|| StdRng::from_entropy().gen());
        tracing::info!(seed, "run seed");
        seed
    }

    /// Clusters `data` recursively from the root.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid input, when every candidate vector of
    /// a node fails, or when a checkpoint cannot be written.
    pub fn run(&self, data: &Dataset) -> Result<ClusteringRun> {
        self.check_input(data)?;
        let seed = self.run_seed();
        let checkpoints = self.checkpoints();
        if let Some(manager) = &checkpoints {
            // A fresh run never mixes with checkpoints of an earlier one
            if manager.dir().exists() {
                std::fs::remove_dir_all(manager.dir())?;
            }
        }

        let mut state = RunState::fresh(&self.config.root, data.sample_ids().to_vec());
        self.drive(data, &mut state, seed, checkpoints.as_ref())?;
        self.complete(state, seed)
    }

    /// Continues an interrupted or finished run from its checkpoints.
    ///
    /// `popcut` and `maxdepth` may be relaxed relative to the checkpointed
    /// run; children that stopped only because of them are expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::CheckpointCorrupt`] when the checkpoints are
    /// missing or do not match `data`.
    pub fn resume(&self, data: &Dataset) -> Result<ClusteringRun> {
        self.resume_expanding(data, &[])
    }

    /// Like [`RecursiveClustering::resume`], additionally forcing the named
    /// unexpanded nodes into the frontier.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::UnrecoverableDiscard`] when a name refers
    /// to noise or to a dissolved cluster.
    pub fn resume_expanding(&self, data: &Dataset, expand: &[String]) -> Result<ClusteringRun> {
        self.check_input(data)?;
        let outpath = self.config.outpath.as_ref().ok_or_else(|| {
            ReclusterError::invalid_config("outpath", "unset", "the directory holding recluster_data")
        })?;
        let manager = CheckpointManager::new(outpath);
        let restored = manager.restore(&self.config, expand)?;

        let index = data.index();
        if let Some(missing) = restored
            .tree
            .node(restored.tree.root())
            .samples
            .iter()
            .find(|s| !index.contains_key(s.as_str()))
        {
            return Err(ReclusterError::corrupt(format!(
                "checkpointed sample {missing} is not in the dataset"
            )));
        }

        let seed = restored.run_seed;
        tracing::info!(seed, frontier = restored.frontier.len(), "resuming run");
        let mut state = RunState {
            tree: restored.tree,
            ledger: restored.ledger,
            records: restored.records,
            maps: restored.maps,
            queue: restored.frontier,
        };
        let writer = self.config.checkpoint.then_some(&manager);
        self.drive(data, &mut state, seed, writer)?;
        self.complete(state, seed)
    }

    fn complete(&self, state: RunState, seed: u64) -> Result<ClusteringRun> {
        let run = state.finish(seed);
        tracing::info!(
            nodes = run.tree.len(),
            depth = run.depth(),
            columns = run.ledger.columns().len(),
            "recursion finished"
        );
        if let Some(out) = &self.config.outpath {
            run.save(out)?;
        }
        Ok(run)
    }

    /// Processes queued nodes until the queue is empty.
    pub(crate) fn drive(
        &self,
        data: &Dataset,
        state: &mut RunState,
        seed: u64,
        checkpoints: Option<&CheckpointManager>,
    ) -> Result<()> {
        let index = data.index();
        let held: HashSet<&str> = self
            .config
            .transform_only
            .iter()
            .map(String::as_str)
            .collect();
        while let Some(id) = state.queue.pop_front() {
            self.process(data, &index, &held, state, id, seed, checkpoints)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process(
        &self,
        data: &Dataset,
        index: &HashMap<&str, usize>,
        held: &HashSet<&str>,
        state: &mut RunState,
        id: NodeId,
        run_seed: u64,
        checkpoints: Option<&CheckpointManager>,
    ) -> Result<()> {
        let config = &self.config;
        let (name, depth, samples) = {
            let node = state.tree.node(id);
            (node.name.clone(), node.depth, node.samples.clone())
        };
        let seed = node_seed(run_seed, &name);
        let rows = samples
            .iter()
            .map(|s| {
                index
                    .get(s.as_str())
                    .copied()
                    .ok_or_else(|| ReclusterError::from(format!("unknown sample: {s}")))
            })
            .collect::<Result<Vec<usize>>>()?;
        let (fit_pos, held_pos): (Vec<usize>, Vec<usize>) =
            (0..rows.len()).partition(|&p| !held.contains(samples[p].as_str()));

        tracing::info!(node = %name, depth, population = samples.len(), "processing node");

        let mut record = NodeRecord {
            name: name.clone(),
            depth,
            population: samples.len(),
            n_clusters: 1,
            dim: config.dim,
            score: None,
            params: None,
            metric_map: config.metric_map,
            metric_clu: config.metric_clu,
            norm: config.norm,
            reassigned: 0,
            noise: 0,
            evaluations: 0,
            seed,
            termination: Termination::SingleCluster,
        };

        if fit_pos.len() < 2 * config.min_cluster_size || fit_pos.len() < 3 {
            tracing::debug!(node = %name, fit = fit_pos.len(), "too few rows for two clusters");
            return self.conclude(state, id, record, None, Vec::new(), Vec::new(), run_seed, checkpoints);
        }

        let fit_rows: Vec<usize> = fit_pos.iter().map(|&p| rows[p]).collect();
        let x = data.values().select_rows(&fit_rows);
        let supervision: Option<Vec<i64>> = self
            .supervision
            .as_ref()
            .map(|codes| fit_rows.iter().map(|&r| codes[r]).collect());
        let outcome = optimize_node(config, &name, &x, supervision.as_deref(), seed)?;
        record.evaluations = outcome.report.evaluations();

        let Some(fit) = outcome.fit else {
            tracing::info!(node = %name, "no viable split");
            return self.conclude(state, id, record, None, Vec::new(), Vec::new(), run_seed, checkpoints);
        };
        record.score = Some(fit.trial.score);
        record.params = Some(fit.trial.params());

        // Labels in node sample order
        let mut labels = vec![NOISE; samples.len()];
        for (i, &p) in fit_pos.iter().enumerate() {
            labels[p] = fit.labels[i];
        }
        if !held_pos.is_empty() {
            let held_rows: Vec<usize> = held_pos.iter().map(|&p| rows[p]).collect();
            let projected = fit.stages.embed(&data.values().select_rows(&held_rows))?;
            let assigned = assign_by_neighbors(
                &fit.embedding,
                &fit.labels,
                &projected,
                config.knn,
                config.metric_clu,
                true,
            )?;
            for (&p, label) in held_pos.iter().zip(assigned) {
                labels[p] = label;
            }
        }

        if config.outliers == OutlierPolicy::Reassign {
            record.reassigned = self.reassign(data, &rows, &fit_pos, &fit, &mut labels)?;
        }

        let found = n_clusters(&labels);
        record.n_clusters = found;
        if found < 2 {
            return self.conclude(state, id, record, Some(fit.stages), Vec::new(), Vec::new(), run_seed, checkpoints);
        }

        let mut groups: Vec<Vec<String>> = vec![Vec::new(); found];
        let mut noise = Vec::new();
        for (sample, &label) in samples.iter().zip(&labels) {
            if label == NOISE {
                noise.push(sample.clone());
            } else {
                groups[label as usize].push(sample.clone());
            }
        }
        record.noise = noise.len();
        record.termination = Termination::None;
        tracing::info!(
            node = %name,
            clusters = found,
            noise = noise.len(),
            score = fit.trial.score,
            "node split"
        );
        self.conclude(state, id, record, Some(fit.stages), groups, noise, run_seed, checkpoints)
    }

    /// Forces noise samples into their nearest cluster. Returns the count.
    fn reassign(
        &self,
        data: &Dataset,
        rows: &[usize],
        fit_pos: &[usize],
        fit: &crate::pipeline::NodeFit,
        labels: &mut [i32],
    ) -> Result<usize> {
        let noisy: Vec<usize> = (0..labels.len()).filter(|&p| labels[p] == NOISE).collect();
        if noisy.is_empty() {
            return Ok(0);
        }
        let fit_index: HashMap<usize, usize> =
            fit_pos.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        // Fit rows already have an embedding; held-out rows are projected
        let mut embedded = Vec::with_capacity(noisy.len());
        let mut to_project = Vec::new();
        for &p in &noisy {
            match fit_index.get(&p) {
                Some(&i) => embedded.push(fit.embedding.row(i).to_vec()),
                None => {
                    to_project.push(rows[p]);
                    embedded.push(Vec::new());
                }
            }
        }
        if !to_project.is_empty() {
            let projected = fit.stages.embed(&data.values().select_rows(&to_project))?;
            let mut next = 0;
            for row in embedded.iter_mut().filter(|r| r.is_empty()) {
                *row = projected.row(next).to_vec();
                next += 1;
            }
        }
        let queries = Matrix::from_rows(&embedded)?;
        let assigned = assign_by_neighbors(
            &fit.embedding,
            &fit.labels,
            &queries,
            self.config.knn,
            self.config.metric_clu,
            false,
        )?;
        let mut moved = 0;
        for (&p, label) in noisy.iter().zip(assigned) {
            if label != NOISE {
                labels[p] = label;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Writes a processed node's outcome into the run state.
    #[allow(clippy::too_many_arguments)]
    fn conclude(
        &self,
        state: &mut RunState,
        id: NodeId,
        record: NodeRecord,
        stages: Option<TrainedStages>,
        groups: Vec<Vec<String>>,
        noise: Vec<String>,
        run_seed: u64,
        checkpoints: Option<&CheckpointManager>,
    ) -> Result<()> {
        let name = record.name.clone();
        let depth = record.depth;
        for group in &groups {
            let child = state.tree.add_child(id, group.clone());
            let termination = threshold_termination(&self.config, depth + 1, group.len());
            let node = state.tree.node_mut(child);
            node.termination = termination;
            state.ledger.record(&node.name, group)?;
            if termination == Termination::None {
                state.queue.push_back(child);
            } else {
                tracing::debug!(node = %node.name, ?termination, "child not expanded");
            }
        }
        if !noise.is_empty() {
            state.ledger.record(&noise_column(&name), &noise)?;
        }

        let node = state.tree.node_mut(id);
        node.noise = noise.clone();
        node.params = record.params;
        node.score = record.score;
        node.termination = record.termination;
        node.processed = true;
        let samples = node.samples.clone();

        if let Some(manager) = checkpoints {
            manager.save(&NodeCheckpoint {
                manifest: Manifest {
                    format_version: FORMAT_VERSION,
                    node: name.clone(),
                    depth,
                    termination: record.termination,
                    record: Some(record.clone()),
                    run_seed,
                    config: self.config.clone(),
                },
                membership: Membership {
                    samples,
                    children: groups,
                    noise,
                },
                stages: stages.clone(),
            })?;
        }
        if self.config.savemap || self.config.checkpoint {
            if let Some(stages) = stages {
                state.maps.insert(name, stages);
            }
        }
        state.records.push(record);
        Ok(())
    }
}

/// Clusters `data` with `config`.
///
/// # Errors
///
/// See [`RecursiveClustering::run`].
pub fn cluster(data: &Dataset, config: RunConfig) -> Result<ClusteringRun> {
    RecursiveClustering::new(config)?.run(data)
}

/// Resumes the run checkpointed under `config.outpath`.
///
/// # Errors
///
/// See [`RecursiveClustering::resume`].
pub fn resume(data: &Dataset, config: RunConfig) -> Result<ClusteringRun> {
    RecursiveClustering::new(config)?.resume(data)
}

#[cfg(test)]
#[path = "tests_recursion_contract.rs"]
mod tests_recursion_contract;
