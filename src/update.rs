//! Incremental update of an existing hierarchy with new samples.
//!
//! New samples are first placed in the hierarchy by [`classify`]. Every
//! split is then re-scored in its stored embedding, once with its old
//! members and once with old and new members together. A split whose
//! score drops by more than the tolerance is rebuilt: its subtree is
//! dropped and the node goes back to the recursion with every sample it
//! now holds. Leaves stopped by `popcut` or `maxdepth` are re-checked
//! against their grown population.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::checkpoint::threshold_termination;
use crate::classification::{classify, ClassifySettings};
use crate::cluster::NOISE;
use crate::config::RunConfig;
use crate::data::Dataset;
use crate::error::{ReclusterError, Result};
use crate::ledger::{noise_column, MembershipLedger};
use crate::metrics::ScoreEvaluator;
use crate::pipeline::MapStore;
use crate::recursion::{ClusteringRun, RecursiveClustering, RunState};
use crate::tree::{ClusterTree, NodeId, Termination};

/// Settings of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Largest tolerated score drop before a split is rebuilt
    pub tolerance: f64,
    /// Minimum classification vote; lower votes make a new sample noise
    pub probcut: f64,
    /// Neighbours voting during classification
    pub knn: usize,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            probcut: 0.0,
            knn: 5,
        }
    }
}

/// Score comparison of one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitCheck {
    /// Split node
    pub node: String,
    /// Score with the old members only
    pub old_score: f64,
    /// Score with old and new members
    pub new_score: f64,
    /// Whether the split was rebuilt
    pub rebuilt: bool,
    /// New samples that reached the node
    pub added: usize,
}

/// Outcome of [`update`].
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// One entry per split that was re-scored, in tree order
    pub checks: Vec<SplitCheck>,
    /// The updated run, over old and new samples
    pub run: ClusteringRun,
}

impl UpdateReport {
    /// Names of the rebuilt splits.
    #[must_use]
    pub fn rebuilt(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.rebuilt)
            .map(|c| c.node.as_str())
            .collect()
    }
}

/// Scores the partition of `members` into `columns` (plus noise) in the
/// embedding stored for `node`.
fn split_score(
    node: &str,
    members: &[(String, i32)],
    data: &Dataset,
    maps: &MapStore,
    evaluator: &ScoreEvaluator,
) -> Result<f64> {
    let stages = maps
        .get(node)
        .ok_or_else(|| ReclusterError::Other(format!("no trained stages for node {node}")))?;
    let ids: Vec<&str> = members.iter().map(|(s, _)| s.as_str()).collect();
    let labels: Vec<i32> = members.iter().map(|(_, l)| *l).collect();
    let embedded = stages.embed(data.subset_by_ids(&ids)?.values())?;
    Ok(evaluator.score(&embedded, &labels))
}

/// Labels the members of split `id` by child index, noise as [`NOISE`].
fn split_members(
    tree: &ClusterTree,
    id: NodeId,
    placed: &MembershipLedger,
    new_ids: &[String],
) -> (Vec<(String, i32)>, Vec<(String, i32)>) {
    let node = tree.node(id);
    let mut old = Vec::new();
    for (c, &child) in node.children.iter().enumerate() {
        old.extend(tree.node(child).samples.iter().map(|s| (s.clone(), c as i32)));
    }
    old.extend(node.noise.iter().map(|s| (s.clone(), NOISE)));

    let mut new = Vec::new();
    for sample in new_ids {
        let label = node.children.iter().enumerate().find_map(|(c, &child)| {
            placed
                .is_member(sample, &tree.node(child).name)
                .then_some(c as i32)
        });
        match label {
            Some(c) => new.push((sample.clone(), c)),
            None if placed.is_member(sample, &noise_column(&node.name)) => {
                new.push((sample.clone(), NOISE));
            }
            None => {}
        }
    }
    (old, new)
}

/// Adds `new` to the hierarchy of `run`, built over `old`.
///
/// `run.maps` must hold the stages of every split (`savemap`). The returned
/// run covers both datasets; splits whose score deteriorates by more than
/// `settings.tolerance` are re-clustered with `config`.
///
/// # Errors
///
/// Returns an error if the datasets share identifiers or differ in
/// features, if stages are missing, or if a rebuilt node fails.
pub fn update(
    run: &ClusteringRun,
    old: &Dataset,
    new: &Dataset,
    config: RunConfig,
    settings: &UpdateSettings,
) -> Result<UpdateReport> {
    let controller = RecursiveClustering::new(config)?;
    let config = controller.config();
    let combined = old.concat(new)?;

    let classify_settings = ClassifySettings {
        k: settings.knn,
        probcut: settings.probcut,
        metric: config.metric_clu,
    };
    let placed = classify(new, old, &run.ledger, &run.maps, &classify_settings)?.ledger;
    let new_ids = new.sample_ids();
    let evaluator = ScoreEvaluator::new(config.score, config.metric_clu);

    let source = &run.tree;
    let mut root_samples = source.node(source.root()).samples.clone();
    root_samples.extend(new_ids.iter().cloned());
    let mut tree = ClusterTree::new(source.node(source.root()).name.clone(), root_samples);

    // Source node id -> replayed node id; absent for pruned subtrees
    let mut replayed: HashMap<NodeId, NodeId> = HashMap::from([(source.root(), tree.root())]);
    let mut dropped: HashSet<String> = HashSet::new();
    let mut queue = VecDeque::new();
    let mut checks = Vec::new();

    for (sid, snode) in source.iter() {
        let Some(&id) = replayed.get(&sid) else {
            dropped.insert(snode.name.clone());
            continue;
        };
        {
            let node = tree.node_mut(id);
            node.params = snode.params;
            node.score = snode.score;
            node.termination = snode.termination;
            node.processed = snode.processed;
        }

        if snode.is_leaf() {
            let population = tree.node(id).population();
            if snode.termination.is_threshold() {
                let termination = threshold_termination(config, snode.depth, population);
                tree.node_mut(id).termination = termination;
                if termination == Termination::None {
                    tracing::debug!(node = %snode.name, population, "leaf grew past its threshold");
                    queue.push_back(id);
                }
            } else if !snode.processed {
                queue.push_back(id);
            }
            continue;
        }

        let (old_members, new_members) = split_members(source, sid, &placed, new_ids);
        let old_score = split_score(&snode.name, &old_members, old, &run.maps, &evaluator)?;
        let mut all_members = old_members;
        all_members.extend(new_members.iter().cloned());
        let new_score = split_score(&snode.name, &all_members, &combined, &run.maps, &evaluator)?;
        let rebuilt = new_score - old_score < -settings.tolerance;
        tracing::info!(
            node = %snode.name,
            old_score,
            new_score,
            added = new_members.len(),
            rebuilt,
            "split re-scored"
        );
        checks.push(SplitCheck {
            node: snode.name.clone(),
            old_score,
            new_score,
            rebuilt,
            added: new_members.len(),
        });

        if rebuilt {
            let node = tree.node_mut(id);
            node.params = None;
            node.score = None;
            node.termination = Termination::None;
            node.processed = false;
            dropped.insert(snode.name.clone());
            queue.push_back(id);
            continue;
        }

        let mut noise = snode.noise.clone();
        noise.extend(
            new_members
                .iter()
                .filter(|(_, l)| *l == NOISE)
                .map(|(s, _)| s.clone()),
        );
        tree.node_mut(id).noise = noise;
        for (c, &schild) in snode.children.iter().enumerate() {
            let mut samples = source.node(schild).samples.clone();
            samples.extend(
                new_members
                    .iter()
                    .filter(|(_, l)| *l == c as i32)
                    .map(|(s, _)| s.clone()),
            );
            let child = tree.add_child(id, samples);
            replayed.insert(schild, child);
        }
    }

    let records = run
        .records
        .iter()
        .filter(|r| !dropped.contains(&r.name))
        .cloned()
        .collect();
    let mut maps = run.maps.clone();
    for name in &dropped {
        maps.remove(name);
    }

    let mut state = RunState {
        ledger: MembershipLedger::from_tree(&tree)?,
        tree,
        records,
        maps,
        queue,
    };
    tracing::info!(
        added = new_ids.len(),
        rebuilt = checks.iter().filter(|c| c.rebuilt).count(),
        pending = state.queue.len(),
        "updating hierarchy"
    );
    controller.drive(&combined, &mut state, run.seed, None)?;
    Ok(UpdateReport {
        checks,
        run: state.finish(run.seed),
    })
}
