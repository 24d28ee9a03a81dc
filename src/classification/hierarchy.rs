//! Classification of new samples through a stored hierarchy.
//!
//! At every split node the old members and the new samples are projected
//! with the node's trained stages, and a distance-weighted k-NN vote over
//! the old members gives each new sample a probability for every child
//! (and for the node's noise, when it has any). Probabilities multiply
//! down the tree. The unique assignment then descends greedily from the
//! root along the most probable child; a vote below `probcut`, or a win
//! for noise, stops the descent in the node's noise column.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{argmax, KNearestNeighbors};
use crate::checkpoint::DATA_DIR;
use crate::data::Dataset;
use crate::error::{ReclusterError, Result};
use crate::ledger::{noise_column, MembershipLedger};
use crate::pipeline::{MapStore, MAPS_FILE};
use crate::primitives::Metric;

/// Settings of hierarchical classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifySettings {
    /// Neighbours voting at every node
    pub k: usize,
    /// Minimum winning vote; lower votes send the sample to noise
    pub probcut: f64,
    /// Metric of the vote
    pub metric: Metric,
}

impl Default for ClassifySettings {
    fn default() -> Self {
        Self {
            k: 5,
            probcut: 0.0,
            metric: Metric::Euclidean,
        }
    }
}

/// New samples placed in an existing hierarchy.
#[derive(Debug, Clone)]
pub struct Classification {
    /// One-hot membership of the new samples
    pub ledger: MembershipLedger,
    /// Cumulative membership probability per column, one entry per new sample
    pub probabilities: BTreeMap<String, Vec<f64>>,
}

impl Classification {
    /// Probability of `sample` (by position) belonging to `column`.
    #[must_use]
    pub fn probability(&self, column: &str, sample: usize) -> Option<f64> {
        self.probabilities.get(column)?.get(sample).copied()
    }
}

/// Conditional votes of the new samples at one split node.
struct NodeVotes {
    /// Child column names; noise, when present, is the last class
    classes: Vec<String>,
    /// `votes[s][c]`
    votes: Vec<Vec<f32>>,
}

fn node_votes(
    node: &str,
    new: &Dataset,
    old: &Dataset,
    ledger: &MembershipLedger,
    maps: &MapStore,
    settings: &ClassifySettings,
) -> Result<Option<NodeVotes>> {
    let mut classes: Vec<String> = ledger.children(node).into_iter().map(str::to_string).collect();
    if classes.is_empty() {
        return Ok(None);
    }
    let noise = noise_column(node);
    if ledger.has_column(&noise) {
        classes.push(noise);
    }
    let stages = maps.get(node).ok_or_else(|| {
        ReclusterError::Other(format!("no trained stages for node {node}; run with savemap"))
    })?;

    let mut members = Vec::new();
    let mut labels = Vec::new();
    for (c, column) in classes.iter().enumerate() {
        for sample in ledger.members(column).unwrap_or_default() {
            members.push(sample.to_string());
            labels.push(c);
        }
    }
    let reference = stages.embed(old.subset_by_ids(&members)?.values())?;
    let queries = stages.embed(new.values())?;

    let mut knn = KNearestNeighbors::new(settings.k)
        .with_metric(settings.metric)
        .with_weights(true);
    knn.fit(&reference, &labels)?;
    let mut votes = knn.predict_proba(&queries)?;
    // Classes beyond the largest fitted label get no votes
    for row in &mut votes {
        row.resize(classes.len(), 0.0);
    }
    Ok(Some(NodeVotes { classes, votes }))
}

/// Places the samples of `new` in the hierarchy recorded by `ledger`.
///
/// `old` holds the samples the hierarchy was built from and `maps` the
/// trained stages of every split node.
///
/// # Errors
///
/// Returns an error if the feature sets differ, if a split node has no
/// stored stages, or if a ledger sample is missing from `old`.
pub fn classify(
    new: &Dataset,
    old: &Dataset,
    ledger: &MembershipLedger,
    maps: &MapStore,
    settings: &ClassifySettings,
) -> Result<Classification> {
    if new.feature_names() != old.feature_names() {
        return Err(ReclusterError::dimension_mismatch(
            "features",
            old.n_features(),
            new.n_features(),
        ));
    }
    let n = new.n_samples();
    let mut probabilities: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut votes_by_node: BTreeMap<String, NodeVotes> = BTreeMap::new();

    let mut stack: Vec<(String, Vec<f64>)> = vec![(ledger.root().to_string(), vec![1.0; n])];
    while let Some((node, reach)) = stack.pop() {
        let Some(votes) = node_votes(&node, new, old, ledger, maps, settings)? else {
            continue;
        };
        for (c, class) in votes.classes.iter().enumerate() {
            let cumulative: Vec<f64> = (0..n)
                .map(|s| reach[s] * f64::from(votes.votes[s][c]))
                .collect();
            if !crate::ledger::is_noise_column(class) {
                stack.push((class.clone(), cumulative.clone()));
            }
            probabilities.insert(class.clone(), cumulative);
        }
        votes_by_node.insert(node, votes);
    }

    let mut assigned = MembershipLedger::new(ledger.root(), new.sample_ids().to_vec());
    for (s, sample) in new.sample_ids().iter().enumerate() {
        let mut current = ledger.root().to_string();
        while let Some(votes) = votes_by_node.get(&current) {
            let best = argmax(&votes.votes[s]);
            let column = &votes.classes[best];
            let confident = f64::from(votes.votes[s][best]) >= settings.probcut;
            if !confident || crate::ledger::is_noise_column(column) {
                assigned.record(&noise_column(&current), &[sample])?;
                break;
            }
            assigned.record(column, &[sample])?;
            current.clone_from(column);
        }
    }

    tracing::debug!(samples = n, nodes = votes_by_node.len(), "classification finished");
    Ok(Classification {
        ledger: assigned,
        probabilities,
    })
}

/// [`classify`] with the stages read from `<refpath>/recluster_data/maps.json`.
///
/// # Errors
///
/// Returns an error if the stored stages cannot be read, or as [`classify`].
pub fn classify_from_path(
    new: &Dataset,
    old: &Dataset,
    ledger: &MembershipLedger,
    refpath: &Path,
    settings: &ClassifySettings,
) -> Result<Classification> {
    let maps = MapStore::load(refpath.join(DATA_DIR).join(MAPS_FILE))?;
    classify(new, old, ledger, &maps, settings)
}
