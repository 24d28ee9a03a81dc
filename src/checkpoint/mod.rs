//! Per-node checkpoints and resume.
//!
//! Layout under the run's output path:
//!
//! ```text
//! <outpath>/recluster_data/chk/<node>/stages.json
//!                                    /membership.json
//!                                    /manifest.json
//! ```
//!
//! A checkpoint directory is written under a hidden temporary name and
//! renamed into place, so [`CheckpointManager::load`] never observes a
//! partial node. Replacing a checkpoint retires the old directory first;
//! if the write stops before the new one lands, the retired directory is
//! moved back on the next load. Restoring rebuilds the tree, the ledger and the pending
//! frontier; children that stopped only because of `popcut` or `maxdepth`
//! re-enter the frontier when the new thresholds allow them.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{ReclusterError, Result};
use crate::ledger::MembershipLedger;
use crate::pipeline::{MapStore, TrainedStages};
use crate::recursion::NodeRecord;
use crate::tree::{depth_of, parent_name, ClusterTree, NodeId, Termination};

/// Directory created under the output path.
pub const DATA_DIR: &str = "recluster_data";
/// Checkpoint directory inside [`DATA_DIR`].
pub const CHECKPOINT_DIR: &str = "chk";

const STAGES_FILE: &str = "stages.json";
const MEMBERSHIP_FILE: &str = "membership.json";
const MANIFEST_FILE: &str = "manifest.json";
/// Prefix of a checkpoint being written.
const STAGING_PREFIX: &str = ".tmp-";
/// Prefix of a checkpoint being replaced.
const RETIRED_PREFIX: &str = ".old-";
/// Version written into every manifest.
pub const FORMAT_VERSION: u32 = 1;

/// Sample membership of a processed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// Samples of the node
    pub samples: Vec<String>,
    /// Samples of every child, in child order
    pub children: Vec<Vec<String>>,
    /// Samples left unassigned (noise and dissolved clusters)
    pub noise: Vec<String>,
}

/// Node summary and run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Checkpoint format version
    pub format_version: u32,
    /// Node name
    pub node: String,
    /// Node depth
    pub depth: usize,
    /// Why the node has no children, if it has none
    pub termination: Termination,
    /// Parameter record, absent for nodes too small to optimize
    pub record: Option<NodeRecord>,
    /// Seed of the run that wrote the checkpoint
    pub run_seed: u64,
    /// Configuration of the run that wrote the checkpoint
    pub config: RunConfig,
}

/// Everything persisted for one node.
#[derive(Debug, Clone)]
pub struct NodeCheckpoint {
    /// Node summary
    pub manifest: Manifest,
    /// Sample membership
    pub membership: Membership,
    /// Trained stages, absent when the node was never optimized
    pub stages: Option<TrainedStages>,
}

/// State rebuilt from a checkpoint directory.
#[derive(Debug, Clone)]
pub struct Restored {
    /// Hierarchy with processed nodes and their children
    pub tree: ClusterTree,
    /// Ledger of every recorded split
    pub ledger: MembershipLedger,
    /// Records of processed nodes, in processing order
    pub records: Vec<NodeRecord>,
    /// Stages of processed nodes
    pub maps: MapStore,
    /// Nodes to process next
    pub frontier: VecDeque<NodeId>,
    /// Seed of the interrupted run
    pub run_seed: u64,
}

/// Reads and writes node checkpoints of one output path.
///
/// # Examples
///
/// ```
/// use recluster::checkpoint::CheckpointManager;
///
/// let manager = CheckpointManager::new("/tmp/run");
/// assert!(manager.dir().ends_with("recluster_data/chk"));
/// ```
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Manager for `<outpath>/recluster_data/chk`.
    #[must_use]
    pub fn new(outpath: impl AsRef<Path>) -> Self {
        Self {
            dir: outpath.as_ref().join(DATA_DIR).join(CHECKPOINT_DIR),
        }
    }

    /// The checkpoint directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `node` has a completed checkpoint.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.dir.join(node).join(MANIFEST_FILE).is_file()
    }

    /// Persists a node atomically, replacing an earlier checkpoint of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be written or renamed.
    pub fn save(&self, checkpoint: &NodeCheckpoint) -> Result<()> {
        let node = &checkpoint.manifest.node;
        fs::create_dir_all(&self.dir)?;
        let staging = self
            .dir
            .join(format!("{STAGING_PREFIX}{node}-{}", std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging)?;
        write_json(&staging.join(STAGES_FILE), &checkpoint.stages)?;
        write_json(&staging.join(MEMBERSHIP_FILE), &checkpoint.membership)?;
        // The manifest marks the checkpoint complete, so it goes last
        write_json(&staging.join(MANIFEST_FILE), &checkpoint.manifest)?;

        let target = self.dir.join(node);
        if target.exists() {
            let retired = self
                .dir
                .join(format!("{RETIRED_PREFIX}{node}-{}", std::process::id()));
            fs::rename(&target, &retired)?;
            fs::rename(&staging, &target)?;
            fs::remove_dir_all(&retired)?;
        } else {
            fs::rename(&staging, &target)?;
        }
        tracing::debug!(node = %node, dir = %target.display(), "checkpoint written");
        Ok(())
    }

    /// Reads the checkpoint of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::CheckpointCorrupt`] if a file is missing,
    /// unreadable, or names a different node.
    pub fn load(&self, node: &str) -> Result<NodeCheckpoint> {
        let dir = self.dir.join(node);
        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        if manifest.node != node {
            return Err(ReclusterError::corrupt(format!(
                "directory {node} holds the manifest of {}",
                manifest.node
            )));
        }
        if manifest.format_version != FORMAT_VERSION {
            return Err(ReclusterError::corrupt(format!(
                "node {node}: format version {} is not {FORMAT_VERSION}",
                manifest.format_version
            )));
        }
        let membership: Membership = read_json(&dir.join(MEMBERSHIP_FILE))?;
        let stages: Option<TrainedStages> = read_json(&dir.join(STAGES_FILE))?;
        Ok(NodeCheckpoint {
            manifest,
            membership,
            stages,
        })
    }

    /// Settles an entry left behind by an interrupted [`CheckpointManager::save`].
    ///
    /// A retired checkpoint whose replacement never landed is moved back
    /// into place and its node returned. Anything else is removed.
    fn recover(&self, entry: &str) -> Result<Option<String>> {
        let path = self.dir.join(entry);
        let retired_node = entry
            .strip_prefix(RETIRED_PREFIX)
            .and_then(|rest| rest.rsplit_once('-'))
            .map(|(node, _pid)| node);
        if let Some(node) = retired_node {
            let target = self.dir.join(node);
            if !target.exists() && path.join(MANIFEST_FILE).is_file() {
                tracing::warn!(node, "restoring checkpoint retired by an interrupted write");
                fs::rename(&path, &target)?;
                return Ok(Some(node.to_string()));
            }
        }
        tracing::warn!(entry, "removing partial checkpoint");
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(None)
    }

    /// Reads every completed checkpoint, shallowest first.
    ///
    /// Leftover staging directories of interrupted writes are removed. A
    /// checkpoint retired by an interrupted replacement is restored when
    /// no newer one took its place.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::CheckpointCorrupt`] if the directory is
    /// missing or empty, or if any checkpoint is unreadable.
    pub fn load_all(&self) -> Result<Vec<NodeCheckpoint>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ReclusterError::corrupt(format!("cannot read {}: {e}", self.dir.display()))
        })?;
        let mut names = Vec::new();
        let mut leftovers = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                leftovers.push(name);
            } else if entry.path().is_dir() {
                names.push(name);
            }
        }
        for entry in leftovers {
            if let Some(node) = self.recover(&entry)? {
                names.push(node);
            }
        }
        if names.is_empty() {
            return Err(ReclusterError::corrupt(format!(
                "no checkpoints in {}",
                self.dir.display()
            )));
        }
        names.sort_by_key(|n| (depth_of(n), n.clone()));
        names.iter().map(|n| self.load(n)).collect()
    }

    /// Rebuilds the run state and the pending frontier under `config`.
    ///
    /// Nodes named in `expand` enter the frontier regardless of `popcut`
    /// and `maxdepth`.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::CheckpointCorrupt`] for inconsistent
    /// checkpoints or a configuration with a different pipeline, and
    /// [`ReclusterError::UnrecoverableDiscard`] when `expand` names noise
    /// or a node that was never created.
    pub fn restore(&self, config: &RunConfig, expand: &[String]) -> Result<Restored> {
        let checkpoints = self.load_all()?;
        let root = checkpoints
            .iter()
            .find(|c| c.manifest.node == config.root)
            .ok_or_else(|| {
                ReclusterError::corrupt(format!("no checkpoint for root node {}", config.root))
            })?;
        check_compatible(&root.manifest.config, config)?;
        let run_seed = root.manifest.run_seed;

        let mut tree = ClusterTree::new(config.root.clone(), root.membership.samples.clone());
        let mut ledger = MembershipLedger::new(config.root.clone(), root.membership.samples.clone());
        let mut records = Vec::new();
        let mut maps = MapStore::new();
        let mut processed = HashSet::new();

        for checkpoint in checkpoints {
            let name = checkpoint.manifest.node.clone();
            let id = tree.find(&name).ok_or_else(|| {
                ReclusterError::corrupt(format!(
                    "checkpoint {name} has no processed parent {}",
                    parent_name(&name).unwrap_or("-")
                ))
            })?;
            let mut expected = tree.node(id).samples.clone();
            let mut found = checkpoint.membership.samples.clone();
            expected.sort_unstable();
            found.sort_unstable();
            if expected != found {
                return Err(ReclusterError::corrupt(format!(
                    "node {name}: checkpoint samples differ from its parent's split"
                )));
            }

            for child in &checkpoint.membership.children {
                let child_id = tree.add_child(id, child.clone());
                ledger.record(&tree.node(child_id).name, child)?;
            }
            if !checkpoint.membership.noise.is_empty() {
                ledger.record(&crate::ledger::noise_column(&name), &checkpoint.membership.noise)?;
            }

            let node = tree.node_mut(id);
            node.noise = checkpoint.membership.noise;
            node.termination = checkpoint.manifest.termination;
            node.processed = true;
            if let Some(record) = checkpoint.manifest.record {
                node.params = record.params;
                node.score = record.score;
                records.push(record);
            }
            if let Some(stages) = checkpoint.stages {
                maps.insert(name.clone(), stages);
            }
            processed.insert(name);
        }

        let mut forced = HashSet::new();
        for name in expand {
            if crate::ledger::is_noise_column(name) {
                return Err(ReclusterError::UnrecoverableDiscard {
                    message: format!("{name} holds noise samples"),
                });
            }
            if tree.find(name).is_none() {
                return Err(ReclusterError::UnrecoverableDiscard {
                    message: format!("{name} was dissolved or never created"),
                });
            }
            forced.insert(name.as_str());
        }

        let mut frontier = VecDeque::new();
        let pending: Vec<NodeId> = tree
            .iter()
            .filter(|(_, n)| !processed.contains(&n.name))
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            let node = tree.node_mut(id);
            node.termination = if forced.contains(node.name.as_str()) {
                Termination::None
            } else {
                threshold_termination(config, node.depth, node.population())
            };
            if node.termination == Termination::None {
                frontier.push_back(id);
            }
        }

        tracing::info!(
            processed = processed.len(),
            frontier = frontier.len(),
            "checkpoint restored"
        );
        Ok(Restored {
            tree,
            ledger,
            records,
            maps,
            frontier,
            run_seed,
        })
    }
}

/// Termination imposed on a child by `popcut` and `maxdepth`, if any.
#[must_use]
pub fn threshold_termination(config: &RunConfig, depth: usize, population: usize) -> Termination {
    if !config.depth_allows(depth) {
        Termination::MaxDepth
    } else if population < config.popcut {
        Termination::PopulationFloor
    } else {
        Termination::None
    }
}

/// Rejects a resume whose pipeline differs from the checkpointed one.
fn check_compatible(saved: &RunConfig, requested: &RunConfig) -> Result<()> {
    let same = saved.root == requested.root
        && saved.dim == requested.dim
        && saved.filter == requested.filter
        && saved.clusterer == requested.clusterer
        && saved.min_cluster_size == requested.min_cluster_size
        && saved.outliers == requested.outliers;
    if same {
        Ok(())
    } else {
        Err(ReclusterError::corrupt(
            "checkpoint was written with a different pipeline configuration",
        ))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| ReclusterError::corrupt(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| ReclusterError::corrupt(format!("{}: {e}", path.display())))
}

#[cfg(test)]
#[path = "tests_checkpoint_contract.rs"]
mod tests_checkpoint_contract;
