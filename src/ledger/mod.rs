//! One-hot membership table across every node of a hierarchy.
//!
//! Rows are the original samples; columns are node names (every node
//! below the root) plus a `<parent>_noise` column for each node that left
//! samples unassigned. A sample has at most one active column per depth,
//! and exactly one at every depth it reached.
//!
//! The ledger converts to and from a nested JSON tree ([`NodeExport`]);
//! the round trip is lossless.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReclusterError, Result};
use crate::tree::{depth_of, parent_name, ClusterTree};

/// Suffix of noise column names.
pub const NOISE_SUFFIX: &str = "noise";

/// Name of the noise column of `node`.
#[must_use]
pub fn noise_column(node: &str) -> String {
    format!("{node}_{NOISE_SUFFIX}")
}

/// Whether `column` is a noise column.
#[must_use]
pub fn is_noise_column(column: &str) -> bool {
    column.rsplit('_').next() == Some(NOISE_SUFFIX) && column.contains('_')
}

/// Path segment of a column name, ordered numerically with labels last.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Index(u64),
    Label(&'a str),
}

fn column_key(name: &str) -> (usize, Vec<Segment<'_>>) {
    let segments = name
        .split('_')
        .map(|s| s.parse().map_or(Segment::Label(s), Segment::Index))
        .collect();
    (depth_of(name), segments)
}

/// Orders columns by depth, then numerically along the path.
fn compare_columns(a: &str, b: &str) -> Ordering {
    column_key(a).cmp(&column_key(b))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Column {
    name: String,
    members: Vec<bool>,
}

/// The membership table of a run.
///
/// # Examples
///
/// ```
/// use recluster::ledger::MembershipLedger;
///
/// let samples: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
/// let mut ledger = MembershipLedger::new("0", samples);
/// ledger.record("0_1", &["c"]).expect("known samples");
/// ledger.record("0_0", &["a", "b"]).expect("known samples");
/// assert_eq!(ledger.columns(), vec!["0_0", "0_1"]);
/// assert_eq!(ledger.path("c"), vec!["0_1"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipLedger {
    root: String,
    samples: Vec<String>,
    columns: Vec<Column>,
}

impl MembershipLedger {
    /// Creates an empty ledger over `samples`.
    #[must_use]
    pub fn new(root: impl Into<String>, samples: Vec<String>) -> Self {
        Self {
            root: root.into(),
            samples,
            columns: Vec::new(),
        }
    }

    /// Builds the ledger of a tree: one column per non-root node and one
    /// noise column per node with noise.
    ///
    /// # Errors
    ///
    /// Returns an error if a node holds a sample the root does not.
    pub fn from_tree(tree: &ClusterTree) -> Result<Self> {
        let root = tree.node(tree.root());
        let mut ledger = Self::new(root.name.clone(), root.samples.clone());
        for (id, node) in tree.iter() {
            if id != tree.root() {
                ledger.record(&node.name, &node.samples)?;
            }
            if !node.noise.is_empty() {
                ledger.record(&noise_column(&node.name), &node.noise)?;
            }
        }
        Ok(ledger)
    }

    /// Name of the root node.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Sample identifiers, in row order.
    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Number of rows.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Column names ordered by depth, then numerically along the path.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether `column` exists.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_ok()
    }

    fn position(&self, column: &str) -> std::result::Result<usize, usize> {
        self.columns
            .binary_search_by(|c| compare_columns(&c.name, column))
    }

    fn row_index(&self) -> HashMap<&str, usize> {
        self.samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect()
    }

    /// Marks `members` active in `column`, creating the column if needed.
    ///
    /// # Errors
    ///
    /// Returns an error for the root column or an unknown sample.
    pub fn record<S: AsRef<str>>(&mut self, column: &str, members: &[S]) -> Result<()> {
        if depth_of(column) == 0 {
            return Err(ReclusterError::invalid_config(
                "column",
                column,
                "a node below the root",
            ));
        }
        let index = self.row_index();
        let rows = members
            .iter()
            .map(|m| {
                index
                    .get(m.as_ref())
                    .copied()
                    .ok_or_else(|| ReclusterError::Other(format!("unknown sample {}", m.as_ref())))
            })
            .collect::<Result<Vec<usize>>>()?;

        let n = self.samples.len();
        let pos = match self.position(column) {
            Ok(pos) => pos,
            Err(pos) => {
                self.columns.insert(
                    pos,
                    Column {
                        name: column.to_string(),
                        members: vec![false; n],
                    },
                );
                pos
            }
        };
        for row in rows {
            self.columns[pos].members[row] = true;
        }
        Ok(())
    }

    /// Members of `column`, in row order.
    #[must_use]
    pub fn members(&self, column: &str) -> Option<Vec<&str>> {
        let pos = self.position(column).ok()?;
        Some(
            self.columns[pos]
                .members
                .iter()
                .zip(&self.samples)
                .filter(|(active, _)| **active)
                .map(|(_, s)| s.as_str())
                .collect(),
        )
    }

    /// Whether `sample` is active in `column`.
    #[must_use]
    pub fn is_member(&self, sample: &str, column: &str) -> bool {
        let Some(row) = self.samples.iter().position(|s| s == sample) else {
            return false;
        };
        self.position(column)
            .map_or(false, |pos| self.columns[pos].members[row])
    }

    /// Active columns of `sample`, shallowest first.
    #[must_use]
    pub fn path(&self, sample: &str) -> Vec<&str> {
        let Some(row) = self.samples.iter().position(|s| s == sample) else {
            return Vec::new();
        };
        self.columns
            .iter()
            .filter(|c| c.members[row])
            .map(|c| c.name.as_str())
            .collect()
    }

    /// One-hot row of a sample, in column order.
    #[must_use]
    pub fn row(&self, sample: &str) -> Option<Vec<bool>> {
        let row = self.samples.iter().position(|s| s == sample)?;
        Some(self.columns.iter().map(|c| c.members[row]).collect())
    }

    /// Child columns of `node`, noise excluded.
    #[must_use]
    pub fn children(&self, node: &str) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|c| parent_name(c) == Some(node) && !is_noise_column(c))
            .collect()
    }

    /// Members of `node`; every sample for the root.
    #[must_use]
    pub fn node_members(&self, node: &str) -> Option<Vec<&str>> {
        if node == self.root {
            return Some(self.samples.iter().map(String::as_str).collect());
        }
        self.members(node)
    }

    /// Removes every column strictly below `node`, including its noise.
    pub fn remove_below(&mut self, node: &str) {
        let prefix = format!("{node}_");
        self.columns.retain(|c| !c.name.starts_with(&prefix));
    }

    /// Checks the one-hot invariant and that every column's members lie
    /// within its parent's members.
    ///
    /// # Errors
    ///
    /// Returns a corruption error describing the first violation.
    pub fn validate(&self) -> Result<()> {
        for (row, sample) in self.samples.iter().enumerate() {
            let mut depths = HashSet::new();
            for column in self.columns.iter().filter(|c| c.members[row]) {
                if !depths.insert(depth_of(&column.name)) {
                    return Err(ReclusterError::corrupt(format!(
                        "sample {sample} has two active columns at depth {}",
                        depth_of(&column.name)
                    )));
                }
                let parent = parent_name(&column.name).unwrap_or(&self.root);
                if parent != self.root && !self.is_member(sample, parent) {
                    return Err(ReclusterError::corrupt(format!(
                        "sample {sample} is in {} but not in {parent}",
                        column.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Nested tree view of the ledger.
    #[must_use]
    pub fn to_export(&self) -> NodeExport {
        self.export_node(&self.root)
    }

    fn export_node(&self, node: &str) -> NodeExport {
        let samples = self
            .node_members(node)
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        let noise = self
            .members(&noise_column(node))
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        let children = self
            .children(node)
            .into_iter()
            .map(|c| self.export_node(c))
            .collect();
        NodeExport {
            name: node.to_string(),
            samples,
            noise,
            children,
        }
    }

    /// Rebuilds a ledger from its nested tree view.
    ///
    /// # Errors
    ///
    /// Returns an error if a node lists a sample its root does not.
    pub fn from_export(export: &NodeExport) -> Result<Self> {
        let mut ledger = Self::new(export.name.clone(), export.samples.clone());
        let mut stack: Vec<&NodeExport> = vec![export];
        while let Some(node) = stack.pop() {
            if node.name != export.name {
                ledger.record(&node.name, &node.samples)?;
            }
            if !node.noise.is_empty() {
                ledger.record(&noise_column(&node.name), &node.noise)?;
            }
            stack.extend(node.children.iter());
        }
        Ok(ledger)
    }

    /// Writes the nested tree view to `path`, or to
    /// [`default_tree_path`] when `path` is `None`. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn export_tree(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_tree_path()?,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.to_export())?)?;
        tracing::info!(path = %path.display(), columns = self.columns.len(), "tree exported");
        Ok(path)
    }

    /// Reads a nested tree written by [`MembershipLedger::export_tree`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn import_tree(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_tree_path()?,
        };
        let export: NodeExport = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::from_export(&export)
    }

    /// Writes the ledger as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Reads a ledger written by [`MembershipLedger::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// One node of the nested tree export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExport {
    /// Node name
    pub name: String,
    /// Samples of the node
    pub samples: Vec<String>,
    /// Samples the node left unassigned
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub noise: Vec<String>,
    /// Child nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeExport>,
}

/// `~/.recluster/tree.json`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_tree_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".recluster").join("tree.json"))
        .ok_or_else(|| ReclusterError::from("cannot determine the home directory"))
}
