//! The cluster hierarchy as an arena of nodes.
//!
//! Nodes refer to each other by [`NodeId`] (an index into the arena); the
//! parent link exists for lineage only. Names follow the hierarchy path:
//! the k-th child of node `p` is `p_k`, so a node's depth is the number of
//! `_` separators in its name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::search::ParamVector;

/// Index of a node in a [`ClusterTree`].
pub type NodeId = usize;

/// Why a node has no children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The node was split (or is still pending)
    #[default]
    None,
    /// The best solution was a single cluster, or no viable solution existed
    SingleCluster,
    /// The population is below the expansion floor
    PopulationFloor,
    /// The node sits at the depth limit
    MaxDepth,
}

impl Termination {
    /// Whether a relaxed threshold may lift this termination.
    #[must_use]
    pub fn is_threshold(self) -> bool {
        matches!(self, Self::PopulationFloor | Self::MaxDepth)
    }
}

/// One recursion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Hierarchy path name
    pub name: String,
    /// Parent node, `None` for the root
    pub parent: Option<NodeId>,
    /// Child nodes in creation order
    pub children: Vec<NodeId>,
    /// Distance from the root
    pub depth: usize,
    /// Sample identifiers of the node
    pub samples: Vec<String>,
    /// Samples of the node left unassigned by its clustering
    pub noise: Vec<String>,
    /// Winning parameter vector, once optimized
    pub params: Option<ParamVector>,
    /// Winning score, once optimized
    pub score: Option<f64>,
    /// Termination reason
    pub termination: Termination,
    /// Whether the node went through the recursion step
    pub processed: bool,
}

impl TreeNode {
    fn new(name: String, parent: Option<NodeId>, depth: usize, samples: Vec<String>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            depth,
            samples,
            noise: Vec::new(),
            params: None,
            score: None,
            termination: Termination::None,
            processed: false,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn population(&self) -> usize {
        self.samples.len()
    }

    /// Whether the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena of [`TreeNode`]s with a name index.
///
/// # Examples
///
/// ```
/// use recluster::tree::ClusterTree;
///
/// let mut tree = ClusterTree::new("0", vec!["a".into(), "b".into(), "c".into()]);
/// let child = tree.add_child(tree.root(), vec!["a".into(), "b".into()]);
/// assert_eq!(tree.node(child).name, "0_0");
/// assert_eq!(tree.node(child).depth, 1);
/// assert_eq!(tree.find("0_0"), Some(child));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTree {
    nodes: Vec<TreeNode>,
    #[serde(skip)]
    index: HashMap<String, NodeId>,
}

impl ClusterTree {
    /// Creates a tree holding only the root.
    #[must_use]
    pub fn new(root: impl Into<String>, samples: Vec<String>) -> Self {
        let root = TreeNode::new(root.into(), None, 0, samples);
        let index = HashMap::from([(root.name.clone(), 0)]);
        Self {
            nodes: vec![root],
            index,
        }
    }

    /// The root node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        0
    }

    /// Appends the next child of `parent`, named `<parent>_<k>`.
    pub fn add_child(&mut self, parent: NodeId, samples: Vec<String>) -> NodeId {
        let id = self.nodes.len();
        let (name, depth) = {
            let p = &self.nodes[parent];
            (format!("{}_{}", p.name, p.children.len()), p.depth + 1)
        };
        self.nodes[parent].children.push(id);
        self.index.insert(name.clone(), id);
        self.nodes.push(TreeNode::new(name, Some(parent), depth, samples));
        id
    }

    /// Node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a node of this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    /// Mutable node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a node of this tree.
    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id]
    }

    /// Node id by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied().or_else(|| {
            // Deserialized trees have no index
            self.nodes.iter().position(|n| n.name == name)
        })
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has a root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with their ids, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.nodes.iter().enumerate()
    }

    /// Ids of childless nodes.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.is_leaf())
            .map(|(id, _)| id)
            .collect()
    }

    /// Largest node depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Ids from the root down to `id`.
    #[must_use]
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether the children and noise of `id` partition its samples.
    #[must_use]
    pub fn is_partitioned(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        if node.is_leaf() {
            return true;
        }
        let mut covered: Vec<&str> = node
            .children
            .iter()
            .flat_map(|&c| self.nodes[c].samples.iter())
            .chain(node.noise.iter())
            .map(String::as_str)
            .collect();
        let mut expected: Vec<&str> = node.samples.iter().map(String::as_str).collect();
        covered.sort_unstable();
        expected.sort_unstable();
        covered == expected
    }
}

/// Depth encoded in a node name: the number of `_` separators.
#[must_use]
pub fn depth_of(name: &str) -> usize {
    name.matches('_').count()
}

/// Parent name of a node name, `None` for a root.
#[must_use]
pub fn parent_name(name: &str) -> Option<&str> {
    name.rfind('_').map(|i| &name[..i])
}
