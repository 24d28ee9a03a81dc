//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use recluster::prelude::*;
//! ```

pub use crate::primitives::{Matrix, Metric};
pub use crate::traits::{Transformer, UnsupervisedEstimator};
pub use crate::data::Dataset;
pub use crate::config::{Optimizer, OutlierPolicy, RunConfig};
pub use crate::cluster::{ClusterIdentifier, ClusterKind, Dbscan, Hdbscan, NOISE};
pub use crate::metrics::{dunn_index, silhouette_score, ScoreKind};
pub use crate::search::{DeSettings, MeshPolicy, Tunable};
pub use crate::recursion::{cluster, resume, ClusteringRun, NodeRecord, RecursiveClustering};
pub use crate::ledger::MembershipLedger;
pub use crate::tree::{ClusterTree, Termination};
pub use crate::classification::{classify, ClassifySettings, KNearestNeighbors};
pub use crate::update::{update, UpdateSettings};
pub use crate::error::ReclusterError;
