//! Recluster: recursive coarse-to-fine clustering in pure Rust.
//!
//! Every node of the hierarchy runs a feature filter, a neighbourhood-graph
//! embedding and a density clustering whose parameters are optimized
//! jointly against an internal quality score. Each cluster found becomes a
//! child node and is clustered again until it is too small, too deep, or a
//! single cluster. Membership is recorded in a one-hot ledger that exports
//! to a nested JSON tree.
//!
//! # Quick Start
//!
//! ```no_run
//! use recluster::prelude::*;
//!
//! # fn main() -> recluster::Result<()> {
//! let values = Matrix::from_vec(6, 2, vec![
//!     0.0, 0.0,
//!     0.2, 0.1,
//!     0.1, 0.3,
//!     9.0, 9.0,
//!     9.2, 9.1,
//!     9.1, 9.3,
//! ])?;
//! let data = Dataset::with_default_names(values)?;
//!
//! let config = RunConfig::default()
//!     .with_min_cluster_size(2)
//!     .with_popcut(4)
//!     .with_seed(42);
//! let run = cluster(&data, config)?;
//! for column in run.ledger.columns() {
//!     println!("{column}: {:?}", run.ledger.members(column));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`primitives`]: Row-major matrix and distance metrics
//! - [`data`]: Datasets with sample identifiers and feature names
//! - [`config`]: Run configuration and validation
//! - [`preprocessing`]: Per-node normalization
//! - [`filter`]: Feature filters
//! - [`manifold`]: Neighbourhood-graph embedding
//! - [`cluster`]: DBSCAN and HDBSCAN cluster identification
//! - [`metrics`]: Silhouette and Dunn clustering scores
//! - [`search`]: Grid search, differential evolution and the dynamic mesh
//! - [`pipeline`]: Joint optimization of one node's stages
//! - [`tree`]: Arena hierarchy of nodes
//! - [`ledger`]: One-hot membership table and tree export
//! - [`checkpoint`]: Per-node checkpoints and resume
//! - [`recursion`]: The recursion controller
//! - [`classification`]: k-NN and hierarchical classification of new samples
//! - [`update`]: Incremental update of an existing hierarchy

pub mod checkpoint;
pub mod classification;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod manifold;
pub mod metrics;
pub mod pipeline;
pub mod prelude;
pub mod preprocessing;
pub mod primitives;
pub mod recursion;
pub mod search;
pub mod traits;
pub mod tree;
pub mod update;

pub use error::{ReclusterError, Result};
pub use primitives::Matrix;
pub use traits::{Transformer, UnsupervisedEstimator};
