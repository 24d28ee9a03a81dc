//! Core compute primitives (Matrix, distance metrics).
//!
//! These types provide the foundation for every pipeline stage.

mod distance;
mod matrix;

pub use distance::{k_nearest, pairwise, Metric};
pub use matrix::Matrix;
