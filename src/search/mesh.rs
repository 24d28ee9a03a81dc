//! Dynamic mesh: search budgets scaled by node population.
//!
//! Larger sub-populations warrant finer searches. The budget is a
//! non-decreasing function of the population, clamped to declared bounds.
//! It only changes how densely a range is sampled, never its boundaries.

use serde::{Deserialize, Serialize};

use crate::config::Optimizer;
use crate::error::{ReclusterError, Result};

/// Bounds for population-scaled search budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshPolicy {
    /// Fewest grid points per axis
    pub min_points: usize,
    /// Most grid points per axis
    pub max_points: usize,
    /// Fewest evolution candidates
    pub min_candidates: usize,
    /// Most evolution candidates
    pub max_candidates: usize,
    /// Fewest evolution iterations
    pub min_iterations: usize,
    /// Most evolution iterations
    pub max_iterations: usize,
    /// Multiplier applied to `ln(population)`
    pub scale: f64,
}

impl Default for MeshPolicy {
    fn default() -> Self {
        Self {
            min_points: 3,
            max_points: 8,
            min_candidates: 6,
            max_candidates: 20,
            min_iterations: 5,
            max_iterations: 30,
            scale: 1.0,
        }
    }
}

/// Search budget granted to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Budget {
    /// Points per non-explicit axis
    Grid {
        /// Grid points per axis
        points: usize,
    },
    /// Population size and generation cap
    Evolution {
        /// Candidates per generation
        candidates: usize,
        /// Maximum generations
        iterations: usize,
    },
}

impl MeshPolicy {
    /// Creates a policy with default bounds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the grid point bounds.
    #[must_use]
    pub fn with_points(mut self, min: usize, max: usize) -> Self {
        self.min_points = min;
        self.max_points = max;
        self
    }

    /// Sets the evolution candidate bounds.
    #[must_use]
    pub fn with_candidates(mut self, min: usize, max: usize) -> Self {
        self.min_candidates = min;
        self.max_candidates = max;
        self
    }

    /// Sets the evolution iteration bounds.
    #[must_use]
    pub fn with_iterations(mut self, min: usize, max: usize) -> Self {
        self.min_iterations = min;
        self.max_iterations = max;
        self
    }

    /// Sets the population multiplier.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Checks every bound pair is ordered.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] for an empty or reversed bound.
    pub fn validate(&self) -> Result<()> {
        let pairs = [
            ("dyn_mesh.points", self.min_points, self.max_points, 1),
            ("dyn_mesh.candidates", self.min_candidates, self.max_candidates, 4),
            ("dyn_mesh.iterations", self.min_iterations, self.max_iterations, 1),
        ];
        for (param, min, max, floor) in pairs {
            if min < floor || min > max {
                return Err(ReclusterError::invalid_config(
                    param,
                    format!("{min}..{max}"),
                    &format!("{floor} <= min <= max"),
                ));
            }
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ReclusterError::invalid_config("dyn_mesh.scale", self.scale, "> 0"));
        }
        Ok(())
    }

    fn scaled(&self, population: usize, factor: f64, min: usize, max: usize) -> usize {
        let raw = (self.scale * factor * (population.max(1) as f64).ln()).ceil();
        (raw.max(0.0) as usize).clamp(min, max)
    }

    /// Grid points per axis for a node of `population` samples.
    #[must_use]
    pub fn grid_points(&self, population: usize) -> usize {
        self.scaled(population, 1.0, self.min_points, self.max_points)
    }

    /// Evolution `(candidates, iterations)` for a node of `population` samples.
    #[must_use]
    pub fn evolution(&self, population: usize) -> (usize, usize) {
        (
            self.scaled(population, 3.0, self.min_candidates, self.max_candidates),
            self.scaled(population, 3.0, self.min_iterations, self.max_iterations),
        )
    }

    /// The budget `optimizer` gets for a node of `population` samples.
    #[must_use]
    pub fn derive_budget(&self, population: usize, optimizer: &Optimizer) -> Budget {
        match optimizer {
            Optimizer::Grid => Budget::Grid {
                points: self.grid_points(population),
            },
            Optimizer::Evolution(_) => {
                let (candidates, iterations) = self.evolution(population);
                Budget::Evolution {
                    candidates,
                    iterations,
                }
            }
        }
    }
}
