//! Tunable ranges and the per-node parameter space.
//!
//! A node searches three axes in a fixed order: the filter cutoff, the
//! embedding neighbour count and the clustering parameter. Ranges declared
//! as [`ParamRange::Auto`] are derived from the node's population and
//! feature count when the space is built.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterKind;
use crate::config::RunConfig;
use crate::error::{ReclusterError, Result};
use crate::filter::FilterKind;

/// How a tunable parameter's candidate values are declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamRange {
    /// Derived from the node's population and feature count.
    #[default]
    Auto,
    /// An explicit list of candidate values.
    Explicit {
        /// Candidate values, searched in the given order
        values: Vec<f64>,
    },
    /// Evenly spaced values between two bounds.
    Linear {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
    },
    /// Geometrically spaced values between two positive bounds.
    Log {
        /// Lower bound (> 0)
        low: f64,
        /// Upper bound
        high: f64,
    },
}

/// A parameter range plus the number of grid points drawn from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunable {
    /// The declared range
    pub range: ParamRange,
    /// Points drawn from non-explicit ranges during grid search
    pub points: usize,
}

impl Default for Tunable {
    fn default() -> Self {
        Self::auto(5)
    }
}

impl Tunable {
    /// Population-derived range with `points` grid points.
    #[must_use]
    pub fn auto(points: usize) -> Self {
        Self {
            range: ParamRange::Auto,
            points,
        }
    }

    /// Explicit candidate list.
    #[must_use]
    pub fn explicit(values: Vec<f64>) -> Self {
        let points = values.len();
        Self {
            range: ParamRange::Explicit { values },
            points,
        }
    }

    /// A single fixed value.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        Self::explicit(vec![value])
    }

    /// Linear range between `low` and `high`.
    #[must_use]
    pub fn linear(low: f64, high: f64, points: usize) -> Self {
        Self {
            range: ParamRange::Linear { low, high },
            points,
        }
    }

    /// Logarithmic range between `low` and `high`.
    #[must_use]
    pub fn log(low: f64, high: f64, points: usize) -> Self {
        Self {
            range: ParamRange::Log { low, high },
            points,
        }
    }

    /// Checks the range is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] naming `param`.
    pub fn validate(&self, param: &str) -> Result<()> {
        match &self.range {
            ParamRange::Auto => {}
            ParamRange::Explicit { values } => {
                if values.is_empty() {
                    return Err(ReclusterError::invalid_config(param, "[]", "non-empty list"));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(ReclusterError::invalid_config(
                        param,
                        format!("{values:?}"),
                        "finite values",
                    ));
                }
            }
            ParamRange::Linear { low, high } => {
                if !(low.is_finite() && high.is_finite()) || low > high {
                    return Err(ReclusterError::invalid_config(
                        param,
                        format!("{low}..{high}"),
                        "finite bounds with low <= high",
                    ));
                }
            }
            ParamRange::Log { low, high } => {
                if !(low.is_finite() && high.is_finite()) || *low <= 0.0 || low > high {
                    return Err(ReclusterError::invalid_config(
                        param,
                        format!("{low}..{high}"),
                        "positive bounds with low <= high",
                    ));
                }
            }
        }
        if self.points == 0 {
            return Err(ReclusterError::invalid_config(
                &format!("{param}.points"),
                0,
                ">= 1",
            ));
        }
        Ok(())
    }

    /// Every explicit value, or the two declared bounds.
    pub(crate) fn declared_values(&self) -> Vec<f64> {
        match &self.range {
            ParamRange::Auto => Vec::new(),
            ParamRange::Explicit { values } => values.clone(),
            ParamRange::Linear { low, high } | ParamRange::Log { low, high } => vec![*low, *high],
        }
    }
}

/// Spacing of generated grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Evenly spaced
    Linear,
    /// Geometrically spaced
    Log,
    /// Points dense near the upper bound: `1 - geomspace(1 - low, 1 - high)`
    ComplementLog,
}

/// One searchable axis with concrete bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    /// Axis name, used in logs and records
    pub name: &'static str,
    /// Inclusive lower bound
    pub low: f64,
    /// Inclusive upper bound
    pub high: f64,
    /// Spacing of generated points
    pub scale: Scale,
    /// Values are rounded to integers
    pub integer: bool,
    /// Values are positions in [0, 1] resolved against the data at evaluation time
    pub relative: bool,
    /// Explicit candidate values, when declared
    pub choices: Option<Vec<f64>>,
    /// Number of generated grid points
    pub points: usize,
}

impl Axis {
    fn generated(
        name: &'static str,
        low: f64,
        high: f64,
        scale: Scale,
        integer: bool,
        points: usize,
    ) -> Self {
        Self {
            name,
            low,
            high,
            scale,
            integer,
            relative: false,
            choices: None,
            points,
        }
    }

    /// Builds an axis from a declared tunable, clamping to `[floor, ceil]`.
    fn from_tunable(
        name: &'static str,
        tunable: &Tunable,
        floor: f64,
        ceil: f64,
        integer: bool,
    ) -> Self {
        let clamp = |v: f64| v.clamp(floor, ceil.max(floor));
        match &tunable.range {
            ParamRange::Explicit { values } => {
                let choices: Vec<f64> = values
                    .iter()
                    .map(|&v| if integer { clamp(v).round() } else { clamp(v) })
                    .collect();
                let low = choices.iter().copied().fold(f64::INFINITY, f64::min);
                let high = choices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Self {
                    name,
                    low,
                    high,
                    scale: Scale::Linear,
                    integer,
                    relative: false,
                    choices: Some(dedup_in_order(choices)),
                    points: values.len(),
                }
            }
            ParamRange::Linear { low, high } => Self::generated(
                name,
                clamp(*low),
                clamp(*high),
                Scale::Linear,
                integer,
                tunable.points,
            ),
            ParamRange::Log { low, high } => Self::generated(
                name,
                clamp(*low).max(f64::MIN_POSITIVE),
                clamp(*high).max(f64::MIN_POSITIVE),
                Scale::Log,
                integer,
                tunable.points,
            ),
            // Callers resolve Auto before reaching here
            ParamRange::Auto => {
                Self::generated(name, floor, ceil.max(floor), Scale::Linear, integer, tunable.points)
            }
        }
    }

    /// Whether the axis holds a single value.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.grid().len() <= 1
    }

    /// Grid values for this axis, deduplicated and in ascending generation order.
    #[must_use]
    pub fn grid(&self) -> Vec<f64> {
        if let Some(choices) = &self.choices {
            return choices.clone();
        }
        if self.points <= 1 || (self.high - self.low).abs() < f64::EPSILON {
            return vec![self.snap(self.low)];
        }
        let n = self.points;
        let values = (0..n).map(|i| {
            let t = i as f64 / (n - 1) as f64;
            let raw = match self.scale {
                Scale::Linear => self.low + t * (self.high - self.low),
                Scale::Log => {
                    let (ll, lh) = (self.low.ln(), self.high.ln());
                    (ll + t * (lh - ll)).exp()
                }
                Scale::ComplementLog => {
                    let (cl, ch) = ((1.0 - self.low).ln(), (1.0 - self.high).ln());
                    1.0 - (cl + t * (ch - cl)).exp()
                }
            };
            self.snap(raw)
        });
        dedup_in_order(values.collect())
    }

    /// Maps an arbitrary coordinate onto the nearest admissible value.
    #[must_use]
    pub fn snap(&self, x: f64) -> f64 {
        let x = if x.is_finite() { x } else { self.low };
        if let Some(choices) = &self.choices {
            return choices
                .iter()
                .copied()
                .min_by(|a, b| {
                    (a - x)
                        .abs()
                        .partial_cmp(&(b - x).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(x);
        }
        let clamped = x.clamp(self.low, self.high);
        if self.integer {
            clamped.round().clamp(self.low.ceil(), self.high.floor().max(self.low.ceil()))
        } else {
            clamped
        }
    }
}

fn dedup_in_order(values: Vec<f64>) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(values.len());
    for v in values {
        if !out.iter().any(|o| (o - v).abs() < 1e-12) {
            out.push(v);
        }
    }
    out
}

/// Axis names, in search order.
pub const AXIS_NAMES: [&str; 3] = ["cutoff", "n_neighbors", "cluster_param"];

/// The joint search space of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    axes: Vec<Axis>,
}

impl ParamSpace {
    /// Creates a space from explicit axes.
    #[must_use]
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    /// Derives the space of a node with `population` fitted samples and
    /// `n_features` features. `points` overrides the number of generated
    /// grid points of every non-explicit axis (dynamic mesh).
    ///
    /// # Errors
    ///
    /// Returns an error if the population is too small to build neighbourhoods.
    pub fn derive(
        config: &RunConfig,
        population: usize,
        n_features: usize,
        points: Option<usize>,
    ) -> Result<Self> {
        if population < 3 {
            return Err(ReclusterError::invalid_config(
                "population",
                population,
                ">= 3 samples to search a node",
            ));
        }
        if n_features == 0 {
            return Err(ReclusterError::empty_input("features"));
        }
        let n = population as f64;
        let pts = |t: &Tunable| points.unwrap_or(t.points);

        let cutoff = match (config.filter, &config.cutoff.range) {
            (FilterKind::TruncatedSvd, ParamRange::Auto) => {
                let cap = n_features.min(population - 1).min(50).max(1) as f64;
                let low = 2.0_f64.min(cap);
                Axis::generated("cutoff", low, cap, Scale::Linear, true, pts(&config.cutoff))
            }
            (FilterKind::TruncatedSvd, _) => {
                let cap = n_features.min(population - 1).max(1) as f64;
                let mut axis = Axis::from_tunable("cutoff", &config.cutoff, 1.0, cap, true);
                axis.points = pts(&config.cutoff);
                axis
            }
            (_, ParamRange::Auto) => Axis::generated(
                "cutoff",
                0.3,
                0.95,
                Scale::ComplementLog,
                false,
                pts(&config.cutoff),
            ),
            (_, _) => {
                let mut axis = Axis::from_tunable("cutoff", &config.cutoff, 1e-6, 1.0, false);
                axis.points = pts(&config.cutoff);
                axis
            }
        };

        let nn_cap = (population - 1) as f64;
        let n_neighbors = match &config.neighbors.range {
            ParamRange::Auto => {
                let low = 5.0_f64.min(nn_cap).max(2.0);
                let high = n.sqrt().round().clamp(low, nn_cap.max(low));
                Axis::generated("n_neighbors", low, high, Scale::Linear, true, pts(&config.neighbors))
            }
            _ => {
                let mut axis =
                    Axis::from_tunable("n_neighbors", &config.neighbors, 2.0, nn_cap, true);
                axis.points = pts(&config.neighbors);
                axis
            }
        };

        let cluster_param = match (config.clusterer, &config.cluster_param.range) {
            (ClusterKind::Dbscan, ParamRange::Auto) => {
                let mut axis = Axis::generated(
                    "cluster_param",
                    0.0,
                    1.0,
                    Scale::Linear,
                    false,
                    pts(&config.cluster_param),
                );
                axis.relative = true;
                axis
            }
            (ClusterKind::Dbscan, _) => {
                let mut axis = Axis::from_tunable(
                    "cluster_param",
                    &config.cluster_param,
                    f64::MIN_POSITIVE,
                    f64::MAX,
                    false,
                );
                axis.points = pts(&config.cluster_param);
                axis
            }
            (ClusterKind::Hdbscan, ParamRange::Auto) => {
                let low = (config.min_cluster_size as f64).min(n);
                let high = (n / 4.0).floor().max(low);
                Axis::generated(
                    "cluster_param",
                    low,
                    high,
                    Scale::Linear,
                    true,
                    pts(&config.cluster_param),
                )
            }
            (ClusterKind::Hdbscan, _) => {
                let mut axis =
                    Axis::from_tunable("cluster_param", &config.cluster_param, 2.0, n, true);
                axis.points = pts(&config.cluster_param);
                axis
            }
        };

        Ok(Self::new(vec![cutoff, n_neighbors, cluster_param]))
    }

    /// Number of axes.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    /// The axes in search order.
    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Inclusive bounds of every axis.
    #[must_use]
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.axes.iter().map(|a| (a.low, a.high)).collect()
    }

    /// Snaps every coordinate onto its axis.
    #[must_use]
    pub fn snap(&self, point: &[f64]) -> Vec<f64> {
        self.axes
            .iter()
            .zip(point)
            .map(|(axis, &x)| axis.snap(x))
            .collect()
    }

    /// Total number of grid points.
    #[must_use]
    pub fn grid_size(&self) -> usize {
        self.axes.iter().map(|a| a.grid().len()).product()
    }

    /// Cartesian product of all axis grids; the first axis varies slowest.
    #[must_use]
    pub fn grid(&self) -> Vec<Vec<f64>> {
        let mut points = vec![Vec::with_capacity(self.axes.len())];
        for axis in &self.axes {
            let values = axis.grid();
            let mut next = Vec::with_capacity(points.len() * values.len());
            for prefix in &points {
                for &value in &values {
                    let mut point = prefix.clone();
                    point.push(value);
                    next.push(point);
                }
            }
            points = next;
        }
        points
    }
}

/// A fully resolved parameter vector of a node's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamVector {
    /// Filter cutoff: variance/MAD fraction, or number of SVD components
    pub cutoff: f64,
    /// Neighbour count of the embedding graph
    pub n_neighbors: usize,
    /// DBSCAN radius or HDBSCAN minimum cluster size
    pub cluster_param: f64,
}

impl ParamVector {
    /// Reads a resolved `[cutoff, n_neighbors, cluster_param]` coordinate vector.
    #[must_use]
    pub fn from_point(point: &[f64]) -> Self {
        Self {
            cutoff: point.first().copied().unwrap_or(0.0),
            n_neighbors: point.get(1).map_or(0, |v| v.round().max(0.0) as usize),
            cluster_param: point.get(2).copied().unwrap_or(0.0),
        }
    }

    /// The coordinate vector, in axis order.
    #[must_use]
    pub fn to_point(&self) -> Vec<f64> {
        vec![self.cutoff, self.n_neighbors as f64, self.cluster_param]
    }
}

#[cfg(test)]
#[path = "space_tests.rs"]
mod tests;
