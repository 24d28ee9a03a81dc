//! Exhaustive grid search.

use rayon::prelude::*;

use super::{select_best, ParamSpace, SearchReport, StagedObjective, Trial};

/// Evaluates every point of the Cartesian product of the axis grids.
///
/// Points sharing the same leading coordinates are evaluated against one
/// shared prefix, and prefix groups run in parallel. The trial log keeps
/// grid order, so ties resolve to the first point in that order.
#[derive(Debug, Clone)]
pub struct GridSearch {
    parallel: bool,
}

impl Default for GridSearch {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl GridSearch {
    /// Creates a parallel grid search.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables parallel evaluation of prefix groups.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Evaluates the full grid of `space`.
    pub fn run<O: StagedObjective>(&self, space: &ParamSpace, objective: &O) -> SearchReport {
        let points = space.grid();
        let head = objective.head_len();

        // Consecutive runs of points with identical heads
        let mut groups: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        for i in 1..=points.len() {
            let boundary = i == points.len()
                || points[i][..head.min(points[i].len())]
                    != points[start][..head.min(points[start].len())];
            if boundary {
                groups.push((start, i));
                start = i;
            }
        }

        let evaluate_group = |&(s, e): &(usize, usize)| -> Vec<Trial> {
            let group = &points[s..e];
            let prefix = objective.prepare(&group[0][..head.min(group[0].len())]);
            group
                .iter()
                .map(|point| match &prefix {
                    Ok(p) => objective.complete(p, point),
                    Err(err) => Trial::failed(point.clone(), err),
                })
                .collect()
        };

        let nested: Vec<Vec<Trial>> = if self.parallel {
            groups.par_iter().map(evaluate_group).collect()
        } else {
            groups.iter().map(evaluate_group).collect()
        };
        let trials: Vec<Trial> = nested.into_iter().flatten().collect();
        let best = select_best(&trials);
        let history = best.map(|b| trials[b].score).into_iter().collect();

        tracing::debug!(
            evaluations = trials.len(),
            prefixes = groups.len(),
            best = ?best.map(|b| &trials[b].resolved),
            "grid search finished"
        );

        SearchReport {
            trials,
            best,
            history,
        }
    }
}
