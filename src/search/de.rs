//! Differential Evolution (DE) over a node's parameter space.
//!
//! # Algorithm
//!
//! ```text
//! For each target vector xᵢ:
//!   1. Select distinct random vectors xₐ, xᵦ, xᵧ
//!   2. Mutant: v = xₐ + F·(xᵦ - xᵧ)
//!   3. Crossover: uⱼ = vⱼ if rand() < CR else xᵢⱼ
//!   4. Selection: xᵢ' = u if f(u) >= f(xᵢ) else xᵢ
//! ```
//!
//! Scores are maximized. Trial vectors are snapped onto the space (integer
//! rounding, explicit candidate lists) before evaluation, and evaluations
//! are memoized per snapped vector. A generation's trials are evaluated in
//! parallel and replacements applied afterwards.
//!
//! # References
//!
//! - Storn & Price (1997): "Differential Evolution - A Simple and Efficient
//!   Heuristic for Global Optimization over Continuous Spaces"

use std::collections::HashMap;

use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{select_best, ParamSpace, SearchReport, StagedObjective, Trial};
use crate::error::{ReclusterError, Result};

/// DE mutation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeStrategy {
    /// DE/rand/1/bin: v = xₐ + F·(xᵦ - xᵧ)
    #[default]
    Rand1Bin,

    /// DE/best/1/bin: v = x_best + F·(xₐ - xᵦ)
    Best1Bin,

    /// DE/current-to-best/1/bin: v = xᵢ + F·(x_best - xᵢ) + F·(xₐ - xᵦ)
    CurrentToBest1Bin,
}

/// User-facing settings of the evolution optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeSettings {
    /// Candidates per generation
    pub candidates: usize,
    /// Maximum generations
    pub iterations: usize,
    /// Mutation factor F ∈ (0, 2]
    pub mutation_factor: f64,
    /// Crossover rate CR ∈ [0, 1]
    pub crossover_rate: f64,
    /// Mutation strategy
    pub strategy: DeStrategy,
    /// Minimum improvement of the best score that resets stagnation
    pub tolerance: f64,
    /// Generations without improvement before stopping
    pub patience: usize,
}

impl Default for DeSettings {
    fn default() -> Self {
        Self {
            candidates: 10,
            iterations: 20,
            mutation_factor: 0.8,
            crossover_rate: 0.9,
            strategy: DeStrategy::Rand1Bin,
            tolerance: 1e-4,
            patience: 5,
        }
    }
}

impl DeSettings {
    /// Checks the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ReclusterError::InvalidConfig`] for out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if self.candidates < 4 {
            return Err(ReclusterError::invalid_config(
                "optimizer.candidates",
                self.candidates,
                ">= 4",
            ));
        }
        if self.iterations == 0 {
            return Err(ReclusterError::invalid_config("optimizer.iterations", 0, ">= 1"));
        }
        if !(self.mutation_factor > 0.0 && self.mutation_factor <= 2.0) {
            return Err(ReclusterError::invalid_config(
                "optimizer.mutation_factor",
                self.mutation_factor,
                "in (0, 2]",
            ));
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return Err(ReclusterError::invalid_config(
                "optimizer.crossover_rate",
                self.crossover_rate,
                "in [0, 1]",
            ));
        }
        if !(self.tolerance >= 0.0) {
            return Err(ReclusterError::invalid_config(
                "optimizer.tolerance",
                self.tolerance,
                ">= 0",
            ));
        }
        if self.patience == 0 {
            return Err(ReclusterError::invalid_config("optimizer.patience", 0, ">= 1"));
        }
        Ok(())
    }
}

/// Differential Evolution optimizer.
#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    settings: DeSettings,
    seed: Option<u64>,
    parallel: bool,
}

impl DifferentialEvolution {
    /// Create an optimizer from settings.
    #[must_use]
    pub fn new(settings: DeSettings) -> Self {
        Self {
            settings,
            seed: None,
            parallel: true,
        }
    }

    /// Override the candidate count and generation cap.
    #[must_use]
    pub fn with_budget(mut self, candidates: usize, iterations: usize) -> Self {
        self.settings.candidates = candidates.max(4);
        self.settings.iterations = iterations.max(1);
        self
    }

    /// Set random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enables or disables parallel evaluation within a generation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// The active settings.
    #[must_use]
    pub fn settings(&self) -> &DeSettings {
        &self.settings
    }

    /// Create RNG from seed or entropy.
    fn make_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Select `k` distinct random indices, excluding `exclude`.
    fn select_distinct(n: usize, exclude: usize, k: usize, rng: &mut StdRng) -> Vec<usize> {
        let mut indices = Vec::with_capacity(k);
        while indices.len() < k {
            let idx = rng.gen_range(0..n);
            if idx != exclude && !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        indices
    }

    /// Generate mutant vector based on strategy.
    fn mutate(
        &self,
        population: &[Vec<f64>],
        target: usize,
        best: usize,
        rng: &mut StdRng,
    ) -> Vec<f64> {
        let f = self.settings.mutation_factor;
        let dim = population[target].len();
        let picks = Self::select_distinct(population.len(), target, 3, rng);
        let (a, b, c) = (picks[0], picks[1], picks[2]);
        match self.settings.strategy {
            DeStrategy::Rand1Bin => (0..dim)
                .map(|j| population[a][j] + f * (population[b][j] - population[c][j]))
                .collect(),
            DeStrategy::Best1Bin => (0..dim)
                .map(|j| population[best][j] + f * (population[a][j] - population[b][j]))
                .collect(),
            DeStrategy::CurrentToBest1Bin => (0..dim)
                .map(|j| {
                    population[target][j]
                        + f * (population[best][j] - population[target][j])
                        + f * (population[a][j] - population[b][j])
                })
                .collect(),
        }
    }

    /// Binomial crossover.
    fn crossover(target: &[f64], mutant: &[f64], cr: f64, rng: &mut StdRng) -> Vec<f64> {
        let dim = target.len();
        if dim == 0 {
            return Vec::new();
        }
        // At least one coordinate comes from the mutant
        let j_rand = rng.gen_range(0..dim);
        (0..dim)
            .map(|j| {
                if j == j_rand || rng.gen::<f64>() < cr {
                    mutant[j]
                } else {
                    target[j]
                }
            })
            .collect()
    }

    /// Evaluates `points` through the memo, returning their fitness in order.
    fn evaluate_all<O: StagedObjective>(
        &self,
        points: &[Vec<f64>],
        objective: &O,
        memo: &mut HashMap<Vec<u64>, usize>,
        trials: &mut Vec<Trial>,
    ) -> Vec<f64> {
        let mut pending: Vec<Vec<f64>> = Vec::new();
        for point in points {
            let key = memo_key(point);
            if !memo.contains_key(&key) && !pending.iter().any(|p| memo_key(p) == key) {
                pending.push(point.clone());
            }
        }
        let fresh: Vec<Trial> = if self.parallel {
            pending.par_iter().map(|p| objective.evaluate(p)).collect()
        } else {
            pending.iter().map(|p| objective.evaluate(p)).collect()
        };
        for trial in fresh {
            memo.insert(memo_key(&trial.point), trials.len());
            trials.push(trial);
        }
        points
            .iter()
            .map(|p| memo.get(&memo_key(p)).map_or(f64::NEG_INFINITY, |&i| trials[i].score))
            .collect()
    }

    /// Searches `space`, maximizing the objective.
    ///
    /// Stops when the best score improves by less than the tolerance for
    /// `patience` consecutive generations, or at the generation cap.
    pub fn run<O: StagedObjective>(&self, space: &ParamSpace, objective: &O) -> SearchReport {
        let mut rng = self.make_rng();
        let bounds = space.bounds();
        let pop_size = self.settings.candidates.max(4);

        let mut population: Vec<Vec<f64>> = (0..pop_size)
            .map(|_| {
                let raw: Vec<f64> = bounds
                    .iter()
                    .map(|&(lo, hi)| if hi > lo { rng.gen_range(lo..=hi) } else { lo })
                    .collect();
                space.snap(&raw)
            })
            .collect();

        let mut memo: HashMap<Vec<u64>, usize> = HashMap::new();
        let mut trials: Vec<Trial> = Vec::new();
        let mut fitness = self.evaluate_all(&population, objective, &mut memo, &mut trials);

        let mut history = Vec::with_capacity(self.settings.iterations + 1);
        let mut best_score = best_selectable(&trials);
        history.push(best_score);
        let mut stagnant = 0;

        for generation in 0..self.settings.iterations {
            let best_idx = argmax(&fitness);
            let candidates: Vec<Vec<f64>> = (0..pop_size)
                .map(|i| {
                    let mutant = self.mutate(&population, i, best_idx, &mut rng);
                    let trial = Self::crossover(
                        &population[i],
                        &mutant,
                        self.settings.crossover_rate,
                        &mut rng,
                    );
                    space.snap(&trial)
                })
                .collect();

            let scores = self.evaluate_all(&candidates, objective, &mut memo, &mut trials);
            for (i, (candidate, score)) in candidates.into_iter().zip(scores).enumerate() {
                if score >= fitness[i] {
                    population[i] = candidate;
                    fitness[i] = score;
                }
            }

            let current = best_selectable(&trials);
            history.push(current);
            let improved = current > best_score && current - best_score >= self.settings.tolerance;
            if improved {
                stagnant = 0;
            } else {
                stagnant += 1;
            }
            best_score = best_score.max(current);

            if stagnant >= self.settings.patience {
                tracing::debug!(generation, stagnant, "evolution converged");
                break;
            }
        }

        let best = select_best(&trials);
        tracing::debug!(
            evaluations = trials.len(),
            generations = history.len() - 1,
            best = ?best.map(|b| &trials[b].resolved),
            "evolution finished"
        );
        SearchReport {
            trials,
            best,
            history,
        }
    }
}

fn memo_key(point: &[f64]) -> Vec<u64> {
    point.iter().map(|v| v.to_bits()).collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(i, _)| i)
}

fn best_selectable(trials: &[Trial]) -> f64 {
    select_best(trials).map_or(f64::NEG_INFINITY, |i| trials[i].score)
}
