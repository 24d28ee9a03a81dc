// Contract tests for grid and evolution search over a synthetic staged objective.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use proptest::prelude::*;

/// Peak at (0.5, 4, 0.25); negative far away; fails when the head's first coordinate is 0.
struct Peak {
    prepares: AtomicUsize,
}

impl Peak {
    fn new() -> Self {
        Self {
            prepares: AtomicUsize::new(0),
        }
    }
}

impl StagedObjective for Peak {
    type Prefix = f64;

    fn head_len(&self) -> usize {
        2
    }

    fn prepare(&self, head: &[f64]) -> crate::error::Result<f64> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if head[0] == 0.0 {
            return Err(ReclusterError::stage("filter", "no features kept"));
        }
        Ok(-(head[0] - 0.5).powi(2) - 0.01 * (head[1] - 4.0).powi(2))
    }

    fn complete(&self, prefix: &f64, point: &[f64]) -> Trial {
        let score = 0.9 + prefix - (point[2] - 0.25).powi(2);
        let n_clusters = if point[2] > 0.9 { 1 } else { 3 };
        Trial::scored(point.to_vec(), point.to_vec(), score, n_clusters)
    }
}

fn space() -> ParamSpace {
    ParamSpace::new(vec![
        Axis {
            name: "cutoff",
            low: 0.0,
            high: 1.0,
            scale: Scale::Linear,
            integer: false,
            relative: false,
            choices: None,
            points: 5,
        },
        Axis {
            name: "n_neighbors",
            low: 2.0,
            high: 6.0,
            scale: Scale::Linear,
            integer: true,
            relative: false,
            choices: None,
            points: 3,
        },
        Axis {
            name: "cluster_param",
            low: 0.0,
            high: 1.0,
            scale: Scale::Linear,
            integer: false,
            relative: false,
            choices: None,
            points: 5,
        },
    ])
}

#[test]
fn test_trial_status_classification() {
    assert_eq!(Trial::scored(vec![], vec![], 0.3, 2).status, TrialStatus::Viable);
    assert_eq!(Trial::scored(vec![], vec![], -0.3, 2).status, TrialStatus::Negative);
    assert_eq!(
        Trial::scored(vec![], vec![], 0.9, 1).status,
        TrialStatus::TooFewClusters
    );
    assert_eq!(
        Trial::scored(vec![], vec![], f64::NAN, 3).status,
        TrialStatus::Failed
    );
}

#[test]
fn test_select_best_first_found_on_ties() {
    let trials = vec![
        Trial::scored(vec![0.0], vec![0.0], 0.5, 2),
        Trial::scored(vec![1.0], vec![1.0], 0.7, 2),
        Trial::scored(vec![2.0], vec![2.0], 0.7, 2),
    ];
    assert_eq!(select_best(&trials), Some(1));
}

#[test]
fn test_select_best_never_picks_negative() {
    let trials = vec![
        Trial::scored(vec![0.0], vec![0.0], -0.1, 2),
        Trial::scored(vec![1.0], vec![1.0], 0.0, 2),
    ];
    assert_eq!(select_best(&trials), Some(1));
    let only_negative = vec![Trial::scored(vec![0.0], vec![0.0], -0.1, 2)];
    assert_eq!(select_best(&only_negative), None);
}

#[test]
fn test_grid_finds_peak() {
    let objective = Peak::new();
    let report = GridSearch::new().run(&space(), &objective);
    assert_eq!(report.evaluations(), 75);
    let best = report.best().expect("viable trial");
    assert_eq!(best.resolved, vec![0.5, 4.0, 0.25]);
}

#[test]
fn test_grid_shares_prefix_per_head() {
    let objective = Peak::new();
    let _ = GridSearch::new().with_parallel(false).run(&space(), &objective);
    // 5 cutoffs x 3 neighbour counts
    assert_eq!(objective.prepares.load(Ordering::SeqCst), 15);
}

#[test]
fn test_grid_failed_prefix_fails_whole_group() {
    let objective = Peak::new();
    let report = GridSearch::new().run(&space(), &objective);
    // cutoff = 0 fails for 3 neighbour counts x 5 cluster params
    assert_eq!(report.failures(), 15);
    assert!(!report.all_failed());
}

#[test]
fn test_grid_is_idempotent() {
    let a = GridSearch::new().run(&space(), &Peak::new());
    let b = GridSearch::new().run(&space(), &Peak::new());
    assert_eq!(a.best, b.best);
    assert_eq!(a.trials, b.trials);
}

#[test]
fn test_evolution_respects_bounds_and_memoizes() {
    let de = DifferentialEvolution::new(DeSettings::default())
        .with_budget(8, 10)
        .with_seed(7);
    let report = de.run(&space(), &Peak::new());
    for trial in &report.trials {
        assert!((0.0..=1.0).contains(&trial.point[0]));
        assert!((2.0..=6.0).contains(&trial.point[1]));
        assert_eq!(trial.point[1].fract(), 0.0);
    }
    // Memoized: no duplicate vectors in the log
    for (i, a) in report.trials.iter().enumerate() {
        for b in &report.trials[i + 1..] {
            assert_ne!(a.point, b.point);
        }
    }
    assert!(report.best().is_some());
}

#[test]
fn test_evolution_is_deterministic_with_seed() {
    let run = || {
        DifferentialEvolution::new(DeSettings::default())
            .with_seed(11)
            .run(&space(), &Peak::new())
    };
    let (a, b) = (run(), run());
    assert_eq!(a.trials, b.trials);
    assert_eq!(a.history, b.history);
}

#[test]
fn test_evolution_history_non_decreasing() {
    let report = DifferentialEvolution::new(DeSettings::default())
        .with_seed(3)
        .run(&space(), &Peak::new());
    for w in report.history.windows(2) {
        assert!(w[1] >= w[0]);
    }
}

#[test]
fn test_de_settings_validation() {
    assert!(DeSettings::default().validate().is_ok());
    let bad = DeSettings {
        candidates: 3,
        ..DeSettings::default()
    };
    assert!(bad.validate().is_err());
    let bad = DeSettings {
        crossover_rate: 1.5,
        ..DeSettings::default()
    };
    assert!(bad.validate().is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_evolution_best_dominates_observed(seed in 0u64..1000) {
        let report = DifferentialEvolution::new(DeSettings::default())
            .with_budget(6, 6)
            .with_seed(seed)
            .run(&space(), &Peak::new());
        if let Some(best) = report.best() {
            for trial in report.trials.iter().filter(|t| t.is_selectable()) {
                prop_assert!(best.score >= trial.score);
            }
        }
    }
}
