// =========================================================================
// FALSIFY-PL: joint node optimization
//
// A node's winner must be reproducible by refitting its stages, and a node
// whose every candidate fails must surface the failure instead of
// producing a partition.
// =========================================================================

use super::*;
use crate::cluster::NOISE;
use crate::search::{Tunable, TrialStatus};
use rand::prelude::*;

/// Two uniform blobs on the diagonal, `n` rows each.
fn two_blobs(n: usize, seed: u64) -> Matrix<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(2 * n);
    for center in [0.0_f32, 12.0] {
        for _ in 0..n {
            rows.push(vec![
                center + rng.gen_range(-1.0..1.0),
                center + rng.gen_range(-1.0..1.0),
            ]);
        }
    }
    Matrix::from_rows(&rows).expect("rows have equal length")
}

fn small_config() -> RunConfig {
    RunConfig::default()
        .with_cutoff(Tunable::fixed(0.9))
        .with_neighbors(Tunable::fixed(8.0))
        .with_cluster_param(Tunable::auto(4))
        .with_min_cluster_size(5)
        .with_seed(7)
}

/// FALSIFY-PL-001: separated blobs are never merged by the winner
#[test]
fn falsify_pl_001_blobs_stay_apart() {
    let x = two_blobs(40, 1);
    let outcome = optimize_node(&small_config(), "0", &x, None, 11).expect("search succeeds");
    let fit = outcome.fit.expect("two blobs give a viable partition");

    assert_eq!(n_clusters(&fit.labels), 2, "FALSIFIED PL-001: {:?}", fit.labels);
    for i in 0..40 {
        for j in 40..80 {
            let (a, b) = (fit.labels[i], fit.labels[j]);
            assert!(
                a == NOISE || b == NOISE || a != b,
                "FALSIFIED PL-001: rows {i} and {j} share cluster {a}"
            );
        }
    }
    assert_eq!(fit.trial.status, TrialStatus::Viable);
}

/// FALSIFY-PL-002: refitted stages reproduce the winning trial's clusters
#[test]
fn falsify_pl_002_refit_matches_trial() {
    let x = two_blobs(30, 2);
    let outcome = optimize_node(&small_config(), "0", &x, None, 5).expect("search succeeds");
    let fit = outcome.fit.expect("viable partition");
    assert_eq!(n_clusters(&fit.labels), fit.trial.n_clusters);
    assert_eq!(fit.stages.labels(), Some(&fit.labels[..]));
    assert_eq!(fit.embedding.shape(), (60, 2));
}

/// FALSIFY-PL-003: every candidate failing surfaces OptimizationFailed
#[test]
fn falsify_pl_003_all_failures_surface() {
    // Constant features leave nothing for the filter to rank
    let x = Matrix::from_vec(30, 2, vec![1.0; 60]).expect("valid");
    let err = optimize_node(&small_config(), "0_3", &x, None, 1).unwrap_err();
    match err {
        ReclusterError::OptimizationFailed { node, candidates } => {
            assert_eq!(node, "0_3");
            assert!(candidates > 0);
        }
        other => panic!("FALSIFIED PL-003: unexpected error {other}"),
    }
}

/// FALSIFY-PL-004: the objective is deterministic for a fixed seed
#[test]
fn falsify_pl_004_objective_deterministic() {
    let x = two_blobs(20, 3);
    let config = small_config();
    let objective = NodeObjective::new(&config, &x, 9, true);
    let a = objective.evaluate(&[0.9, 8.0, 0.5]);
    let b = objective.evaluate(&[0.9, 8.0, 0.5]);
    assert_eq!(a, b, "FALSIFIED PL-004: same vector scored differently");
    assert_eq!(a.point, vec![0.9, 8.0, 0.5]);
    assert!(a.resolved[2] > 0.0, "relative radius resolves to a positive radius");
}

#[test]
fn test_trained_stages_project_new_rows() {
    let x = two_blobs(25, 4);
    let outcome = optimize_node(&small_config(), "0", &x, None, 3).expect("search succeeds");
    let fit = outcome.fit.expect("viable partition");
    let new_rows = Matrix::from_vec(2, 2, vec![0.1, -0.2, 12.2, 11.9]).expect("valid");
    let projected = fit.stages.embed(&new_rows).expect("projection succeeds");
    assert_eq!(projected.shape(), (2, 2));
}

#[test]
fn test_filter_cache_reuses_output() {
    let x = two_blobs(10, 5);
    let config = small_config();
    let objective = NodeObjective::new(&config, &x, 1, false);
    let first = objective.filtered(0.9).expect("filter succeeds");
    let second = objective.filtered(0.9).expect("filter succeeds");
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_map_store_round_trip() {
    let x = two_blobs(20, 6);
    let outcome = optimize_node(&small_config(), "0", &x, None, 2).expect("search succeeds");
    let fit = outcome.fit.expect("viable partition");

    let mut store = MapStore::new();
    store.insert("0", fit.stages);
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("maps.json");
    store.save(&path).expect("save");
    let loaded = MapStore::load(&path).expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["0"]);
    assert_eq!(
        loaded.get("0").map(|s| s.params),
        store.get("0").map(|s| s.params)
    );
}
