// =========================================================================
// FALSIFY-RC: recursion controller
// =========================================================================

use super::*;

fn dataset(values: Vec<f32>, cols: usize) -> Dataset {
    let rows = values.len() / cols;
    Dataset::with_default_names(Matrix::from_vec(rows, cols, values).expect("valid"))
        .expect("valid dataset")
}

/// FALSIFY-RC-001: node seeds depend on the run seed and the node name only
#[test]
fn falsify_rc_001_node_seed_deterministic() {
    assert_eq!(node_seed(7, "0_1"), node_seed(7, "0_1"));
    assert_ne!(node_seed(7, "0_1"), node_seed(7, "0_2"));
    assert_ne!(node_seed(7, "0_1"), node_seed(8, "0_1"));
}

/// FALSIFY-RC-002: a node too small for two clusters terminates without search
#[test]
fn falsify_rc_002_small_root_is_single_cluster() {
    let data = dataset((0..12).map(|v| v as f32).collect(), 2);
    let config = RunConfig::default().with_min_cluster_size(5).with_seed(1);
    let run = cluster(&data, config).expect("run succeeds");
    assert_eq!(run.tree.len(), 1);
    assert!(run.ledger.columns().is_empty());
    let root = run.record("0").expect("root record");
    assert_eq!(root.termination, Termination::SingleCluster);
    assert_eq!(root.evaluations, 0);
    assert!(root.score.is_none());
}

#[test]
fn test_unknown_transform_only_rejected() {
    let data = dataset(vec![0.0; 8], 2);
    let config = RunConfig::default().with_transform_only(vec!["nope".to_string()]);
    let err = cluster(&data, config).unwrap_err();
    assert!(matches!(err, ReclusterError::InvalidConfig { .. }));
}

#[test]
fn test_label_length_checked() {
    let data = dataset(vec![0.0; 8], 2);
    let controller = RecursiveClustering::new(RunConfig::default())
        .expect("valid config")
        .with_labels(vec![0, 1]);
    assert!(controller.run(&data).is_err());
}

#[test]
fn test_invalid_config_fails_fast() {
    let config = RunConfig::default().with_popcut(0);
    assert!(RecursiveClustering::new(config).is_err());
}

#[test]
fn test_resume_without_checkpoints_is_corrupt() {
    let dir = tempfile::tempdir().expect("temp dir");
    let data = dataset(vec![0.0; 8], 2);
    let config = RunConfig::default().with_outpath(dir.path());
    let err = resume(&data, config).unwrap_err();
    assert!(matches!(err, ReclusterError::CheckpointCorrupt { .. }));
}

#[test]
fn test_assign_by_neighbors_skips_noise_voters() {
    let reference = Matrix::from_vec(5, 1, vec![0.0, 0.1, 5.0, 5.1, 0.05]).expect("valid");
    let labels = vec![0, 0, 1, 1, NOISE];
    let queries = Matrix::from_vec(2, 1, vec![0.06, 4.9]).expect("valid");

    let without = assign_by_neighbors(&reference, &labels, &queries, 1, Metric::Euclidean, false)
        .expect("assign");
    assert_eq!(without, vec![0, 1]);

    let with = assign_by_neighbors(&reference, &labels, &queries, 1, Metric::Euclidean, true)
        .expect("assign");
    assert_eq!(with, vec![NOISE, 1]);
}

#[test]
fn test_assign_by_neighbors_all_noise() {
    let reference = Matrix::from_vec(2, 1, vec![0.0, 1.0]).expect("valid");
    let queries = Matrix::from_vec(1, 1, vec![0.5]).expect("valid");
    let out = assign_by_neighbors(&reference, &[NOISE, NOISE], &queries, 3, Metric::Euclidean, false)
        .expect("assign");
    assert_eq!(out, vec![NOISE]);
}
