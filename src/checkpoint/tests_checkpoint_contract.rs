// =========================================================================
// FALSIFY-CK: checkpoint persistence and frontier reconstruction
//
// A half-written checkpoint is never loaded, relaxed thresholds re-open
// exactly the children they stopped, and discarded samples stay out.
// =========================================================================

use super::*;
use crate::primitives::Metric;

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn record(name: &str, termination: Termination) -> NodeRecord {
    NodeRecord {
        name: name.to_string(),
        depth: depth_of(name),
        population: 0,
        n_clusters: 2,
        dim: 2,
        score: Some(0.7),
        params: None,
        metric_map: Metric::Euclidean,
        metric_clu: Metric::Euclidean,
        norm: None,
        reassigned: 0,
        noise: 0,
        evaluations: 4,
        seed: 1,
        termination,
    }
}

fn checkpoint(
    name: &str,
    samples: Vec<String>,
    children: Vec<Vec<String>>,
    noise: Vec<String>,
    config: &RunConfig,
) -> NodeCheckpoint {
    let termination = if children.is_empty() {
        Termination::SingleCluster
    } else {
        Termination::None
    };
    NodeCheckpoint {
        manifest: Manifest {
            format_version: FORMAT_VERSION,
            node: name.to_string(),
            depth: depth_of(name),
            termination,
            record: Some(record(name, termination)),
            run_seed: 99,
            config: config.clone(),
        },
        membership: Membership {
            samples,
            children,
            noise,
        },
        stages: None,
    }
}

/// Root of 100 split into 60 / 30 with 10 noise; the 60 child was
/// processed and found to be a single cluster, the 30 child was below popcut.
fn write_run(manager: &CheckpointManager, config: &RunConfig) {
    let a = ids("a", 60);
    let b = ids("b", 30);
    let noise = ids("n", 10);
    let mut all = a.clone();
    all.extend(b.iter().cloned());
    all.extend(noise.iter().cloned());
    manager
        .save(&checkpoint("0", all, vec![a.clone(), b], noise, config))
        .expect("save root");
    manager
        .save(&checkpoint("0_0", a, Vec::new(), Vec::new(), config))
        .expect("save child");
}

/// FALSIFY-CK-001: a relaxed popcut re-opens the stopped child only
#[test]
fn falsify_ck_001_relaxed_popcut_reopens_child() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let strict = RunConfig::default().with_popcut(50);
    write_run(&manager, &strict);

    let still_strict = manager.restore(&strict, &[]).expect("restore");
    assert!(still_strict.frontier.is_empty());
    let stopped = still_strict.tree.find("0_1").expect("child exists");
    assert_eq!(
        still_strict.tree.node(stopped).termination,
        Termination::PopulationFloor
    );

    let relaxed = manager
        .restore(&RunConfig::default().with_popcut(10), &[])
        .expect("restore");
    let reopened: Vec<&str> = relaxed
        .frontier
        .iter()
        .map(|&id| relaxed.tree.node(id).name.as_str())
        .collect();
    assert_eq!(reopened, vec!["0_1"], "FALSIFIED CK-001");
    assert_eq!(relaxed.run_seed, 99);
    assert_eq!(relaxed.records.len(), 2);
}

/// FALSIFY-CK-002: noise stays excluded after a restore
#[test]
fn falsify_ck_002_noise_stays_excluded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default().with_popcut(50);
    write_run(&manager, &config);

    let restored = manager
        .restore(&RunConfig::default().with_popcut(2), &[])
        .expect("restore");
    for (_, node) in restored.tree.iter().filter(|(id, _)| *id != 0) {
        assert!(
            node.samples.iter().all(|s| !s.starts_with('n')),
            "FALSIFIED CK-002: noise sample in {}",
            node.name
        );
    }
    assert_eq!(restored.ledger.members("0_noise").map(|m| m.len()), Some(10));
    assert!(restored.tree.is_partitioned(0));
}

/// FALSIFY-CK-003: asking for noise back is an unrecoverable discard
#[test]
fn falsify_ck_003_noise_resurrection_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default();
    write_run(&manager, &config);

    for name in ["0_noise", "0_5"] {
        let err = manager
            .restore(&config, &[name.to_string()])
            .unwrap_err();
        assert!(
            matches!(err, ReclusterError::UnrecoverableDiscard { .. }),
            "FALSIFIED CK-003: {name} gave {err}"
        );
    }
}

/// FALSIFY-CK-004: a forced node enters the frontier despite thresholds
#[test]
fn falsify_ck_004_forced_expansion() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default().with_popcut(50);
    write_run(&manager, &config);

    let restored = manager
        .restore(&config, &["0_1".to_string()])
        .expect("restore");
    assert_eq!(restored.frontier.len(), 1);
}

/// FALSIFY-CK-005: partial writes are invisible
#[test]
fn falsify_ck_005_partial_write_invisible() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default();
    write_run(&manager, &config);

    // An interrupted write leaves only a staging directory behind
    let staging = manager.dir().join(".tmp-0_1-4242");
    std::fs::create_dir_all(&staging).expect("mkdir");
    std::fs::write(staging.join("stages.json"), "null").expect("write");

    let loaded = manager.load_all().expect("load");
    assert_eq!(loaded.len(), 2);
    assert!(!staging.exists(), "staging directory is cleaned up");
    assert!(!manager.contains("0_1"));
}

/// FALSIFY-CK-006: a replacement interrupted between its two renames
/// keeps the previous checkpoint
#[test]
fn falsify_ck_006_interrupted_replacement_restores_previous() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default();
    write_run(&manager, &config);

    // The live directory was retired and the staged one never moved in
    let retired = manager.dir().join(".old-0_0-4242");
    std::fs::rename(manager.dir().join("0_0"), &retired).expect("retire");
    let staging = manager.dir().join(".tmp-0_0-4242");
    std::fs::create_dir_all(&staging).expect("mkdir");
    std::fs::write(staging.join("stages.json"), "null").expect("write");

    let loaded = manager.load_all().expect("load");
    let names: Vec<&str> = loaded.iter().map(|c| c.manifest.node.as_str()).collect();
    assert_eq!(names, vec!["0", "0_0"], "FALSIFIED CK-006: {names:?}");
    assert!(manager.contains("0_0"));
    assert!(!retired.exists());
    assert!(!staging.exists());

    let restored = manager
        .restore(&RunConfig::default().with_popcut(10), &[])
        .expect("restore");
    assert_eq!(restored.records.len(), 2);
}

#[test]
fn test_retired_checkpoint_dropped_when_replaced() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    write_run(&manager, &RunConfig::default());

    // The new checkpoint landed before the old one was removed
    let retired = manager.dir().join(".old-0_0-4242");
    std::fs::create_dir_all(&retired).expect("mkdir");
    std::fs::copy(
        manager.dir().join("0_0").join("manifest.json"),
        retired.join("manifest.json"),
    )
    .expect("copy");

    let loaded = manager.load_all().expect("load");
    assert_eq!(loaded.len(), 2);
    assert!(!retired.exists());
}

#[test]
fn test_missing_directory_is_corrupt() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let err = manager.load_all().unwrap_err();
    assert!(matches!(err, ReclusterError::CheckpointCorrupt { .. }));
}

#[test]
fn test_missing_file_is_corrupt() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    write_run(&manager, &RunConfig::default());
    std::fs::remove_file(manager.dir().join("0_0").join("membership.json")).expect("rm");
    let err = manager.load("0_0").unwrap_err();
    assert!(matches!(err, ReclusterError::CheckpointCorrupt { .. }));
}

#[test]
fn test_save_replaces_existing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    let config = RunConfig::default();
    manager
        .save(&checkpoint("0", ids("s", 3), Vec::new(), Vec::new(), &config))
        .expect("first save");
    manager
        .save(&checkpoint("0", ids("s", 4), Vec::new(), Vec::new(), &config))
        .expect("second save");
    let loaded = manager.load("0").expect("load");
    assert_eq!(loaded.membership.samples.len(), 4);
}

#[test]
fn test_incompatible_pipeline_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = CheckpointManager::new(dir.path());
    write_run(&manager, &RunConfig::default());
    let err = manager
        .restore(&RunConfig::default().with_dim(3), &[])
        .unwrap_err();
    assert!(err.to_string().contains("different pipeline"));
}

#[test]
fn test_maxdepth_termination_wins() {
    let config = RunConfig::default().with_popcut(50).with_maxdepth(Some(1));
    assert_eq!(threshold_termination(&config, 1, 10), Termination::MaxDepth);
    assert_eq!(threshold_termination(&config, 0, 10), Termination::PopulationFloor);
    assert_eq!(threshold_termination(&config, 0, 60), Termination::None);
}
