//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rand::prelude::*;
use recluster::prelude::*;

/// Uniform square blobs of the given sizes, centered on the diagonal
/// 12 units apart. Sample ids are `<prefix><row>`.
pub fn blobs(sizes: &[usize], prefix: &str, seed: u64) -> Dataset {
    let groups: Vec<(f32, usize)> = sizes
        .iter()
        .enumerate()
        .map(|(b, &size)| (12.0 * b as f32, size))
        .collect();
    blobs_at(&groups, prefix, seed)
}

/// Uniform 2x2 square blobs given as `(diagonal center, size)` pairs.
pub fn blobs_at(groups: &[(f32, usize)], prefix: &str, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Vec::new();
    for &(center, size) in groups {
        for _ in 0..size {
            values.push(center + rng.gen_range(-1.0..1.0));
            values.push(center + rng.gen_range(-1.0..1.0));
        }
    }
    let n: usize = groups.iter().map(|g| g.1).sum();
    let matrix = Matrix::from_vec(n, 2, values).expect("sizes match");
    Dataset::new(
        (0..n).map(|i| format!("{prefix}{i}")).collect(),
        vec!["f0".to_string(), "f1".to_string()],
        matrix,
    )
    .expect("valid dataset")
}

/// Gaussian blobs (unit standard deviation) of the given sizes, centered
/// on the diagonal 10 units apart. Sample ids are `<prefix><row>`.
pub fn gaussian_blobs(sizes: &[usize], prefix: &str, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    // Box-Muller
    let mut normal = move || {
        let u: f32 = rng.gen_range(f32::EPSILON..1.0);
        let v: f32 = rng.gen_range(0.0..1.0);
        (-2.0 * u.ln()).sqrt() * (2.0 * std::f32::consts::PI * v).cos()
    };
    let mut values = Vec::new();
    for (b, &size) in sizes.iter().enumerate() {
        let center = 10.0 * b as f32;
        for _ in 0..size {
            values.push(center + normal());
            values.push(center + normal());
        }
    }
    let n: usize = sizes.iter().sum();
    let matrix = Matrix::from_vec(n, 2, values).expect("sizes match");
    Dataset::new(
        (0..n).map(|i| format!("{prefix}{i}")).collect(),
        vec!["f0".to_string(), "f1".to_string()],
        matrix,
    )
    .expect("valid dataset")
}

/// Every split node of `run` is partitioned by its children and noise.
pub fn assert_partitioned(run: &ClusteringRun) {
    for (id, node) in run.tree.iter() {
        assert!(run.tree.is_partitioned(id), "{} is not partitioned", node.name);
    }
    assert!(run.ledger.validate().is_ok());
}

/// Routes run logs through the test harness; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Grid settings that keep a node's search small.
pub fn quick_config(min_cluster_size: usize, popcut: usize) -> RunConfig {
    init_tracing();
    RunConfig::default()
        .with_cutoff(Tunable::fixed(0.9))
        .with_neighbors(Tunable::fixed(8.0))
        .with_cluster_param(Tunable::auto(4))
        .with_min_cluster_size(min_cluster_size)
        .with_popcut(popcut)
        .with_seed(7)
}

/// Name of the child column holding `sample` at depth 1.
pub fn depth_one_column(run: &ClusteringRun, sample: &str) -> Option<String> {
    run.ledger
        .path(sample)
        .first()
        .map(|column| column.to_string())
}
