// Contract tests for label post-processing and the configured identifier.

use super::*;

#[test]
fn test_relabel_first_appearance() {
    assert_eq!(relabel(&[5, 5, -1, 2, 5, 2, 9]), vec![0, 0, -1, 1, 0, 1, 2]);
}

#[test]
fn test_dissolve_small_clusters() {
    let labels = [0, 0, 0, 1, 1, 2, 2, 2, -1];
    assert_eq!(dissolve_small(&labels, 3), vec![0, 0, 0, -1, -1, 1, 1, 1, -1]);
}

#[test]
fn test_cluster_sizes_and_count() {
    let labels = [1, 0, 1, -1, 1];
    assert_eq!(cluster_sizes(&labels), vec![(0, 1), (1, 3)]);
    assert_eq!(n_clusters(&labels), 2);
    assert_eq!(n_clusters(&[-1, -1]), 0);
}

#[test]
fn test_identifier_dissolves_below_min_cluster_size() {
    // Two groups of 4 and one group of 2
    let data = Matrix::from_vec(
        10,
        1,
        vec![0.0, 0.1, 0.2, 0.3, 5.0, 5.1, 9.0, 9.1, 9.2, 9.3],
    )
    .expect("matrix");
    let mut identifier = ClusterIdentifier::new(ClusterKind::Dbscan, 0.5, 2);
    let loose = identifier.identify(&data).expect("labels");
    assert_eq!(n_clusters(&loose), 3);

    let mut identifier = ClusterIdentifier::new(ClusterKind::Dbscan, 0.5, 3);
    let strict = identifier.identify(&data).expect("labels");
    assert_eq!(strict, vec![0, 0, 0, 0, -1, -1, 1, 1, 1, 1]);
    assert_eq!(identifier.labels(), Some(&strict[..]));
}

#[test]
fn test_hdbscan_identifier_finds_groups() {
    let mut rows = Vec::new();
    for i in 0..12 {
        rows.push(i as f32 * 0.01);
        rows.push(0.0);
    }
    for i in 0..12 {
        rows.push(50.0 + i as f32 * 0.01);
        rows.push(50.0);
    }
    let data = Matrix::from_vec(24, 2, rows).expect("matrix");
    let mut identifier = ClusterIdentifier::new(ClusterKind::Hdbscan, 5.0, 5);
    let labels = identifier.identify(&data).expect("labels");
    assert_eq!(n_clusters(&labels), 2);
    assert!(labels[5] >= 0 && labels[17] >= 0);
    assert_ne!(labels[5], labels[17]);
}

#[test]
fn test_hdbscan_rejects_oversized_parameter() {
    let data = Matrix::from_vec(3, 1, vec![0.0, 1.0, 2.0]).expect("matrix");
    let mut identifier = ClusterIdentifier::new(ClusterKind::Hdbscan, 10.0, 2);
    assert!(identifier.identify(&data).is_err());
}

#[test]
fn test_k_distances_sorted() {
    let data = Matrix::from_vec(4, 1, vec![0.0, 1.0, 3.0, 6.0]).expect("matrix");
    assert_eq!(k_distances(&data, 1, Metric::Euclidean), vec![1.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_relative_radius_spans_floor_to_ceiling() {
    let sorted: Vec<f32> = (0..=100).map(|i| i as f32).collect();
    assert!((relative_radius(&sorted, 0.0) - 75.0).abs() < 1e-9);
    assert!((relative_radius(&sorted, 1.0) - 200.0).abs() < 1e-9);
    // Geometric midpoint
    assert!((relative_radius(&sorted, 0.5) - (75.0_f64 * 200.0).sqrt()).abs() < 1e-9);
    assert!((relative_radius(&sorted, 7.0) - 200.0).abs() < 1e-9);
}

#[test]
fn test_relative_radius_degenerate_inputs() {
    assert!(relative_radius(&[0.0, 0.0], 0.5) > 0.0);
    assert_eq!(relative_radius(&[], 0.5), 0.0);
}

#[test]
fn test_relative_radius_ceiling_bridges_mode_gap() {
    // Two runs with unit spacing, 2 apart; every k = 1 distance is 1
    let data = Matrix::from_vec(8, 1, vec![0.0, 1.0, 2.0, 3.0, 5.0, 6.0, 7.0, 8.0])
        .expect("matrix");
    let sorted = k_distances(&data, 1, Metric::Euclidean);
    let mut identifier =
        ClusterIdentifier::new(ClusterKind::Dbscan, relative_radius(&sorted, 0.0), 2);
    assert_eq!(n_clusters(&identifier.identify(&data).expect("identify")), 2);
    let mut identifier =
        ClusterIdentifier::new(ClusterKind::Dbscan, relative_radius(&sorted, 1.0), 2);
    assert_eq!(n_clusters(&identifier.identify(&data).expect("identify")), 1);
}
