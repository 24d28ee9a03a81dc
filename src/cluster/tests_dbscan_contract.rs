// =========================================================================
// FALSIFY-DB: DBSCAN clustering contract
//
// References:
//   - Ester et al. (1996) "A Density-Based Algorithm for Discovering Clusters"
// =========================================================================

use super::*;
use crate::primitives::Matrix;
use crate::traits::UnsupervisedEstimator;

/// FALSIFY-DB-001: Noise points are labeled -1
#[test]
fn falsify_db_001_noise_labeled_negative_one() {
    let data = Matrix::from_vec(
        7,
        2,
        vec![
            1.0, 1.0, 1.1, 1.1, 1.2, 1.0, 5.0, 5.0, 5.1, 5.1, 5.0, 5.2, 99.0, 99.0, // outlier
        ],
    )
    .expect("valid matrix");

    let mut dbscan = Dbscan::new(0.5, 2);
    dbscan.fit(&data).expect("fit succeeds");

    let labels = dbscan.labels().expect("fitted");
    assert_eq!(
        labels[6], -1,
        "FALSIFIED DB-001: outlier label={}, expected -1",
        labels[6]
    );
}

/// FALSIFY-DB-002: Two well-separated clusters get distinct labels
#[test]
fn falsify_db_002_distinct_clusters() {
    let data = Matrix::from_vec(
        6,
        2,
        vec![
            0.0, 0.0, 0.1, 0.1, 0.2, 0.0, 10.0, 10.0, 10.1, 10.1, 10.0, 10.2,
        ],
    )
    .expect("valid matrix");

    let mut dbscan = Dbscan::new(0.5, 2);
    dbscan.fit(&data).expect("fit succeeds");

    let labels = dbscan.predict(&data);
    assert_eq!(labels[0], labels[1]);
    assert_eq!(labels[1], labels[2]);
    assert_eq!(labels[3], labels[4]);
    assert_ne!(
        labels[0], labels[3],
        "FALSIFIED DB-002: separated groups share label {}",
        labels[0]
    );
}

/// FALSIFY-DB-003: Border points join the cluster of a reachable core point
#[test]
fn falsify_db_003_border_point_joins_cluster() {
    // Point 3 has only one neighbour but sits within eps of core point 2
    let data = Matrix::from_vec(4, 1, vec![0.0, 0.1, 0.2, 0.6]).expect("valid matrix");

    let mut dbscan = Dbscan::new(0.45, 3);
    dbscan.fit(&data).expect("fit succeeds");

    assert_eq!(dbscan.labels().expect("fitted"), &[0, 0, 0, 0]);
}

/// FALSIFY-DB-004: Cosine metric groups rows by direction, not magnitude
#[test]
fn falsify_db_004_cosine_metric() {
    let data = Matrix::from_vec(
        4,
        2,
        vec![1.0, 0.0, 100.0, 1.0, 0.0, 1.0, 1.0, 100.0],
    )
    .expect("valid matrix");

    let mut dbscan = Dbscan::new(0.01, 2).with_metric(Metric::Cosine);
    dbscan.fit(&data).expect("fit succeeds");

    let labels = dbscan.labels().expect("fitted");
    assert_eq!(labels[0], labels[1]);
    assert_eq!(labels[2], labels[3]);
    assert_ne!(labels[0], labels[2]);
}

/// FALSIFY-DB-005: Non-positive radius is a stage failure, not a panic
#[test]
fn falsify_db_005_invalid_radius_fails() {
    let data = Matrix::from_vec(2, 1, vec![0.0, 1.0]).expect("valid matrix");
    assert!(Dbscan::new(0.0, 2).fit(&data).is_err());
    assert!(Dbscan::new(f32::NAN, 2).fit(&data).is_err());
    assert!(Dbscan::new(0.5, 2).labels().is_none());
}
