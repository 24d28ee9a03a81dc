// =========================================================================
// FALSIFY-KNN: nearest-neighbour projection onto fitted clusters
//
// References:
//   - Cover & Hart (1967) "Nearest Neighbor Pattern Classification"
//   - Dudani (1976) "The Distance-Weighted k-Nearest-Neighbor Rule"
// =========================================================================

use super::*;
use crate::primitives::Matrix;

/// FALSIFY-KNN-001: Predictions in training label set
#[test]
fn falsify_knn_001_predictions_in_label_range() {
    let x = Matrix::from_vec(6, 2, vec![
        0.0, 0.0, 0.5, 0.5, 1.0, 0.0,
        5.0, 5.0, 5.5, 5.5, 6.0, 5.0,
    ]).expect("valid");
    let y = vec![0_usize, 0, 0, 1, 1, 1];

    let mut knn = KNearestNeighbors::new(3);
    knn.fit(&x, &y).expect("fit");

    let preds = knn.predict(&x).expect("predict");
    for (i, &p) in preds.iter().enumerate() {
        assert!(
            p <= 1,
            "FALSIFIED KNN-001: prediction[{i}] = {p}, not in {{0, 1}}"
        );
    }
}

/// FALSIFY-KNN-002: Prediction count matches input count
#[test]
fn falsify_knn_002_prediction_count() {
    let x = Matrix::from_vec(6, 2, vec![
        0.0, 0.0, 0.5, 0.5, 1.0, 0.0,
        5.0, 5.0, 5.5, 5.5, 6.0, 5.0,
    ]).expect("valid");
    let y = vec![0_usize, 0, 0, 1, 1, 1];

    let mut knn = KNearestNeighbors::new(3);
    knn.fit(&x, &y).expect("fit");

    let x_test = Matrix::from_vec(3, 2, vec![0.2, 0.2, 3.0, 3.0, 5.8, 5.8]).expect("valid");
    let preds = knn.predict(&x_test).expect("predict");
    assert_eq!(preds.len(), 3, "FALSIFIED KNN-002: {} predictions for 3 inputs", preds.len());
}

/// FALSIFY-KNN-003: Well-separated clusters classified correctly
#[test]
fn falsify_knn_003_separable_data() {
    let x = Matrix::from_vec(6, 2, vec![
        0.0, 0.0, 0.1, 0.1, 0.2, 0.2,
        100.0, 100.0, 100.1, 100.1, 100.2, 100.2,
    ]).expect("valid");
    let y = vec![0_usize, 0, 0, 1, 1, 1];

    let mut knn = KNearestNeighbors::new(3);
    knn.fit(&x, &y).expect("fit");

    let preds = knn.predict(&x).expect("predict");
    assert_eq!(
        preds, y,
        "FALSIFIED KNN-003: KNN cannot classify well-separated clusters"
    );
}

/// FALSIFY-KNN-004: Deterministic predictions
#[test]
fn falsify_knn_004_deterministic() {
    let x = Matrix::from_vec(4, 2, vec![
        0.0, 0.0, 1.0, 1.0, 5.0, 5.0, 6.0, 6.0,
    ]).expect("valid");
    let y = vec![0_usize, 0, 1, 1];

    let mut knn = KNearestNeighbors::new(1);
    knn.fit(&x, &y).expect("fit");

    let p1 = knn.predict(&x).expect("predict 1");
    let p2 = knn.predict(&x).expect("predict 2");
    assert_eq!(p1, p2, "FALSIFIED KNN-004: predictions differ on same input");
}

/// FALSIFY-KNN-005: Probabilities form a distribution over classes
#[test]
fn falsify_knn_005_proba_sums_to_one() {
    let x = Matrix::from_vec(6, 1, vec![0.0, 0.1, 0.2, 5.0, 5.1, 5.2]).expect("valid");
    let y = vec![0_usize, 0, 2, 1, 1, 2];

    let mut knn = KNearestNeighbors::new(4).with_weights(true);
    knn.fit(&x, &y).expect("fit");
    assert_eq!(knn.n_classes(), 3);

    let q = Matrix::from_vec(2, 1, vec![0.05, 4.0]).expect("valid");
    for row in knn.predict_proba(&q).expect("proba") {
        assert_eq!(row.len(), 3);
        let total: f32 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-5, "FALSIFIED KNN-005: sum = {total}");
        assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }
}

/// FALSIFY-KNN-006: Inverse-distance weighting favours the closer class
#[test]
fn falsify_knn_006_weighting_breaks_majority() {
    // Query at 0.0: one class-0 row at distance 0.1, two class-1 rows at 3.0
    let x = Matrix::from_vec(3, 1, vec![0.1, 3.0, -3.0]).expect("valid");
    let y = vec![0_usize, 1, 1];
    let q = Matrix::from_vec(1, 1, vec![0.0]).expect("valid");

    let mut uniform = KNearestNeighbors::new(3);
    uniform.fit(&x, &y).expect("fit");
    assert_eq!(uniform.predict(&q).expect("predict"), vec![1]);

    let mut weighted = KNearestNeighbors::new(3).with_weights(true);
    weighted.fit(&x, &y).expect("fit");
    assert_eq!(
        weighted.predict(&q).expect("predict"),
        vec![0],
        "FALSIFIED KNN-006: distance weighting ignored"
    );
}

/// FALSIFY-KNN-007: k larger than the reference set is capped
#[test]
fn falsify_knn_007_k_capped() {
    let x = Matrix::from_vec(2, 1, vec![0.0, 1.0]).expect("valid");
    let mut knn = KNearestNeighbors::new(10);
    knn.fit(&x, &[0, 1]).expect("fit");
    let proba = knn
        .predict_proba(&Matrix::from_vec(1, 1, vec![0.0]).expect("valid"))
        .expect("proba");
    assert!((proba[0][0] - 0.5).abs() < 1e-6);
}

#[test]
fn test_predict_before_fit_errors() {
    let knn = KNearestNeighbors::new(1);
    let x = Matrix::from_vec(1, 1, vec![0.0]).expect("valid");
    assert!(knn.predict(&x).is_err());
}

#[test]
fn test_feature_mismatch_errors() {
    let x = Matrix::from_vec(2, 2, vec![0.0, 0.0, 1.0, 1.0]).expect("valid");
    let mut knn = KNearestNeighbors::new(1);
    knn.fit(&x, &[0, 1]).expect("fit");
    let q = Matrix::from_vec(1, 3, vec![0.0, 0.0, 0.0]).expect("valid");
    assert!(knn.predict(&q).is_err());
}

#[test]
fn test_fit_rejects_label_count() {
    let x = Matrix::from_vec(2, 1, vec![0.0, 1.0]).expect("valid");
    let mut knn = KNearestNeighbors::new(1);
    assert!(knn.fit(&x, &[0]).is_err());
}
