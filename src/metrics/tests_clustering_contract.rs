// =========================================================================
// FALSIFY-CL: clustering score contract
//
// References:
//   - Rousseeuw (1987) "Silhouettes: a graphical aid to the interpretation
//     and validation of cluster analysis"
//   - Dunn (1973) "A Fuzzy Relative of the ISODATA Process"
// =========================================================================

use super::*;

fn two_groups() -> Matrix<f32> {
    Matrix::from_vec(
        6,
        2,
        vec![0.0, 0.0, 0.1, 0.0, 0.0, 0.1, 5.0, 5.0, 5.1, 5.0, 5.0, 5.1],
    )
    .expect("valid matrix")
}

/// FALSIFY-CL-001: Well-separated groups score close to 1
#[test]
fn falsify_cl_001_separated_groups_high_silhouette() {
    let score = silhouette_score(&two_groups(), &[0, 0, 0, 1, 1, 1], Metric::Euclidean);
    assert!(score > 0.9, "FALSIFIED CL-001: silhouette = {score}");
}

/// FALSIFY-CL-002: Silhouette stays within [-1, 1] and is negative for swapped labels
#[test]
fn falsify_cl_002_swapped_labels_negative() {
    // Each label pairs one point of each group
    let data = Matrix::from_vec(4, 2, vec![0.0, 0.0, 0.0, 0.1, 5.0, 5.0, 5.0, 5.1])
        .expect("valid matrix");
    let score = silhouette_score(&data, &[0, 1, 0, 1], Metric::Euclidean);
    assert!((-1.0..-0.3).contains(&score), "FALSIFIED CL-002: silhouette = {score}");
}

/// FALSIFY-CL-003: A single group scores 0
#[test]
fn falsify_cl_003_single_group_zero() {
    assert_eq!(silhouette_score(&two_groups(), &[0; 6], Metric::Euclidean), 0.0);
    assert_eq!(dunn_index(&two_groups(), &[0; 6], Metric::Euclidean), 0.0);
}

/// FALSIFY-CL-004: Noise is scored as its own group
#[test]
fn falsify_cl_004_noise_is_a_group() {
    // All noise but one cluster: two groups, the noise one being spread out
    let labels = [0, 0, 0, -1, -1, -1];
    let with_noise = silhouette_score(&two_groups(), &labels, Metric::Euclidean);
    assert!(with_noise > 0.9);

    // Mixing noise into a cluster's territory lowers the score
    let mixed = [0, 0, -1, 1, 1, -1];
    assert!(silhouette_score(&two_groups(), &mixed, Metric::Euclidean) < with_noise);
}

/// FALSIFY-CL-005: Dunn index is the gap over the diameter and ignores noise
#[test]
fn falsify_cl_005_dunn_index() {
    let data = Matrix::from_vec(5, 1, vec![0.0, 1.0, 5.0, 6.0, 100.0]).expect("valid matrix");
    let d = dunn_index(&data, &[0, 0, 1, 1, -1], Metric::Euclidean);
    assert!((d - 4.0).abs() < 1e-9, "FALSIFIED CL-005: dunn = {d}");
}

/// FALSIFY-CL-006: The evaluator dispatches on the score family
#[test]
fn falsify_cl_006_evaluator_dispatch() {
    let labels = [0, 0, 0, 1, 1, 1];
    let data = two_groups();
    let sil = ScoreEvaluator::new(ScoreKind::Silhouette, Metric::Euclidean);
    let dunn = ScoreEvaluator::new(ScoreKind::Dunn, Metric::Euclidean);
    assert_eq!(sil.score(&data, &labels), silhouette_score(&data, &labels, Metric::Euclidean));
    assert_eq!(dunn.score(&data, &labels), dunn_index(&data, &labels, Metric::Euclidean));
    assert_eq!(dunn.kind(), ScoreKind::Dunn);
}
