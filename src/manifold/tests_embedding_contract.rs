// Contract tests for the neighbour-graph embedding.

use super::*;

/// Two 3-D blobs of `per_blob` samples centred at 0 and 30.
fn blobs(per_blob: usize, seed: u64) -> Matrix<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(2 * per_blob * 3);
    for blob in 0..2 {
        let center = blob as f32 * 30.0;
        for _ in 0..per_blob {
            for _ in 0..3 {
                rows.push(center + rng.gen_range(-1.0..1.0));
            }
        }
    }
    Matrix::from_vec(2 * per_blob, 3, rows).expect("matrix")
}

fn centroid(m: &Matrix<f32>, rows: std::ops::Range<usize>) -> Vec<f32> {
    let n = rows.len() as f32;
    let mut c = vec![0.0; m.n_cols()];
    for i in rows {
        for (j, v) in c.iter_mut().enumerate() {
            *v += m.get(i, j) / n;
        }
    }
    c
}

#[test]
fn test_curve_fit_matches_reference_shape() {
    let (a, b) = EmbedSettings::default().curve();
    assert!(a > 1.2 && a < 2.0, "a = {a}");
    assert!(b > 0.7 && b < 1.1, "b = {b}");
}

#[test]
fn test_settings_validation() {
    assert!(EmbedSettings::default().validate().is_ok());
    let bad = EmbedSettings {
        min_dist: 2.0,
        ..EmbedSettings::default()
    };
    assert!(bad.validate().is_err());
    let bad = EmbedSettings {
        supervised_weight: 1.5,
        ..EmbedSettings::default()
    };
    assert!(bad.validate().is_err());
}

#[test]
fn test_smooth_knn_hits_target() {
    let distances = [0.5, 1.0, 1.5, 2.0, 3.0];
    let (rho, sigma) = smooth_knn(&distances, 5);
    assert_eq!(rho, 0.5);
    let psum: f32 = distances
        .iter()
        .map(|&d| (-(d - rho).max(0.0) / sigma).exp())
        .sum();
    assert!((psum - 5.0_f32.log2()).abs() < 1e-3);
}

#[test]
fn test_separates_blobs() {
    let data = blobs(20, 1);
    let mut embedder = NeighborEmbedding::new(2, 8).with_random_state(1);
    let y = embedder.fit_transform(&data).expect("embedding");
    assert_eq!(y.shape(), (40, 2));

    let ca = centroid(&y, 0..20);
    let cb = centroid(&y, 20..40);
    let between = Metric::Euclidean.distance(&ca, &cb);
    let spread = (0..40)
        .map(|i| {
            let c = if i < 20 { &ca } else { &cb };
            Metric::Euclidean.distance(y.row(i), c)
        })
        .fold(0.0_f32, f32::max);
    assert!(between > 2.0 * spread, "between {between}, spread {spread}");
}

#[test]
fn test_same_seed_same_layout() {
    let data = blobs(15, 2);
    let a = NeighborEmbedding::new(2, 5)
        .with_random_state(9)
        .fit_transform(&data)
        .expect("embedding");
    let b = NeighborEmbedding::new(2, 5)
        .with_random_state(9)
        .fit_transform(&data)
        .expect("embedding");
    assert_eq!(a, b);
}

#[test]
fn test_transform_places_new_samples_near_their_blob() {
    let data = blobs(20, 3);
    let mut embedder = NeighborEmbedding::new(2, 6).with_random_state(4);
    let y = embedder.fit_transform(&data).expect("embedding");
    let ca = centroid(&y, 0..20);
    let cb = centroid(&y, 20..40);

    let new = Matrix::from_vec(2, 3, vec![0.2, -0.1, 0.3, 29.8, 30.1, 30.2]).expect("matrix");
    let placed = embedder.transform(&new).expect("transform");
    assert!(
        Metric::Euclidean.distance(placed.row(0), &ca)
            < Metric::Euclidean.distance(placed.row(0), &cb)
    );
    assert!(
        Metric::Euclidean.distance(placed.row(1), &cb)
            < Metric::Euclidean.distance(placed.row(1), &ca)
    );
}

#[test]
fn test_supervision_keeps_shape() {
    let data = blobs(10, 5);
    let labels: Vec<i64> = (0..20).map(|i| if i % 2 == 0 { 0 } else { -1 }).collect();
    let y = NeighborEmbedding::new(2, 4)
        .with_random_state(2)
        .with_labels(labels)
        .fit_transform(&data)
        .expect("embedding");
    assert_eq!(y.shape(), (20, 2));
    assert!(y.is_finite());
}

#[test]
fn test_stage_failures() {
    let data = blobs(3, 6);
    let err = NeighborEmbedding::new(2, 6).fit(&data).unwrap_err();
    assert!(matches!(err, ReclusterError::StageFailure { stage: "embed", .. }));

    let err = NeighborEmbedding::new(2, 3)
        .with_labels(vec![0, 1])
        .fit(&data)
        .unwrap_err();
    assert!(matches!(err, ReclusterError::DimensionMismatch { .. }));

    assert!(NeighborEmbedding::new(2, 3).transform(&data).is_err());
}

#[test]
fn test_low_dimensional_input_keeps_linear_layout() {
    let data = Matrix::from_vec(
        6,
        2,
        vec![0.0, 0.0, 1.0, 0.5, 2.0, 1.0, 3.0, 1.0, 10.0, 4.0, 11.0, 5.0],
    )
    .expect("matrix");
    let mut embedder = NeighborEmbedding::new(2, 3).with_random_state(3);
    assert!(!embedder.is_reducing(&data));
    let y = embedder.fit_transform(&data).expect("embedding");

    // A rotation and a uniform scale: distance ratios survive
    let ratio = |m: &Matrix<f32>, (a, b): (usize, usize), (c, d): (usize, usize)| {
        Metric::Euclidean.distance(m.row(a), m.row(b))
            / Metric::Euclidean.distance(m.row(c), m.row(d))
    };
    for (pair, reference) in [((0, 1), (0, 5)), ((2, 3), (1, 4)), ((4, 5), (0, 3))] {
        let expected = ratio(&data, pair, reference);
        let got = ratio(&y, pair, reference);
        assert!((expected - got).abs() < 1e-3, "{expected} vs {got}");
    }
}

#[test]
fn test_reducing_input_is_optimized() {
    let data = blobs(10, 8);
    let embedder = NeighborEmbedding::new(2, 4);
    assert!(embedder.is_reducing(&data));
}
