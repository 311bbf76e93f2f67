mod common;

use approx::assert_abs_diff_eq;
use common::{max_point_error, Scene};
use ndarray::Array2;
use so2_camera::*;
use std::path::Path;
use tempfile::tempdir;

const SHAPE: (usize, usize) = (96, 96);

fn dynamic_range(image: &Array2<u16>) -> f64 {
    let max = *image.iter().max().unwrap() as f64;
    let min = *image.iter().min().unwrap() as f64;
    max - min
}

#[test]
fn test_identical_images_give_identity() {
    let scene = Scene::random(7, SHAPE.0);
    let image = scene.render(SHAPE, &Transform::identity());

    let alignment = EccAligner::new().estimate(&image, &image).unwrap();
    assert!(max_point_error(&alignment.transform, &Transform::identity(), SHAPE) < 1e-3);
    assert!(alignment.correlation > 0.9999);
    assert!(alignment.converged);
}

#[test]
fn test_round_trip_rotation_and_translation() {
    let scene = Scene::random(42, SHAPE.0);
    let center = (SHAPE.1 as f64 / 2.0, SHAPE.0 as f64 / 2.0);
    let motion = Transform::translation(3.0, -2.0).compose(&Transform::rotation_about(center, 5.0));

    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &motion);

    let alignment = EccAligner::new()
        .with_motion_type(MotionType::Euclidean)
        .estimate(&reference, &moving)
        .unwrap();

    let expected = motion.inverse().unwrap();
    let error = max_point_error(&alignment.transform, &expected, SHAPE);
    assert!(error < 0.5, "point error {} px, got {:?}", error, alignment.transform);
    // the estimate undoes the motion, so its rotation is the opposite of `motion`'s
    assert_abs_diff_eq!(motion.rotation_degrees(), -5.0, epsilon = 1e-9);
    assert_abs_diff_eq!(
        alignment.transform.rotation_degrees(),
        expected.rotation_degrees(),
        epsilon = 0.1
    );
    assert_abs_diff_eq!(alignment.transform.rotation_degrees(), 5.0, epsilon = 0.1);

    let aligned: Array2<u16> = warp(&moving, &alignment.transform, SHAPE).unwrap();
    let mae = mean_absolute_error(&aligned, &reference, 12).unwrap();
    assert!(mae < 0.01 * dynamic_range(&reference), "mae {}", mae);
}

#[test]
fn test_translation_via_free_function() {
    let scene = Scene::random(3, SHAPE.0);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &Transform::translation(-2.5, 1.25));

    let transform = estimate(&reference, &moving, MotionType::Translation, 100, 1e-8).unwrap();
    let (dx, dy) = transform.offset();
    assert_abs_diff_eq!(dx, 2.5, epsilon = 0.1);
    assert_abs_diff_eq!(dy, -1.25, epsilon = 0.1);
    assert_eq!(transform.matrix[0][0], 1.0);
    assert_eq!(transform.matrix[0][1], 0.0);
}

#[test]
fn test_affine_recovers_mild_shear() {
    let scene = Scene::random(11, SHAPE.0);
    let motion = Transform::new([[1.02, 0.01, 1.5], [-0.015, 0.99, -1.0]]);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &motion);

    let alignment = EccAligner::new()
        .with_motion_type(MotionType::Affine)
        .estimate(&reference, &moving)
        .unwrap();
    let error = max_point_error(&alignment.transform, &motion.inverse().unwrap(), SHAPE);
    assert!(error < 0.5, "point error {} px", error);
}

#[test]
fn test_shape_mismatch() {
    let reference = Array2::<u16>::zeros((32, 32));
    let moving = Array2::<u16>::zeros((32, 40));
    let result = EccAligner::new().estimate(&reference, &moving);
    assert_eq!(
        result.unwrap_err(),
        AlignError::ShapeMismatch {
            reference: (32, 32),
            moving: (32, 40),
        }
    );
}

#[test]
fn test_flat_images_fail_to_converge() {
    let flat = Array2::from_elem((32, 32), 12_000u16);
    match EccAligner::new().estimate(&flat, &flat) {
        Err(AlignError::ConvergenceFailure {
            iterations,
            last_estimate,
            ..
        }) => {
            assert_eq!(iterations, 0);
            assert!(last_estimate.is_none());
        }
        other => panic!("expected ConvergenceFailure, got {:?}", other),
    }
}

#[test]
fn test_correlation_does_not_decrease() {
    let scene = Scene::random(5, SHAPE.0);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &Transform::euclidean(0.02, 1.5, -1.0));

    let alignment = EccAligner::new().estimate(&reference, &moving).unwrap();
    let trace = &alignment.correlation_trace;
    assert!(trace.len() >= 2);
    assert_eq!(trace.len(), alignment.iterations);
    for pair in trace.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-6, "correlation dropped: {:?}", pair);
    }
    assert!(*trace.last().unwrap() > 0.99);
}

#[test]
fn test_iteration_limit_is_not_an_error() {
    let scene = Scene::random(9, SHAPE.0);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &Transform::translation(1.0, 1.0));

    let alignment = EccAligner::new()
        .with_max_iterations(1)
        .estimate(&reference, &moving)
        .unwrap();
    assert_eq!(alignment.iterations, 1);
    assert!(!alignment.converged);
}

#[test]
fn test_gain_change_gives_same_transform() {
    let scene = Scene::random(21, SHAPE.0);
    // half scale so that doubling stays inside u16
    let half = |image: Array2<u16>| image.mapv(|v| v / 2);
    let reference = half(scene.render(SHAPE, &Transform::identity()));
    let moving = half(scene.render(SHAPE, &Transform::euclidean(-0.03, -1.0, 2.0)));

    let aligner = EccAligner::new();
    let base = aligner.estimate(&reference, &moving).unwrap();

    let brighter = |image: &Array2<u16>| image.mapv(|v| v * 2);
    let doubled = aligner
        .estimate(&brighter(&reference), &brighter(&moving))
        .unwrap();

    assert_eq!(aligner.rescale_factor(), 256.0);
    let error = max_point_error(&base.transform, &doubled.transform, SHAPE);
    assert!(error < 0.05, "gain change moved the estimate by {} px", error);
}

#[test]
fn test_matching_bit_depth_cancels_wider_samples() {
    let scene = Scene::random(21, SHAPE.0);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &Transform::euclidean(-0.03, -1.0, 2.0));
    let base = EccAligner::new().estimate(&reference, &moving).unwrap();

    let reference2 = reference.mapv(|v| v as u32 * 2);
    let moving2 = moving.mapv(|v| v as u32 * 2);
    let wide = EccAligner::new()
        .with_source_bit_depth(17)
        .estimate(&reference2, &moving2)
        .unwrap();

    assert!(max_point_error(&base.transform, &wide.transform, SHAPE) < 1e-9);
    assert_eq!(base.iterations, wide.iterations);
}

#[test]
fn test_depth_normalization_is_floor_division() {
    let image = Array2::from_shape_fn((4, 4), |(r, c)| (r * 16000 + c * 300 + 255) as u16);
    let scaled = normalize_depth(&image, 256.0);
    for (v, s) in image.iter().zip(scaled.iter()) {
        assert_eq!(*s as u16, v / 256);
    }
}

#[test]
fn test_initial_transform_is_refined() {
    let scene = Scene::random(13, SHAPE.0);
    let reference = scene.render(SHAPE, &Transform::identity());
    let moving = scene.render(SHAPE, &Transform::translation(6.0, -5.0));

    let alignment = EccAligner::new()
        .with_motion_type(MotionType::Translation)
        .with_initial_transform(Transform::translation(-5.0, 4.0))
        .estimate(&reference, &moving)
        .unwrap();
    let (dx, dy) = alignment.transform.offset();
    assert_abs_diff_eq!(dx, -6.0, epsilon = 0.1);
    assert_abs_diff_eq!(dy, 5.0, epsilon = 0.1);
}

fn save_8_bit(path: &Path, image: &Array2<u16>) {
    let (rows, cols) = image.dim();
    image::GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        image::Luma([(image[[y as usize, x as usize]] / 256).min(255) as u8])
    })
    .save(path)
    .unwrap();
}

#[test]
fn test_align_files_uses_native_depth_of_8_bit_pair() {
    let dir = tempdir().unwrap();
    let scene = Scene::random(31, SHAPE.0);
    let reference_path = dir.path().join("reference.png");
    let moving_path = dir.path().join("moving.png");
    save_8_bit(&reference_path, &scene.render(SHAPE, &Transform::identity()));
    save_8_bit(&moving_path, &scene.render(SHAPE, &Transform::translation(1.0, 0.5)));

    let aligner = EccAligner::new().with_motion_type(MotionType::Translation);
    let aligned = align_files(&reference_path, &moving_path, aligner.clone(), None).unwrap();
    assert_eq!(aligned.bit_depth, 8);
    assert_eq!(aligned.reference.bit_depth, 8);
    let (dx, dy) = aligned.result.translation;
    assert_abs_diff_eq!(dx, -1.0, epsilon = 0.15);
    assert_abs_diff_eq!(dy, -0.5, epsilon = 0.15);

    // forcing a 16-bit factor floors every 8-bit sample to zero
    let forced = align_files(&reference_path, &moving_path, aligner, Some(16)).unwrap_err();
    assert!(matches!(
        forced.downcast_ref::<AlignError>(),
        Some(AlignError::ConvergenceFailure { .. })
    ));
}
