use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;

use so2_camera::{warp, EccAligner, MotionType, Transform};

fn textured(size: usize, shift: (f64, f64)) -> Array2<u16> {
    Array2::from_shape_fn((size, size), |(r, c)| {
        let x = c as f64 + shift.0;
        let y = r as f64 + shift.1;
        (20_000.0 + 8_000.0 * (x / 7.0).sin() * (y / 11.0).cos() + 5_000.0 * ((x + y) / 13.0).sin())
            as u16
    })
}

fn bench_ecc_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("ecc_estimate");
    group.sample_size(10);

    for size in [64, 128, 256] {
        let reference = textured(size, (0.0, 0.0));
        let moving = textured(size, (1.5, -2.0));
        for motion in [MotionType::Translation, MotionType::Euclidean, MotionType::Affine] {
            let aligner = EccAligner::new().with_motion_type(motion).with_max_iterations(50);
            let id = format!("{}/{}x{}", motion, size, size);
            group.bench_with_input(BenchmarkId::new("native", &id), &aligner, |b, a| {
                b.iter(|| a.estimate(black_box(&reference), black_box(&moving)))
            });
        }
    }
    group.finish();
}

fn bench_warp(c: &mut Criterion) {
    let mut group = c.benchmark_group("warp");

    for size in [256, 512, 1024] {
        let image = textured(size, (0.0, 0.0));
        let center = (size as f64 / 2.0, size as f64 / 2.0);
        let transform = Transform::rotation_about(center, 5.0);
        let id = format!("{}x{}", size, size);
        group.bench_with_input(BenchmarkId::new("bilinear_u16", &id), &image, |b, i| {
            b.iter(|| warp::<_, u16>(black_box(i), &transform, (size, size)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ecc_estimate, bench_warp);
criterion_main!(benches);
