//! Benchmarks for the OC-SORT tracker

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use octrack::bbox::{giou_batch, iou_batch, Bbox};
use octrack::{Detection, OcSortTracker, TrackerConfig};
use std::hint::black_box;

fn create_test_detections(n_detections: usize, n_frames: usize) -> Vec<Vec<Detection>> {
    (0..n_frames)
        .map(|frame| {
            (0..n_detections)
                .map(|i| {
                    let x = (frame * 10 + i * 50) as f32;
                    let y = (frame * 5 + i * 30) as f32;
                    Detection::new(Bbox::new(x, y, x + 50.0, y + 30.0), 0.8, 0, i)
                })
                .collect()
        })
        .collect()
}

fn tracker(use_byte: bool) -> OcSortTracker {
    OcSortTracker::new(TrackerConfig {
        max_age: 5,
        use_byte,
        ..TrackerConfig::default()
    })
    .unwrap()
}

fn bench_ocsort_update(c: &mut Criterion) {
    let detections = create_test_detections(20, 10);

    c.bench_function("ocsort_update_20_detections", |b| {
        b.iter_batched(
            || tracker(false),
            |mut tracker| {
                for det_frame in &detections {
                    let _result = tracker.update(black_box(det_frame));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_ocsort_various_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("ocsort_various_detection_counts");

    for &n_detections in &[5, 10, 20, 50, 100] {
        let detections = create_test_detections(n_detections, 10);

        group.bench_with_input(
            BenchmarkId::new("detections", n_detections),
            &detections,
            |b, detections| {
                b.iter_batched(
                    || tracker(true),
                    |mut tracker| {
                        for det_frame in detections {
                            let _result = tracker.update(black_box(det_frame));
                        }
                    },
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn bench_occlusion_recovery(c: &mut Criterion) {
    // Every object disappears for three frames mid-sequence
    let mut detections = create_test_detections(30, 12);
    for frame in detections.iter_mut().skip(5).take(3) {
        frame.clear();
    }

    c.bench_function("ocsort_occlusion_30_objects", |b| {
        b.iter_batched(
            || tracker(false),
            |mut tracker| {
                for det_frame in &detections {
                    let _result = tracker.update(black_box(det_frame));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_array_interface(c: &mut Criterion) {
    let mut data = Vec::with_capacity(100 * 5);
    for i in 0..100 {
        let score = if i % 3 == 0 {
            0.8
        } else if i % 3 == 1 {
            0.4
        } else {
            0.05
        };
        data.extend(&[i as f32, i as f32, (i + 50) as f32, (i + 30) as f32, score]);
    }
    let detections = Array2::from_shape_vec((100, 5), data).unwrap();

    c.bench_function("ocsort_array_100_detections", |b| {
        b.iter_batched(
            || tracker(true),
            |mut tracker| {
                let _result = tracker.update_array(black_box(detections.view()));
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_similarity(c: &mut Criterion) {
    let detections: Vec<Bbox<f32>> = (0..50)
        .map(|i| {
            let x = (i * 7) as f32;
            Bbox::new(x, x, x + 40.0, x + 30.0)
        })
        .collect();
    let tracks: Vec<Bbox<f32>> = (0..30)
        .map(|i| {
            let x = (i * 11) as f32 + 0.5;
            Bbox::new(x, x, x + 40.0, x + 30.0)
        })
        .collect();

    let mut group = c.benchmark_group("similarity_50x30");
    group.bench_function("iou", |b| {
        b.iter(|| iou_batch(black_box(&detections), black_box(&tracks)))
    });
    group.bench_function("giou", |b| {
        b.iter(|| giou_batch(black_box(&detections), black_box(&tracks)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_ocsort_update,
    bench_ocsort_various_sizes,
    bench_occlusion_recovery,
    bench_array_interface,
    bench_similarity
);
criterion_main!(benches);
