//! Fade curve evaluation benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use segue_common::FadeCurve;
use segue_engine::playback::{fade_level, FadeDirection};

fn bench_fade_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("fade_level");

    for curve in FadeCurve::all_variants() {
        group.bench_function(curve.as_str(), |b| {
            b.iter(|| {
                let mut sum = 0.0;
                for t in 0..=200u32 {
                    sum += fade_level(FadeDirection::FadeIn, black_box(t), 200, *curve);
                    sum += fade_level(FadeDirection::FadeOut, black_box(t), 200, *curve);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fade_levels);
criterion_main!(benches);
