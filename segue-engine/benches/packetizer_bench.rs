//! Packetizer throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segue_engine::audio::Packetizer;

fn bench_write_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("packetizer_write_drain");

    for packet_size in [512usize, 2048, 4096] {
        // Ragged writes force the overflow path
        let chunk: Vec<f32> = (0..packet_size * 3 + 17).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; packet_size];
        group.throughput(Throughput::Elements(chunk.len() as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(packet_size),
            &packet_size,
            |b, &size| {
                let mut packetizer = Packetizer::new(size);
                b.iter(|| {
                    packetizer
                        .write_data(black_box(&chunk))
                        .expect("chunk fits in the ring");
                    while packetizer.is_buffer_available() {
                        let n = packetizer.get_buffer(&mut out);
                        black_box(&out[..n]);
                        packetizer.advance(1);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_write_and_drain);
criterion_main!(benches);
