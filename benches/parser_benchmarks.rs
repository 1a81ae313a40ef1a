// ABOUTME: Benchmark suite for the packet parser: single-frame decode,
// ABOUTME: resynchronisation cost, and throughput on a back-to-back stream

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use velbus_bridge::packet::{Frame, Parser};

fn sample_frame(body_len: usize) -> Vec<u8> {
    let body: Vec<u8> = (0..body_len as u8).collect();
    Frame::build(0xFB, 0x01, &body).as_bytes().to_vec()
}

fn bench_single_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser/single_frame");
    for body_len in [0usize, 4, 8] {
        let bytes = sample_frame(body_len);
        group.bench_with_input(BenchmarkId::from_parameter(body_len), &bytes, |b, bytes| {
            b.iter(|| {
                let mut parser = Parser::new();
                let frames = parser.feed(black_box(bytes));
                black_box(frames);
            });
        });
    }
    group.finish();
}

fn bench_resync_through_garbage(c: &mut Criterion) {
    let mut data = vec![0xAAu8; 512];
    data.extend(sample_frame(8));
    c.bench_function("parser/resync_through_512_bytes_garbage", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            let frames = parser.feed(black_box(&data));
            black_box(frames);
        });
    });
}

fn bench_back_to_back_stream(c: &mut Criterion) {
    let mut data = Vec::new();
    for _ in 0..256 {
        data.extend(sample_frame(8));
    }
    c.bench_function("parser/256_back_to_back_frames", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            let frames = parser.feed(black_box(&data));
            black_box(frames);
        });
    });
}

fn bench_checksum(c: &mut Criterion) {
    let bytes = vec![0x0Fu8, 0xFB, 0x01, 0x08, 0, 1, 2, 3, 4, 5, 6, 7];
    c.bench_function("parser/checksum", |b| {
        b.iter(|| black_box(Frame::checksum(black_box(&bytes))));
    });
}

criterion_group!(
    benches,
    bench_single_frame_decode,
    bench_resync_through_garbage,
    bench_back_to_back_stream,
    bench_checksum
);
criterion_main!(benches);
