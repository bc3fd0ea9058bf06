//! Benchmarks for the wire chunking path.
//!
//! Every live frame crosses base64 expansion, chunk splitting, and (on the
//! consuming side) reassembly, so these conversions sit directly on the
//! frame hot path.

use std::hint::black_box;
use std::time::SystemTime;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use vidflow::packets::{EncodedFrame, FrameId, NetworkFrame};

fn sample_frame(size: usize) -> EncodedFrame {
    EncodedFrame {
        data: (0..size).map(|n| n as u8).collect(),
        id: FrameId::new(0, size as i64),
        creation_time: SystemTime::now(),
        key_frame: true,
    }
}

fn bench_to_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_to_network");
    // a keyframe-sized payload that splits into multiple chunks, and a
    // typical delta frame that stays single-chunk
    for (label, size) in [("delta_10k", 10_000), ("key_120k", 120_000)] {
        let frame = sample_frame(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(label, |b| {
            b.iter(|| {
                let chunks = black_box(&frame).to_network(frame.creation_time);
                black_box(chunks)
            })
        });
    }
    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_reassemble");
    for (label, size) in [("delta_10k", 10_000), ("key_120k", 120_000)] {
        let frame = sample_frame(size);
        let chunks = frame.to_network(frame.creation_time);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(label, |b| {
            b.iter(|| {
                let rebuilt =
                    NetworkFrame::reassemble(black_box(chunks.clone()), true).unwrap();
                black_box(rebuilt)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_to_network, bench_reassemble);
criterion_main!(benches);
