//! Criterion benchmarks for the sample-to-datagram hot path.
//!
//! Key metrics:
//! - Frame decode (24-bit reconstruction and calibration) per sample
//! - Record encoding for short and full-width values
//! - Filling one datagram buffer to its limits
//! - Queue push/pop round trip
//!
//! Run with: cargo bench --bench packetizer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ecg_stream::packetizer::{PacketBuffer, DEFAULT_MAX_BYTES, DEFAULT_MAX_SAMPLES};
use ecg_stream::queue::sample_queue;
use ecg_stream::sample::{Calibration, Sample, FRAME_LEN, MAX_RECORD_LEN};
use ecg_stream::stats::PipelineStats;
use std::sync::Arc;

fn frame_decode(c: &mut Criterion) {
    let calibration = Calibration::default();
    let frame: [u8; FRAME_LEN] = [0x5C, 0xB2, 0x78, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF];

    c.bench_function("decode_frame", |b| {
        b.iter(|| calibration.decode_frame(black_box(&frame)));
    });
}

/// Encoding cost depends on digit count, so measure both ends.
fn record_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_encode");
    let cases = [
        ("short", Sample::new(0, [1, -2, 3], false)),
        ("full_width", Sample::new(0, [-8_388_608, -8_388_608, -8_388_608], true)),
    ];

    for (name, sample) in cases {
        group.bench_with_input(BenchmarkId::new("encode", name), &sample, |b, sample| {
            let mut line = [0u8; MAX_RECORD_LEN];
            b.iter(|| black_box(sample).record().encode(&mut line));
        });
    }

    group.finish();
}

fn packet_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_fill");
    let samples: Vec<Sample> = (0..DEFAULT_MAX_SAMPLES as u64)
        .map(|seq| Sample::new(seq, [6_075_000 - seq as i32, -120_000, 42], seq % 7 == 0))
        .collect();

    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("fill_default_datagram", |b| {
        let mut buffer = PacketBuffer::new(DEFAULT_MAX_BYTES, DEFAULT_MAX_SAMPLES);
        let mut line = [0u8; MAX_RECORD_LEN];
        b.iter(|| {
            for sample in &samples {
                let len = sample.record().encode(&mut line);
                if !buffer.fits(len) {
                    buffer.clear();
                }
                buffer.push_record(&line[..len]);
            }
            black_box(buffer.as_bytes().len());
            buffer.clear();
        });
    });

    group.finish();
}

fn queue_round_trip(c: &mut Criterion) {
    let stats = Arc::new(PipelineStats::default());
    let (mut tx, mut rx) = sample_queue(1024, stats).unwrap();
    let sample = Sample::new(0, [1, 2, 3], false);

    c.bench_function("queue_push_pop", |b| {
        b.iter(|| {
            tx.try_push(black_box(sample));
            black_box(rx.try_pop());
        });
    });
}

criterion_group!(benches, frame_decode, record_encode, packet_fill, queue_round_trip);
criterion_main!(benches);
