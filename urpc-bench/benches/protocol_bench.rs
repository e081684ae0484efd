//! Micro-benchmarks for the frame codec, method id hash, error payload
//! codec, and application cipher.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use urpc_protocol::{fnv1a64, ErrorPayload, FrameFlags, FrameHeader, FrameType};
use urpc_transport::AppCipher;

fn bench_header_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_header");

    let header = FrameHeader::new(
        FrameType::Request,
        FrameFlags::new().with_end_stream(),
        42,
        fnv1a64(b"Example.Echo"),
        4096,
    );

    group.bench_function("encode", |b| {
        b.iter(|| black_box(header).encode());
    });

    let wire = header.encode();
    group.bench_function("parse", |b| {
        b.iter(|| FrameHeader::parse(black_box(&wire)).unwrap());
    });

    group.finish();
}

fn bench_fnv1a64(c: &mut Criterion) {
    let mut group = c.benchmark_group("fnv1a64");

    for name in ["Example.Echo", "Service.Namespace.LongMethodName.V2"] {
        group.throughput(Throughput::Bytes(name.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| fnv1a64(black_box(name.as_bytes())));
        });
    }

    group.finish();
}

fn bench_error_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_payload");

    let payload = ErrorPayload::new(404, "Unknown method");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(&payload).encode());
    });

    let wire = payload.encode();
    group.bench_function("decode", |b| {
        b.iter(|| ErrorPayload::decode(black_box(&wire)).unwrap());
    });

    group.finish();
}

fn bench_app_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_cipher");
    let cipher = AppCipher::new(&[0x42u8; 32]);

    for size in [64usize, 4096, 65536] {
        let plaintext = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encrypt/{}", size), |b| {
            b.iter(|| cipher.encrypt(black_box(&plaintext)).unwrap());
        });

        let encrypted = cipher.encrypt(&plaintext).unwrap();
        group.bench_function(format!("decrypt/{}", size), |b| {
            b.iter(|| cipher.decrypt(black_box(&encrypted)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_header_codec,
    bench_fnv1a64,
    bench_error_payload,
    bench_app_cipher
);
criterion_main!(benches);
