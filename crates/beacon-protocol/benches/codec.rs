//! Codec benchmarks for beacon-protocol.

use beacon_protocol::{codec, ServerEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn chat_event() -> ServerEvent {
    ServerEvent::notify(
        "message-received",
        json!({
            "room_id": "room:lobby",
            "sender": "u1",
            "text": "The quick brown fox jumps over the lazy dog",
        }),
    )
}

fn bench_encode_event(c: &mut Criterion) {
    let event = chat_event();
    let encoded_len = codec::encode(&event).unwrap().len() as u64;

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded_len));
    group.bench_function("notify_event", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let event = chat_event();
    let encoded = codec::encode(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("notify_event", |b| {
        b.iter(|| codec::decode::<ServerEvent>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let event = chat_event();

    c.bench_function("roundtrip_notify", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&event)).unwrap();
            codec::decode::<ServerEvent>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode_event, bench_decode_event, bench_roundtrip);
criterion_main!(benches);
