//! # Event Relay Benchmarks
//!
//! Hot-path costs per envelope:
//!
//! | Stage | Work |
//! |-------|------|
//! | canonicalize | sorted-key serialization of the signed set |
//! | sign | canonical form + HMAC-SHA256 + nonce |
//! | verify | parse + freshness + nonce claim + HMAC compare |
//! | dispatch | membership lookup + frame encode + queue push |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_bus::{InMemoryNonceStore, ReplayGuard, Verifier};
use relay_gateway::{ConnectionId, Dispatcher, MembershipRouter, OutboundFrame};
use relay_types::{
    canonical_bytes, Event, EventType, GroupKey, SharedSecret, Signer, SigningKey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn secret() -> SharedSecret {
    SharedSecret::new("benchmark-secret").unwrap()
}

fn message(extra_fields: usize) -> Event {
    (0..extra_fields)
        .fold(
            Event::builder(EventType::NewMessage)
                .in_room("room-1")
                .field("content", "The quick brown fox jumps over the lazy dog"),
            |builder, i| builder.field(format!("field_{i}"), format!("value/{i}")),
        )
        .build()
        .unwrap()
}

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing");
    group.measurement_time(Duration::from_secs(5));
    let signer = Signer::new(&secret()).unwrap();

    for fields in [0, 10, 50] {
        let event = message(fields);
        let wire = signer.sign(event.clone()).to_wire();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("canonicalize", fields), &wire, |b, wire| {
            b.iter(|| black_box(canonical_bytes(wire)))
        });
        group.bench_with_input(BenchmarkId::new("sign", fields), &event, |b, event| {
            b.iter(|| black_box(signer.sign(event.clone())))
        });
    }
    group.finish();
}

fn bench_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("verification");
    group.measurement_time(Duration::from_secs(5));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let signer = Signer::new(&secret()).unwrap();
    let verifier = Verifier::new(
        SigningKey::new(&secret()).unwrap(),
        ReplayGuard::new(Arc::new(InMemoryNonceStore::new()), "bench"),
    );

    // Fresh nonce per iteration, so every verify does a successful claim.
    group.bench_function("verify_accept", |b| {
        b.iter_batched(
            || signer.sign(message(5)).to_json_bytes().unwrap(),
            |raw| black_box(runtime.block_on(verifier.verify(&raw)).is_ok()),
            criterion::BatchSize::SmallInput,
        )
    });

    let replayed = signer.sign(message(5)).to_json_bytes().unwrap();
    runtime.block_on(verifier.verify(&replayed)).unwrap();
    group.bench_function("verify_replay_rejected", |b| {
        b.iter(|| black_box(runtime.block_on(verifier.verify(&replayed)).is_err()))
    });
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let signer = Signer::new(&secret()).unwrap();

    for members in [1, 100, 1000] {
        let router = Arc::new(MembershipRouter::new());
        let mut queues: Vec<mpsc::Receiver<OutboundFrame>> = Vec::with_capacity(members);
        for i in 0..members {
            let (tx, rx) = mpsc::channel(1024);
            let conn = ConnectionId::new();
            router.register(conn, Some(format!("user-{i}")), tx);
            router.join(conn, GroupKey::room("room-1")).unwrap();
            queues.push(rx);
        }
        let dispatcher = Dispatcher::new(router);
        let verifier = Verifier::new(
            SigningKey::new(&secret()).unwrap(),
            ReplayGuard::new(Arc::new(InMemoryNonceStore::new()), "bench"),
        );
        let raw = signer.sign(message(5)).to_json_bytes().unwrap();
        let verified = runtime.block_on(verifier.verify(&raw)).unwrap();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::new("room", members), &verified, |b, verified| {
            b.iter(|| {
                let report = dispatcher.dispatch(verified);
                for queue in &mut queues {
                    while queue.try_recv().is_ok() {}
                }
                black_box(report)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_signing, bench_verification, bench_dispatch);
criterion_main!(benches);
