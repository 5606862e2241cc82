//! Fan-out benchmarks for the room broadcaster and message pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{
    AesGcmCrypto, ConnectionHandle, Crypto, MemoryStore, MessagePipeline, Outbox, PresenceRegistry,
    RoomBroadcaster,
};
use parley_protocol::{ServerEvent, UserIdentity};
use std::sync::Arc;

fn populated_room(members: usize) -> (Arc<RoomBroadcaster>, Vec<Outbox>) {
    let presence = Arc::new(PresenceRegistry::new());
    let broadcaster = Arc::new(RoomBroadcaster::new(presence.clone()));
    let mut outboxes = Vec::with_capacity(members);

    for i in 0..members {
        let handle = ConnectionHandle::new(format!("conn-{i}"));
        let user = UserIdentity::new(i.to_string(), format!("user-{i}"), "");
        outboxes.push(broadcaster.connect(&handle));
        presence.mark_online(&user.id, &handle);
        broadcaster.join("general", &handle, &user);
    }
    for outbox in &mut outboxes {
        while outbox.try_recv().is_ok() {}
    }

    (broadcaster, outboxes)
}

/// Benchmark broadcast to rooms of increasing size.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for members in [1, 10, 100, 1000] {
        let (broadcaster, mut outboxes) = populated_room(members);
        let event = ServerEvent::user_offline("someone");

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                black_box(broadcaster.broadcast("general", event.clone()));
                for outbox in &mut outboxes {
                    while outbox.try_recv().is_ok() {}
                }
            })
        });
    }

    group.finish();
}

/// Benchmark join/leave churn on a busy room.
fn bench_membership(c: &mut Criterion) {
    let (broadcaster, _outboxes) = populated_room(100);
    let handle = ConnectionHandle::from("churn");
    let user = UserIdentity::new("churn", "churn", "");
    let _outbox = broadcaster.connect(&handle);

    c.bench_function("join_leave_100", |b| {
        b.iter(|| {
            broadcaster.join("general", &handle, &user);
            broadcaster.leave("general", &handle, &user);
        })
    });
}

/// Benchmark encrypted submit end to end.
fn bench_submit(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let (broadcaster, mut outboxes) = populated_room(10);
    let crypto: Arc<dyn Crypto> = Arc::new(AesGcmCrypto::from_passphrase("bench"));
    let pipeline = MessagePipeline::new(Arc::new(MemoryStore::new()), crypto, broadcaster);

    let mut group = c.benchmark_group("submit");
    for encrypt in [false, true] {
        group.bench_with_input(BenchmarkId::new("encrypt", encrypt), &encrypt, |b, &encrypt| {
            b.iter(|| {
                runtime
                    .block_on(pipeline.submit("general", "1", "alice", "hello world", encrypt))
                    .expect("submit");
                for outbox in &mut outboxes {
                    while outbox.try_recv().is_ok() {}
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fanout, bench_membership, bench_submit);
criterion_main!(benches);
