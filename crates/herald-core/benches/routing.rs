//! Routing benchmarks for herald-core.
//!
//! Measures the registry fan-out and the full live/queued routing paths with
//! in-memory backends.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use herald_core::store::MemoryMessageStore;
use herald_core::{
    group_name, ConnectionHandle, ConnectionId, ConnectionRegistry, LocalRegistry, MessageRouter,
    OpenDirectory,
};
use herald_protocol::{SendMessage, ServerEvent};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_group_name(c: &mut Criterion) {
    c.bench_function("group_name", |b| {
        b.iter(|| group_name(black_box("mona"), black_box(Some("Mozilla/5.0 (X11; Linux)"))))
    });
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("join_leave", |b| {
        let registry = LocalRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(ConnectionId::generate());
        b.iter(|| {
            registry.join(&conn, "mona-phone");
            registry.leave(conn.id(), "mona-phone");
        });
    });

    for members in [1usize, 10, 100] {
        let registry = LocalRegistry::new();
        let mut receivers = Vec::with_capacity(members);
        for _ in 0..members {
            let (conn, rx) = ConnectionHandle::channel(ConnectionId::generate());
            registry.join(&conn, "mona-phone");
            receivers.push(rx);
        }

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::new("multicast", members), &members, |b, _| {
            b.iter(|| {
                let count = registry.multicast(
                    "mona-phone",
                    ServerEvent::receive_message("ahmed", "mona", "hi", "phone"),
                );
                for rx in &mut receivers {
                    while rx.try_recv().is_ok() {}
                }
                count
            });
        });
    }

    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("route");

    let registry = Arc::new(LocalRegistry::new());
    let router = MessageRouter::new(
        registry.clone(),
        Arc::new(MemoryMessageStore::new()),
        Arc::new(OpenDirectory),
        Arc::new(OpenDirectory),
    );
    let (conn, mut rx) = ConnectionHandle::channel(ConnectionId::generate());
    registry.join(&conn, "mona-phone");

    let live = SendMessage::new("ahmed", "mona", "phone", "hi");
    group.bench_function("live", |b| {
        b.iter(|| {
            let outcome = rt.block_on(router.route(black_box(&live)));
            while rx.try_recv().is_ok() {}
            outcome
        });
    });

    let offline = SendMessage::new("ahmed", "mona", "tablet", "hi");
    group.bench_function("queued", |b| {
        b.iter(|| rt.block_on(router.route(black_box(&offline))));
    });

    group.finish();
}

criterion_group!(benches, bench_group_name, bench_registry, bench_route);
criterion_main!(benches);
