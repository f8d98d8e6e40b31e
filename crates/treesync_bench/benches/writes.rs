//! Write-path benchmarks: optimistic local writes and server updates flowing
//! through a listened tree.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use treesync_bench::keyed_children;
use treesync_codec::{Path, Value};
use treesync_core::types::{AckStatus, OverwriteVisibility, PersistMode, WriteId};
use treesync_testkit::fixtures::TestTree;

/// One local overwrite plus its confirming ack, under a value listener.
fn bench_user_write_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("user_write_round_trip");

    let mut harness = TestTree::in_memory();
    harness.listen_default("data").unwrap();
    harness
        .tree
        .apply_server_overwrite(Path::parse("data"), keyed_children(64))
        .unwrap();

    let mut write_id = 0i64;
    group.bench_function("overwrite_child", |b| {
        b.iter(|| {
            write_id += 1;
            let events = harness
                .tree
                .apply_user_overwrite(
                    Path::parse("data/k0000"),
                    Value::Int(write_id),
                    WriteId::new(write_id),
                    OverwriteVisibility::Visible,
                    PersistMode::DoNotPersist,
                )
                .unwrap();
            black_box(&events);
            harness
                .tree
                .ack_user_write(
                    WriteId::new(write_id),
                    AckStatus::Confirm,
                    PersistMode::DoNotPersist,
                )
                .unwrap();
        });
    });
    group.finish();
}

/// Server overwrites replacing a child under maps of increasing width.
fn bench_server_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("server_overwrite");

    for width in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let mut harness = TestTree::in_memory();
            harness.listen_default("data").unwrap();
            harness
                .tree
                .apply_server_overwrite(Path::parse("data"), keyed_children(width))
                .unwrap();

            let mut tick = 0i64;
            b.iter(|| {
                tick += 1;
                let events = harness
                    .tree
                    .apply_server_overwrite(Path::parse("data/k0001"), Value::Int(tick))
                    .unwrap();
                black_box(&events);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_user_write_round_trip, bench_server_overwrite);
criterion_main!(benches);
