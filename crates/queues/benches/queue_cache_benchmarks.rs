use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use jobflow_core::{Job, JobId, QueueType};
use jobflow_queues::{InMemoryJobStorage, JobStorage, QueueJobCache};
use std::sync::Arc;

fn seeded_storage(topics: usize, jobs_per_topic: usize) -> (Arc<InMemoryJobStorage>, Vec<String>) {
    let storage = InMemoryJobStorage::arc();
    let names: Vec<String> = (0..topics).map(|t| format!("bench/topic/{t}")).collect();
    for (t, topic) in names.iter().enumerate() {
        for i in 0..jobs_per_topic {
            // Interleave creation times across topics.
            let offset = (i * topics + t) as i64;
            let job = Job::new(topic.clone(), serde_json::Map::new())
                .with_created(Utc::now() + chrono::Duration::milliseconds(offset));
            storage.add(job).unwrap();
        }
    }
    (storage, names)
}

fn nothing_owned(_: &JobId) -> bool {
    false
}

/// Drain a fresh cache completely; every job is read once.
fn drain(storage: &Arc<InMemoryJobStorage>, topics: &[String], queue_type: QueueType, preload_limit: usize) -> usize {
    let cache = QueueJobCache::new("bench", queue_type, preload_limit, storage.clone(), topics.iter().cloned());
    let mut taken = 0;
    let mut owned = std::collections::HashSet::new();
    loop {
        let is_owned = |id: &JobId| owned.contains(id);
        let Some(handler) = cache.get_next_job(&is_owned, false) else {
            break;
        };
        owned.insert(handler.id());
        taken += 1;
    }
    taken
}

fn bench_cache_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_fill");

    for topics in [1usize, 8, 32] {
        let (storage, names) = seeded_storage(topics, 10);
        group.throughput(Throughput::Elements((topics * 10) as u64));
        group.bench_with_input(BenchmarkId::new("single_fill", topics), &topics, |b, _| {
            b.iter(|| {
                let cache =
                    QueueJobCache::new("bench", QueueType::Unordered, 10, storage.clone(), names.iter().cloned());
                black_box(cache.get_next_job(&nothing_owned, false))
            });
        });
    }

    group.finish();
}

fn bench_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_ordering");
    let (storage, names) = seeded_storage(16, 25);
    group.throughput(Throughput::Elements(16 * 25));

    for (label, queue_type) in [
        ("ordered", QueueType::Ordered),
        ("unordered", QueueType::Unordered),
        ("round_robin", QueueType::TopicRoundRobin),
    ] {
        group.bench_function(label, |b| {
            b.iter(|| black_box(drain(&storage, &names, queue_type, 25)));
        });
    }

    group.finish();
}

fn bench_preload_limit(c: &mut Criterion) {
    let mut group = c.benchmark_group("preload_limit");
    let (storage, names) = seeded_storage(4, 200);

    for limit in [5usize, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| black_box(drain(&storage, &names, QueueType::Unordered, limit)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache_fill, bench_ordering, bench_preload_limit);
criterion_main!(benches);
