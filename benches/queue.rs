use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use rfabric::rcq::SegmentQueue;

const ITEMS: i64 = 10_000;

fn segment_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_queue");
    group.throughput(Throughput::Elements(ITEMS as u64));

    group.bench_function("enqueue_10k", |b| {
        b.iter_batched(
            || SegmentQueue::new(64, 8192),
            |queue| {
                for value in 1..=ITEMS {
                    queue.enqueue(value);
                }
                queue
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("enqueue_dequeue_10k", |b| {
        b.iter_batched(
            || SegmentQueue::new(64, 8192),
            |queue| {
                for value in 1..=ITEMS {
                    queue.enqueue(value);
                }
                for _ in 1..=ITEMS {
                    queue.try_dequeue();
                }
                queue
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("interleaved_10k", |b| {
        b.iter_batched(
            || SegmentQueue::new(64, 8192),
            |queue| {
                for value in 1..=ITEMS {
                    queue.enqueue(value);
                    if value % 2 == 0 {
                        queue.try_dequeue();
                    }
                }
                queue
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, segment_queue);
criterion_main!(benches);
