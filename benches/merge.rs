use criterion::*;
use std::hint::black_box;

use abm_pipeline::engine::commands::{CommandKind, CommandQueue};
use abm_pipeline::engine::merge;
use abm_pipeline::{Id, Store};

mod common;
use common::*;

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    group.bench_function("deferred_spawn_10k", |b| {
        b.iter_batched(
            || make_world(1),
            |(world, _)| {
                populate(&world, AGENTS_SMALL);
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("toggle_tag_10k", |b| {
        b.iter_batched(
            || {
                let mut store = Store::new();
                let wealth = Id::component(store.registry_mut().register::<Wealth>());
                let broke = Id::component(store.registry_mut().register_tag("Broke"));
                let mut queue = CommandQueue::new();
                for _ in 0..AGENTS_SMALL {
                    let e = store.new_entity();
                    store.add(e, wealth);
                    queue.push(Some(e), CommandKind::Add { id: broke });
                    queue.push(Some(e), CommandKind::Remove { id: broke });
                    queue.push(Some(e), CommandKind::Add { id: broke });
                }
                (store, queue)
            },
            |(mut store, mut queue)| {
                black_box(merge::flush(&mut store, &mut queue));
                black_box(store);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, merge_benchmark);
criterion_main!(benches);
