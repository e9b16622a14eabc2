use criterion::*;
use std::hint::black_box;

use abm_pipeline::{QueryBuilder, SystemDesc};

mod common;
use common::*;

fn economy_world(threads: usize) -> abm_pipeline::World {
    let (mut world, ids) = make_world(threads);
    populate(&world, AGENTS_MED);

    // wealth += productivity
    world.system(
        SystemDesc::new("production")
            .query(QueryBuilder::new().read(ids.productivity).write(ids.wealth))
            .multi_threaded(true)
            .run(|ctx| {
                for &e in ctx.entities() {
                    if let (Some(p), Some(w)) = (ctx.get::<Productivity>(e), ctx.get::<Wealth>(e)) {
                        ctx.set(e, Wealth { value: w.value + p.rate });
                    }
                }
            }),
    );

    // wealth decay; forces a merge after production
    world.system(
        SystemDesc::new("decay")
            .query(QueryBuilder::new().write(ids.wealth))
            .multi_threaded(true)
            .run(|ctx| {
                for &e in ctx.entities() {
                    ctx.emplace::<Wealth>(e, |w| w.value *= 0.9999);
                }
            }),
    );

    world
}

fn progress_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("progress");
    group.sample_size(10);

    for threads in [1, 4] {
        group.bench_function(format!("two_systems_100k_{threads}_threads"), |b| {
            b.iter_batched(
                || economy_world(threads),
                |mut world| {
                    world.advance_frame(1.0);
                    black_box(world);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.bench_function("rebuild_only", |b| {
        let (mut world, ids) = make_world(1);
        for i in 0..64 {
            let query = if i % 2 == 0 {
                QueryBuilder::new().write(ids.wealth)
            } else {
                QueryBuilder::new().read(ids.wealth).adds(ids.broke)
            };
            world.system(SystemDesc::new(format!("s{i}")).query(query));
        }
        b.iter(|| {
            world.enable_system(0, false).ok();
            world.enable_system(0, true).ok();
            world.advance_frame(1.0);
        });
        black_box(world.info());
    });

    group.finish();
}

criterion_group!(benches, progress_benchmark);
criterion_main!(benches);
