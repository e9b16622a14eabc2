#![allow(dead_code)]

use abm_pipeline::{Id, World, WorldConfig};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy, Default)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy, Default)]
pub struct Productivity {
    pub rate: f32,
}

pub struct Ids {
    pub wealth: Id,
    pub productivity: Id,
    pub broke: Id,
}

pub fn make_world(threads: usize) -> (World, Ids) {
    let mut world = World::with_config(WorldConfig::default().with_threads(threads))
        .expect("valid bench configuration");
    let ids = Ids {
        wealth: world.register::<Wealth>(),
        productivity: world.register::<Productivity>(),
        broke: world.tag("Broke"),
    };
    (world, ids)
}

pub fn populate(world: &World, agent_count: usize) {
    world.defer_begin();
    for i in 0..agent_count {
        let e = world.new_entity();
        world.set(e, Wealth { value: 100.0 });
        world.set(e, Productivity { rate: (i % 7) as f32 * 0.1 });
    }
    world.defer_end();
}
