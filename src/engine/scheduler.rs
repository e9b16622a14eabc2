//! Pipeline execution.
//!
//! This module is responsible for:
//! * keeping a pipeline's compiled schedule current (rebuild on change),
//! * walking the schedule op by op,
//! * fanning multi-threaded ops out to the rayon workers,
//! * merging stage queues at every op boundary.
//!
//! ## Execution model
//!
//! Each op is one fork/join. Non-immediate ops run inside readonly mode so
//! systems can only mutate through their stage's queue; the merge at the end
//! of the op leaves readonly mode. Immediate ops run on the calling thread
//! with direct store access.
//!
//! Within a multi-threaded op every stage runs every system of the op over a
//! static, contiguous slice of the matched entities. Systems without `This`
//! terms run on stage 0 only.
//!
//! ## Cursor
//!
//! After each op the cursor is moved past the op and the schedule is
//! re-validated; a rebuild resumes after the last system that already ran in
//! the current frame.

use std::time::Instant;

use tracing::trace;

use crate::engine::entity::Entity;
use crate::engine::manager::World;
use crate::engine::pipeline::{compile, MatchCount, SystemBuildInfo};
use crate::engine::stage::StageRef;
use crate::engine::systems::SystemContext;
use crate::engine::types::{PipelineID, SystemID};


/// Rebuilds pipeline `index` if its match count changed.
///
/// Returns `true` if a new schedule was installed.

fn build(world: &mut World, index: usize) -> bool {
    let match_count = MatchCount {
        systems_version: world.systems_version,
        activity_version: world.store_mut().activity_version(),
    };
    if !world.pipelines[index].needs_rebuild(match_count) {
        return false;
    }

    let schedule = {
        let desc = world.pipelines[index].desc();
        let store = world.store_lock().read();
        let mut candidates: Vec<_> = world.systems.iter()
            .filter(|system| desc.includes(system.phase))
            .collect();
        candidates.sort_by_key(|system| (system.phase, system.id));
        let infos: Vec<SystemBuildInfo<'_>> = candidates.iter()
            .map(|system| SystemBuildInfo {
                id: system.id,
                query: &system.query,
                active: system.enabled && store.is_query_active(&system.query),
                multi_threaded: system.multi_threaded,
                immediate: system.immediate,
            })
            .collect();
        compile(&infos)
    };

    let frame = world.info.frame_count_total + 1;
    let systems = &world.systems;
    world.pipelines[index].install(match_count, schedule, |id| systems[id as usize].last_frame() == frame);
    world.info.pipeline_build_count_total += 1;
    true
}

/// Re-validates the schedule and positions the cursor.
///
/// ## Semantics
/// At the start of a frame pending table activity is evaluated and the
/// cursor rewinds to the first op. Otherwise the cursor advances past the
/// systems that just ran, unless a rebuild already positioned it.
///
/// ## Panics
/// Panics if the world is readonly.

fn update(world: &mut World, index: usize, start_of_frame: bool) {
    assert!(!world.is_readonly(), "cannot update a pipeline while the world is readonly");
    if start_of_frame {
        world.store_mut().eval_component_monitors();
    }
    let rebuilt = build(world, index);
    let state = &mut world.pipelines[index];
    if start_of_frame {
        state.rewind();
    } else if !rebuilt {
        state.advance();
    }
}

fn stage_slice(entities: Vec<Entity>, stage_index: usize, stage_count: usize) -> Vec<Entity> {
    if stage_count <= 1 {
        return entities;
    }
    let chunk = entities.len().div_ceil(stage_count);
    let start = (chunk * stage_index).min(entities.len());
    let end = (start + chunk).min(entities.len());
    entities[start..end].to_vec()
}

/// Runs `systems` on one stage.

fn run_systems(world: &World, systems: &[SystemID], stage_index: usize, stage_count: usize, delta_time: f32) {
    let stage = &world.stages[stage_index];
    for &id in systems {
        let record = &world.systems[id as usize];
        let has_this = record.query.has_this_terms();
        if !has_this && stage_index != 0 {
            continue;
        }
        let entities = if has_this {
            let matched = world.store_lock().read().matching_entities(&record.query);
            stage_slice(matched, stage_index, stage_count)
        } else {
            Vec::new()
        };
        trace!(system = %record.name, stage = stage_index, entities = entities.len(), "running system");

        let mut ctx = SystemContext::new(
            StageRef::new(world, stage),
            id,
            entities,
            delta_time,
            stage_index,
            stage_count,
        );
        record.invoke(&mut ctx);
    }
}

/// Runs one op's systems on every participating stage.

fn run_op(world: &World, systems: &[SystemID], multi_threaded: bool, stage_count: usize, delta_time: f32) {
    match (&world.workers, multi_threaded) {
        (Some(pool), true) => pool.in_place_scope(|scope| {
            for stage_index in 1..stage_count {
                scope.spawn(move |_| run_systems(world, systems, stage_index, stage_count, delta_time));
            }
            run_systems(world, systems, 0, stage_count, delta_time);
        }),
        _ => run_systems(world, systems, 0, 1, delta_time),
    }
}

/// Runs `pipeline` once to completion.
///
/// ## Semantics
/// `stage_count` bounds the number of stages used by multi-threaded ops; `1`
/// runs every op on the calling thread.

pub(crate) fn run_pipeline(world: &mut World, pipeline: PipelineID, delta_time: f32, stage_count: usize) {
    let index = pipeline as usize;
    let stage_count = stage_count.clamp(1, world.stage_count());
    update(world, index, true);

    loop {
        let (Some(op_index), cur_i) = world.pipelines[index].cursor() else { break };
        let state = &world.pipelines[index];
        if cur_i >= state.systems().len() {
            update(world, index, false);
            continue;
        }

        let op = state.ops()[op_index].clone();
        let systems: Vec<SystemID> = state.systems()[cur_i..op.end()].to_vec();
        let runnable: Vec<SystemID> = systems.iter().copied()
            .filter(|&id| world.systems[id as usize].tick(delta_time))
            .collect();
        let multi_threaded = stage_count > 1 && op.multi_threaded && !op.immediate;

        trace!(op = op_index, systems = runnable.len(), multi_threaded, immediate = op.immediate, "running op");
        let started = Instant::now();
        if !op.immediate {
            world.readonly_begin(multi_threaded);
        }
        run_op(world, &runnable, multi_threaded, stage_count, delta_time);
        let ran = started.elapsed();

        let frame = world.info.frame_count_total + 1;
        for &id in &systems {
            world.systems[id as usize].mark_passed(frame);
        }
        world.info.systems_ran_frame += runnable.len() as u64;
        world.info.systems_ran_total += runnable.len() as u64;

        let enqueued: u64 = if op.immediate {
            world.store_mut().eval_component_monitors();
            0
        } else {
            let queued = world.stages.iter_mut()
                .map(|stage| stage.get_mut().queue().len() as u64)
                .sum();
            world.readonly_end();
            queued
        };

        let measure = world.config().measure_system_time;
        if measure {
            world.info.system_time_total += ran;
        }
        if let Some(op) = world.pipelines[index].op_mut(op_index) {
            op.commands_enqueued += enqueued;
            if measure {
                op.time_spent += started.elapsed();
            }
        }

        world.pipelines[index].set_position(op.end());
        update(world, index, false);
    }
}
