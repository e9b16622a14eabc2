use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use abm_pipeline::engine::error::{ConfigError, ECSError, PipelineError, SystemError};
use abm_pipeline::prelude::*;
use abm_pipeline::FRAME_PIPELINE;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spawn_movers(world: &World, count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            let e = world.new_entity();
            world.set(e, Position { x: i as f32, y: 0.0 });
            world.set(e, Velocity { dx: 1.0, dy: 2.0 });
            e
        })
        .collect()
}

#[test]
fn frame_runs_systems_in_phase_order() {
    init_tracing();
    let mut world = World::new();
    let position = world.register::<Position>();
    let velocity = world.register::<Velocity>();
    let movers = spawn_movers(&world, 10);

    let log = Arc::new(Mutex::new(Vec::new()));
    let post_log = Arc::clone(&log);
    world.system(SystemDesc::new("report").phase(Phase::PostUpdate).run(move |_| {
        post_log.lock().unwrap().push("report");
    }));
    let move_log = Arc::clone(&log);
    world.system(
        SystemDesc::new("integrate")
            .query(QueryBuilder::new().write(position).read(velocity))
            .run(move |ctx| {
                for &e in ctx.entities() {
                    let (Some(p), Some(v)) = (ctx.get::<Position>(e), ctx.get::<Velocity>(e)) else { continue };
                    ctx.set(e, Position { x: p.x + v.dx * ctx.delta_time(), y: p.y + v.dy * ctx.delta_time() });
                }
                move_log.lock().unwrap().push("integrate");
            }),
    );
    let pre_log = Arc::clone(&log);
    world.system(SystemDesc::new("prepare").phase(Phase::PreUpdate).run(move |_| {
        pre_log.lock().unwrap().push("prepare");
    }));

    assert!(world.advance_frame(0.5));

    assert_eq!(*log.lock().unwrap(), vec!["prepare", "integrate", "report"]);
    for (i, &e) in movers.iter().enumerate() {
        assert_eq!(world.get::<Position>(e), Some(Position { x: i as f32 + 0.5, y: 1.0 }));
    }
    let ops = world.pipeline_state(FRAME_PIPELINE).unwrap().ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].commands_enqueued, 10);
    let info = world.info();
    assert_eq!(info.frame_count_total, 1);
    assert_eq!(info.systems_ran_frame, 3);
    assert!((info.world_time_total - 0.5).abs() < 1e-9);
}

#[test]
fn rebuild_mid_frame_resumes_after_systems_that_ran() {
    init_tracing();
    let mut world = World::new();
    let marker = world.tag("Marker");

    let spawner = world.system(SystemDesc::new("spawn").query(QueryBuilder::new().adds(marker)).run(move |ctx| {
        let e = ctx.new_entity();
        ctx.add(e, marker);
    }));
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);
    let counter = world.system(SystemDesc::new("count").query(QueryBuilder::new().read(marker)).run(move |ctx| {
        sink.store(ctx.entities().len(), Ordering::SeqCst);
    }));

    world.advance_frame(1.0);

    assert_eq!(world.system_invocations(spawner).unwrap(), 1);
    assert_eq!(world.system_invocations(counter).unwrap(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let state = world.pipeline_state(FRAME_PIPELINE).unwrap();
    assert_eq!(state.rebuild_count(), 2);
    assert_eq!(state.systems(), &[spawner, counter]);
    assert_eq!(state.ops().len(), 2);

    world.advance_frame(1.0);
    assert_eq!(world.system_invocations(spawner).unwrap(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn multi_threaded_op_splits_entities_and_merges_every_stage() {
    init_tracing();
    let mut world = World::with_config(WorldConfig::default().with_threads(4)).unwrap();
    assert_eq!(world.stage_count(), 4);
    let position = world.register::<Position>();
    let visited = world.tag("Visited");
    let entities: Vec<Entity> = (0..100)
        .map(|_| {
            let e = world.new_entity();
            world.add(e, position);
            e
        })
        .collect();

    let total = Arc::new(AtomicUsize::new(0));
    let stages = Arc::new(Mutex::new(HashSet::new()));
    let (total_sink, stage_sink) = (Arc::clone(&total), Arc::clone(&stages));
    let id = world.system(
        SystemDesc::new("visit")
            .query(QueryBuilder::new().write(position))
            .multi_threaded(true)
            .run(move |ctx| {
                assert_eq!(ctx.stage_count(), 4);
                stage_sink.lock().unwrap().insert(ctx.stage_index());
                total_sink.fetch_add(ctx.entities().len(), Ordering::SeqCst);
                for &e in ctx.entities() {
                    ctx.emplace::<Position>(e, |p| p.x += 1.0);
                    ctx.add(e, visited);
                }
                assert!(ctx.is_deferred());
            }),
    );

    world.advance_frame(1.0);

    assert_eq!(total.load(Ordering::SeqCst), 100);
    assert_eq!(*stages.lock().unwrap(), (0..4).collect::<HashSet<_>>());
    assert_eq!(world.system_invocations(id).unwrap(), 4);
    for &e in &entities {
        assert!(world.has(e, visited));
        assert_eq!(world.get::<Position>(e).map(|p| p.x), Some(1.0));
    }
    let ops = world.pipeline_state(FRAME_PIPELINE).unwrap().ops().to_vec();
    assert_eq!(ops.len(), 1);
    assert!(ops[0].multi_threaded);
    let cmd = world.info().cmd;
    assert_eq!(cmd.add_count, 200);
    assert_eq!(cmd.batched_entity_count, 100);
    assert!(!world.is_readonly());
}

#[test]
fn systems_without_this_terms_run_on_the_main_stage_only() {
    let mut world = World::with_config(WorldConfig::default().with_threads(3)).unwrap();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stages);
    world.system(SystemDesc::new("global").multi_threaded(true).run(move |ctx| {
        sink.lock().unwrap().push(ctx.stage_index());
    }));

    world.advance_frame(1.0);
    assert_eq!(*stages.lock().unwrap(), vec![0]);
}

#[test]
fn readonly_window_defers_until_end() {
    let mut world = World::new();
    let position = world.register::<Position>();
    let e = world.new_entity();

    assert!(!world.readonly_begin(false));
    assert!(world.is_readonly());
    world.add(e, position);
    assert!(!world.has(e, position));
    world.readonly_end();

    assert!(!world.is_readonly());
    assert!(world.has(e, position));
    assert_eq!(world.info().merge_count_total, 1);
}

#[test]
#[should_panic(expected = "deferred mode cannot be enabled when entering readonly mode")]
fn nested_readonly_panics() {
    let mut world = World::new();
    world.readonly_begin(false);
    world.readonly_begin(false);
}

#[test]
#[should_panic(expected = "readonly_end called while the world is not readonly")]
fn unmatched_readonly_end_panics() {
    let mut world = World::new();
    world.readonly_end();
}

#[test]
#[should_panic(expected = "cannot mutate the world directly while it is readonly")]
fn direct_mutation_while_readonly_panics() {
    let mut world = World::new();
    let position = world.register::<Position>();
    let e = world.new_entity();
    world.readonly_begin(false);
    world.defer_suspend();
    world.add(e, position);
}

#[test]
fn defer_scopes_nest_and_suspend() {
    let mut world = World::new();
    let position = world.register::<Position>();
    let velocity = world.register::<Velocity>();
    let e = world.new_entity();

    assert!(world.defer_begin());
    assert!(!world.defer_begin());
    world.add(e, position);
    assert!(!world.defer_end());
    assert!(!world.has(e, position));
    assert!(world.defer_end());
    assert!(world.has(e, position));

    world.defer_begin();
    world.defer_suspend();
    assert!(!world.defer_begin());
    world.add(e, velocity);
    assert!(world.has(e, velocity));
    world.defer_resume();
    world.remove(e, velocity);
    assert!(world.has(e, velocity));
    world.defer_end();
    assert!(!world.has(e, velocity));
}

#[test]
fn startup_systems_run_once_before_the_first_frame() {
    let mut world = World::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (start_log, frame_log) = (Arc::clone(&order), Arc::clone(&order));
    let startup = world.system(SystemDesc::new("boot").phase(Phase::OnStart).run(move |_| {
        start_log.lock().unwrap().push("boot");
    }));
    let frame = world.system(SystemDesc::new("tick").run(move |_| {
        frame_log.lock().unwrap().push("tick");
    }));

    for _ in 0..3 {
        world.advance_frame(1.0);
    }

    assert_eq!(world.system_invocations(startup).unwrap(), 1);
    assert_eq!(world.system_invocations(frame).unwrap(), 3);
    assert_eq!(order.lock().unwrap()[..2], ["boot", "tick"]);
}

#[test]
fn interval_systems_run_when_due() {
    let mut world = World::new();
    let periodic = world.system(SystemDesc::new("periodic").interval(1.0));
    let every_frame = world.system(SystemDesc::new("every"));

    for _ in 0..4 {
        world.advance_frame(0.5);
    }

    assert_eq!(world.system_invocations(periodic).unwrap(), 2);
    assert_eq!(world.system_invocations(every_frame).unwrap(), 4);
}

#[test]
fn quit_stops_the_frame_loop() {
    let mut world = World::new();
    world.system(SystemDesc::new("stop").run(|ctx| {
        if ctx.world().info().frame_count_total == 2 {
            ctx.world().quit();
        }
    }));

    let mut frames = 0;
    while world.advance_frame(1.0) {
        frames += 1;
        assert!(frames < 10, "quit was never observed");
    }
    assert_eq!(frames, 2);
    assert!(world.should_quit());
}

#[test]
fn custom_pipelines_select_phases() {
    let mut world = World::new();
    let validate = world.system(SystemDesc::new("validate").phase(Phase::OnValidate));
    let update = world.system(SystemDesc::new("update"));

    let only_validate = world.pipeline(PipelineDesc::new("validate-only").phase(Phase::OnValidate));
    world.set_pipeline(only_validate).unwrap();
    assert_eq!(world.get_pipeline(), only_validate);
    world.advance_frame(1.0);

    assert_eq!(world.system_invocations(validate).unwrap(), 1);
    assert_eq!(world.system_invocations(update).unwrap(), 0);

    world.run_pipeline(FRAME_PIPELINE, 1.0).unwrap();
    assert_eq!(world.system_invocations(update).unwrap(), 1);
}

#[test]
fn unknown_handles_are_errors() {
    let mut world = World::new();
    assert!(matches!(world.set_pipeline(42), Err(ECSError::Pipeline(PipelineError::Unknown(42)))));
    assert!(matches!(world.run_pipeline(7, 1.0), Err(ECSError::Pipeline(PipelineError::Unknown(7)))));
    assert!(matches!(world.enable_system(3, false), Err(ECSError::System(SystemError::Unknown(3)))));
    assert!(matches!(world.stage(1), Err(ECSError::Stage { index: 1, count: 1 })));

    world.readonly_begin(false);
    assert!(matches!(world.set_pipeline(FRAME_PIPELINE), Err(ECSError::Pipeline(PipelineError::Readonly))));
    world.readonly_end();
}

#[test]
fn disabled_systems_are_left_out_of_the_schedule() {
    let mut world = World::new();
    let id = world.system(SystemDesc::new("sleepy").disabled());

    world.advance_frame(1.0);
    assert_eq!(world.system_invocations(id).unwrap(), 0);
    assert!(world.pipeline_state(FRAME_PIPELINE).unwrap().systems().is_empty());

    world.enable_system(id, true).unwrap();
    world.advance_frame(1.0);
    assert_eq!(world.system_invocations(id).unwrap(), 1);
}

#[test]
fn immediate_systems_mutate_the_store_directly() {
    let mut world = World::new();
    let marker = world.tag("Marker");
    let checked = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&checked);
    world.system(SystemDesc::new("direct").immediate(true).run(move |ctx| {
        assert!(!ctx.world().is_readonly());
        let e = ctx.new_entity();
        ctx.add(e, marker);
        sink.store(ctx.has(e, marker), Ordering::SeqCst);
    }));

    world.advance_frame(1.0);
    assert!(checked.load(Ordering::SeqCst));
    assert_eq!(world.info().merge_count_total, 0);
}

#[test]
fn async_stage_stays_deferred_across_merges() {
    let mut world = World::new();
    let position = world.register::<Position>();
    let e = world.new_entity();

    let id = world.async_stage();
    let stage = world.async_stage_ref(id).unwrap();
    assert!(stage.is_deferred());
    stage.add(e, position);
    assert!(!world.has(e, position));

    world.merge_async(id).unwrap();
    assert!(world.has(e, position));
    assert!(world.async_stage_ref(id).unwrap().is_deferred());
    assert!(world.merge_async(id + 1).is_err());
}

#[test]
fn stage_handles_record_into_their_own_queue() {
    let mut world = World::with_config(WorldConfig::default().with_threads(2)).unwrap();
    let position = world.register::<Position>();
    let e = world.new_entity();

    world.readonly_begin(true);
    assert!(world.is_multi_threaded());
    let second = world.stage(1).unwrap();
    second.add(e, position);
    assert_eq!(second.command_count(), 1);
    assert_eq!(world.main_stage().command_count(), 0);
    world.readonly_end();

    assert!(world.has(e, position));
}

#[test]
fn time_scale_applies_to_frame_delta() {
    let config = WorldConfig::from_toml_str("time_scale = 2.0\nmeasure_system_time = true").unwrap();
    let mut world = World::with_config(config).unwrap();
    world.system(SystemDesc::new("noop"));

    world.advance_frame(0.25);
    world.advance_frame(0.25);

    let info = world.info();
    assert!((info.delta_time - 0.5).abs() < f32::EPSILON);
    assert!((info.world_time_total - 1.0).abs() < 1e-9);
    assert_eq!(info.systems_ran_total, 2);
}

#[test]
fn config_parses_and_validates() {
    let config = WorldConfig::from_toml_str("threads = 3\nthread_name_prefix = \"sim\"").unwrap();
    assert_eq!(config.threads, 3);
    assert_eq!(config.thread_name_prefix, "sim");
    assert_eq!(config.time_scale, 1.0);

    let world = World::with_config(config).unwrap();
    assert_eq!(world.stage_count(), 3);

    assert!(matches!(
        WorldConfig::from_toml_str("threads = 0"),
        Err(ConfigError::Invalid { field: "threads", .. })
    ));
    assert!(matches!(
        WorldConfig::from_toml_str("time_scale = -1.0"),
        Err(ConfigError::Invalid { field: "time_scale", .. })
    ));
    assert!(matches!(
        WorldConfig::from_toml_str("target_fps = -5.0"),
        Err(ConfigError::Invalid { field: "target_fps", .. })
    ));
    assert!(matches!(WorldConfig::from_toml_str("threads = \"many\""), Err(ConfigError::Parse(_))));
    assert!(matches!(
        World::with_config(WorldConfig::default().with_threads(0)),
        Err(ECSError::Config(ConfigError::Invalid { .. }))
    ));
}

#[test]
fn zero_delta_frames_measure_wall_clock_time() {
    init_tracing();
    let mut world = World::new();
    let periodic = world.system(SystemDesc::new("periodic").interval(0.001));

    world.advance_frame(0.0);
    let first = world.info().delta_time;
    assert!((first - 1.0 / 60.0).abs() < 1e-6);

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(5));
        world.advance_frame(0.0);
    }

    let info = world.info();
    assert!(info.delta_time >= 0.005);
    assert!(info.world_time_total >= f64::from(first) + 0.025);
    assert_eq!(world.system_invocations(periodic).unwrap(), 6);
}

#[test]
fn target_fps_throttles_frames() {
    let config = WorldConfig::default().with_target_fps(50.0).with_measure_frame_time(true);
    let mut world = World::with_config(config).unwrap();
    world.system(SystemDesc::new("noop"));

    world.advance_frame(0.0);
    assert!((world.info().delta_time - 0.02).abs() < 1e-6);

    let started = Instant::now();
    world.advance_frame(0.0);
    world.advance_frame(0.0);
    assert!(started.elapsed() >= Duration::from_millis(40));

    let info = world.info();
    assert!(info.delta_time >= 0.019);
    assert!(info.frame_time_total > Duration::ZERO);

    assert!(matches!(
        world.set_target_fps(-1.0),
        Err(ECSError::Config(ConfigError::Invalid { field: "target_fps", .. }))
    ));
    world.set_target_fps(0.0).unwrap();
    assert_eq!(world.config().target_fps, 0.0);
}

#[test]
fn reset_clock_restarts_world_time() {
    let mut world = World::new();
    world.advance_frame(1.0);
    world.advance_frame(1.0);
    assert!((world.info().world_time_total - 2.0).abs() < 1e-9);

    world.reset_clock();
    assert_eq!(world.info().world_time_total, 0.0);

    std::thread::sleep(Duration::from_millis(30));
    world.advance_frame(0.0);
    let info = world.info();
    assert!((info.delta_time - 1.0 / 60.0).abs() < 1e-6);
    assert!((info.world_time_total - f64::from(info.delta_time)).abs() < 1e-9);
    assert_eq!(info.frame_count_total, 3);
}

#[test]
fn deactivate_systems_drops_unmatched_systems() {
    let mut world = World::new();
    let position = world.register::<Position>();
    let idle = world.tag("Idle");
    let movers = world.system(SystemDesc::new("move").query(QueryBuilder::new().write(position)));
    let idlers = world.system(SystemDesc::new("idle").query(QueryBuilder::new().with(idle)));
    let e = world.new_entity();
    world.set(e, Position { x: 1.0, y: 1.0 });

    world.advance_frame(1.0);
    let builds = world.pipeline_state(FRAME_PIPELINE).unwrap().rebuild_count();

    assert_eq!(world.deactivate_systems().unwrap(), 1);
    world.advance_frame(1.0);

    let state = world.pipeline_state(FRAME_PIPELINE).unwrap();
    assert_eq!(state.rebuild_count(), builds + 1);
    assert_eq!(state.systems(), &[movers]);
    assert_eq!(world.system_invocations(idlers).unwrap(), 0);
    assert_eq!(world.system_invocations(movers).unwrap(), 2);

    world.readonly_begin(false);
    assert!(matches!(world.deactivate_systems(), Err(ECSError::Pipeline(PipelineError::Readonly))));
    world.readonly_end();
}
