use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use abm_pipeline::engine::commands::{CommandKind, CommandQueue};
use abm_pipeline::engine::component::ComponentValue;
use abm_pipeline::engine::merge::{self, CommandStats};
use abm_pipeline::engine::storage::{EventKind, Store};
use abm_pipeline::engine::types::Id;
use abm_pipeline::World;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Health(u32);

fn world() -> (World, Id, Id) {
    let mut world = World::new();
    let position = world.register::<Position>();
    let health = world.register::<Health>();
    (world, position, health)
}

#[test]
fn per_entity_order_survives_interleaving() {
    let (world, position, _) = world();
    let a = world.new_entity();
    let b = world.new_entity();

    world.defer_begin();
    world.add(a, position);
    world.set(b, Health(5));
    world.remove(a, position);
    world.set(a, Health(1));
    world.add(b, position);

    assert!(!world.has(a, position));
    assert_eq!(world.get::<Health>(b), None);
    assert!(world.defer_end());

    assert!(!world.has(a, position));
    assert_eq!(world.get::<Health>(a), Some(Health(1)));
    assert_eq!(world.get::<Health>(b), Some(Health(5)));
    assert_eq!(world.get::<Position>(b), Some(Position::default()));

    let cmd = world.info().cmd;
    assert_eq!(cmd.batched_entity_count, 2);
    assert_eq!(cmd.batched_command_count, 5);
}

#[test]
fn add_then_remove_cancels_without_touching_tables() {
    let (world, position, _) = world();
    let e = world.new_entity();

    world.defer_begin();
    world.add(e, position);
    world.remove(e, position);
    world.defer_end();

    assert!(!world.has(e, position));
    assert_eq!(world.with_store(|store| store.table_count()), 0);
    let cmd = world.info().cmd;
    assert_eq!(cmd.add_count, 1);
    assert_eq!(cmd.remove_count, 1);
}

#[test]
fn remove_then_add_is_a_no_op() {
    let (world, position, _) = world();
    let e = world.new_entity();
    world.set(e, Position { x: 1.0, y: 2.0 });

    world.defer_begin();
    world.remove(e, position);
    world.add(e, position);
    world.defer_end();

    assert!(world.has(e, position));
    assert_eq!(world.get::<Position>(e), Some(Position { x: 1.0, y: 2.0 }));
}

#[test]
fn merging_an_empty_queue_changes_nothing() {
    let mut store = Store::new();
    store.registry_mut().register::<Health>();
    let e = store.new_entity();
    let version = store.activity_version();

    let mut queue = CommandQueue::new();
    assert_eq!(merge::flush(&mut store, &mut queue), 0);
    assert_eq!(merge::flush(&mut store, &mut queue), 0);

    assert_eq!(store.stats(), &CommandStats::default());
    assert_eq!(store.activity_version(), version);
    assert!(!store.eval_component_monitors());
    assert!(store.is_alive(e));
    assert_eq!(store.entity_count(), 1);
}

#[test]
fn commands_for_dead_entities_are_discarded() {
    let (world, position, _) = world();
    let doomed = world.new_entity();
    let already_dead = world.new_entity();
    world.delete(already_dead);

    world.defer_begin();
    world.delete(doomed);
    world.add(doomed, position);
    world.set(doomed, Health(3));
    world.add(already_dead, position);
    world.clear(already_dead);
    world.defer_end();

    assert!(!world.is_alive(doomed));
    let cmd = world.info().cmd;
    assert_eq!(cmd.delete_count, 1);
    assert_eq!(cmd.discard_count, 4);
}

#[test]
fn set_writes_in_place_when_the_value_is_owned() {
    let (world, _, health) = world();
    let owner = world.new_entity();
    let newcomer = world.new_entity();
    world.set(owner, Health(1));

    world.defer_begin();
    world.set(owner, Health(7));
    world.set(newcomer, Health(3));

    assert_eq!(world.get::<Health>(owner), Some(Health(7)));
    assert!(!world.has(newcomer, health));
    assert_eq!(world.main_stage().command_count(), 2);
    world.defer_end();

    assert_eq!(world.get::<Health>(newcomer), Some(Health(3)));
    assert_eq!(world.info().cmd.set_count, 2);
}

#[test]
fn emplace_constructs_then_initializes() {
    let (world, _, _) = world();
    let fresh = world.new_entity();
    let owner = world.new_entity();
    world.set(owner, Position { x: 1.0, y: 1.0 });

    world.defer_begin();
    world.emplace::<Position>(fresh, |p| p.x = 3.0);
    world.emplace::<Position>(owner, |p| p.y = 9.0);
    assert_eq!(world.get::<Position>(owner), Some(Position { x: 1.0, y: 9.0 }));
    world.defer_end();

    assert_eq!(world.get::<Position>(fresh), Some(Position { x: 3.0, y: 0.0 }));
    assert_eq!(world.info().cmd.ensure_count, 1);
}

#[test]
fn emplace_initializer_may_read_the_world() {
    let (world, position, _) = world();
    let world = Arc::new(world);
    let handle = Arc::clone(&world);
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let e = handle.new_entity();
        handle.emplace::<Position>(e, |p| p.x = if handle.is_alive(e) { 1.0 } else { 0.0 });

        handle.defer_begin();
        handle.emplace::<Position>(e, |p| p.y = if handle.has(e, position) { 2.0 } else { 0.0 });
        let other = handle.new_entity();
        handle.emplace::<Position>(other, |p| p.y = handle.get::<Position>(e).map_or(0.0, |q| q.y));
        handle.defer_end();

        let _ = tx.send((handle.get::<Position>(e), handle.get::<Position>(other)));
    });

    let (e, other) = rx.recv_timeout(Duration::from_secs(5)).expect("emplace did not return");
    assert_eq!(e, Some(Position { x: 1.0, y: 2.0 }));
    assert_eq!(other, Some(Position { x: 0.0, y: 2.0 }));
}

#[test]
fn queue_links_commands_per_entity() {
    let (world, position, health) = world();
    let a = world.new_entity();
    let b = world.new_entity();

    let mut queue = CommandQueue::new();
    queue.push(Some(a), CommandKind::Add { id: position });
    queue.push(Some(b), CommandKind::Add { id: health });
    queue.push(Some(a), CommandKind::Remove { id: position });
    queue.push(None, CommandKind::Skip);

    assert_eq!(queue.len(), 4);
    assert_eq!(queue.first_for(a), Some(0));
    assert_eq!(queue.first_for(b), Some(1));
    assert!(queue.commands()[0].head);
    assert!(queue.commands()[1].head);
    assert!(!queue.commands()[2].head);
    assert_eq!(queue.commands()[0].next_for_entity, Some(2));
    assert_eq!(queue.commands()[2].next_for_entity, None);

    let chain: Vec<bool> = queue.chain(a)
        .map(|command| matches!(command.kind, CommandKind::Add { .. }))
        .collect();
    assert_eq!(chain, vec![true, false]);

    queue.reset();
    assert!(queue.is_empty());
    assert_eq!(queue.first_for(a), None);
}

#[test]
#[should_panic(expected = "mismatching size")]
fn set_with_wrong_payload_size_panics_at_merge() {
    let mut store = Store::new();
    let health = Id::component(store.registry_mut().register::<Health>());
    let e = store.new_entity();

    let mut queue = CommandQueue::new();
    let value = queue.push_value(ComponentValue::new(7u64));
    queue.push(Some(e), CommandKind::Set { id: health, value });
    merge::flush(&mut store, &mut queue);
}

#[test]
fn observers_fire_at_merge_not_at_enqueue() {
    let (mut world, position, _) = world();
    let added = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&added);
    world.observe(EventKind::OnAdd, Some(position), move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let e = world.new_entity();
    world.defer_begin();
    world.add(e, position);
    assert_eq!(added.load(Ordering::SeqCst), 0);
    world.defer_end();
    assert_eq!(added.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_events_carry_their_payload() {
    let (mut world, _, _) = world();
    let ping = world.tag("Ping");
    let seen = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&seen);
    world.observe(EventKind::Custom(ping), None, move |_, event| {
        if let Some(value) = event.param.and_then(|p| p.downcast_ref::<u32>()) {
            sink.store(*value, Ordering::SeqCst);
        }
    });

    let e = world.new_entity();
    world.defer_begin();
    world.main_stage().enqueue(EventKind::Custom(ping), Some(e), vec![ping], Some(ComponentValue::new(42u32)));
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    world.defer_end();

    assert_eq!(seen.load(Ordering::SeqCst), 42);
    assert_eq!(world.info().cmd.event_count, 1);
}

#[test]
fn clone_name_and_bulk_commands_apply_at_merge() {
    let (world, _, health) = world();
    let source = world.new_entity();
    world.set(source, Health(11));
    let root = world.new_entity();

    let stage = world.main_stage();
    stage.defer_begin();
    let copy = stage.clone_entity(source, true);
    stage.set_name(root, None, "root");
    stage.set_name(copy, Some(root), "copy");
    let batch = stage.bulk_new(3, Some(health));

    assert!(world.is_alive(copy));
    assert!(!world.has(copy, health));
    stage.defer_end();

    assert_eq!(world.get::<Health>(copy), Some(Health(11)));
    assert_eq!(world.path(copy).as_deref(), Some("root::copy"));
    assert!(batch.iter().all(|&e| world.get::<Health>(e) == Some(Health::default())));

    world.delete(root);
    assert!(!world.is_alive(copy));
}

#[test]
fn cleanup_actions_run_in_enqueue_order() {
    let (world, position, health) = world();
    let entities: Vec<_> = (0..4).map(|_| world.new_entity()).collect();
    for &e in &entities {
        world.add(e, position);
        world.add(e, health);
    }

    let stage = world.main_stage();
    stage.defer_begin();
    stage.remove_all(position);
    stage.delete_with(health);
    stage.defer_end();

    assert!(entities.iter().all(|&e| !world.is_alive(e)));
}

#[test]
fn non_structural_commands_apply_at_their_queue_position() {
    let (mut world, position, _) = world();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    world.observe(EventKind::OnSet, Some(position), move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let e = world.new_entity();
    let stage = world.main_stage();
    stage.defer_begin();
    stage.add(e, position);
    stage.modified(e, position);
    stage.remove_all(position);
    stage.modified(e, position);
    stage.defer_end();

    assert!(!world.has(e, position));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let cmd = world.info().cmd;
    assert_eq!(cmd.add_count, 1);
    assert_eq!(cmd.modified_count, 2);
    assert_eq!(cmd.batched_entity_count, 1);
}

#[test]
fn disabled_ids_are_restored_by_enable() {
    let (world, position, _) = world();
    let e = world.new_entity();
    world.add(e, position);

    world.defer_begin();
    world.disable(e, position);
    assert!(world.with_store(|store| store.is_enabled(e, position)));
    world.defer_end();
    assert!(!world.with_store(|store| store.is_enabled(e, position)));

    world.enable(e, position);
    assert!(world.with_store(|store| store.is_enabled(e, position)));
}
