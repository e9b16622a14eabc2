//! # Merge Engine
//!
//! Applies a drained [`CommandQueue`] to the [`Store`].
//!
//! ## Algorithm
//! Commands are visited in enqueue order and each one takes effect at its own
//! position in the queue:
//!
//! - A run of consecutive structural commands (add, remove, clear, set,
//!   emplace, add-modified) in an entity's chain is folded into one pending
//!   target type plus the values to install, and committed as a single table
//!   move where the run starts. Its later members are then skipped.
//! - Any other command (modified, delete, enable, clone, path, events) is
//!   applied where it appears, after whatever the queue did before it.
//! - Once the entity is dead, its remaining commands are discarded.
//!
//! Commands without an entity are applied where they appear.
//!
//! ## Panics
//! A payload whose size or type does not match its component is a broken
//! invariant and panics.

use tracing::{debug, trace};

use crate::engine::commands::{CommandKind, CommandQueue, ValueSlot, ValueStack};
use crate::engine::component::ComponentValue;
use crate::engine::entity::Entity;
use crate::engine::storage::Store;
use crate::engine::types::Id;


/// Counters of applied commands, accumulated over the life of a store.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// `add` commands applied.
    pub add_count: u64,
    /// `remove` commands applied.
    pub remove_count: u64,
    /// `set` commands applied (including in-place writes).
    pub set_count: u64,
    /// `emplace` commands applied.
    pub ensure_count: u64,
    /// `modified` commands applied.
    pub modified_count: u64,
    /// `delete` commands applied.
    pub delete_count: u64,
    /// `clear` commands applied.
    pub clear_count: u64,
    /// Events emitted.
    pub event_count: u64,
    /// Other commands applied.
    pub other_count: u64,
    /// Commands dropped because their entity was dead.
    pub discard_count: u64,
    /// Table moves produced by folding structural runs.
    pub batched_entity_count: u64,
    /// Structural commands folded into those moves.
    pub batched_command_count: u64,
}

fn take_value(values: &mut ValueStack, slot: ValueSlot) -> ComponentValue {
    match values.take(slot) {
        Some(value) => value,
        None => unreachable!("command value slot {slot:?} consumed twice"),
    }
}

#[derive(Default)]
struct Batch {
    target: Option<Vec<Id>>,
    values: Vec<(Id, ComponentValue)>,
    modified: Vec<Id>,
    commands: u64,
}

impl Batch {
    fn push(&mut self, store: &mut Store, entity: Entity, kind: CommandKind, values: &mut ValueStack) {
        let target = self.target.get_or_insert_with(|| store.type_of(entity));
        self.commands += 1;
        let include = |target: &mut Vec<Id>, id: Id| {
            if !target.contains(&id) {
                target.push(id);
            }
        };
        match kind {
            CommandKind::Add { id } => {
                include(target, id);
                store.stats.add_count += 1;
            }
            CommandKind::Remove { id } => {
                target.retain(|t| !t.matches(id));
                self.values.retain(|(t, _)| !t.matches(id));
                self.modified.retain(|t| !t.matches(id));
                store.stats.remove_count += 1;
            }
            CommandKind::Clear => {
                target.clear();
                self.values.clear();
                self.modified.clear();
                store.stats.clear_count += 1;
            }
            CommandKind::Set { id, value } | CommandKind::Emplace { id, value } => {
                let is_set = matches!(kind, CommandKind::Set { .. });
                let value = take_value(values, value);
                store.registry().check_value(id.first(), &value);
                include(target, id);
                self.values.retain(|(t, _)| *t != id);
                self.values.push((id, value));
                if is_set {
                    self.modified.push(id);
                    store.stats.set_count += 1;
                } else {
                    store.stats.ensure_count += 1;
                }
            }
            CommandKind::AddModified { id } => {
                include(target, id);
                self.modified.push(id);
                store.stats.set_count += 1;
            }
            other => unreachable!("{other:?} is not a structural command"),
        }
    }

    fn commit(&mut self, store: &mut Store, entity: Entity) {
        let Some(target) = self.target.take() else { return };
        store.commit(entity, target, std::mem::take(&mut self.values));
        for id in std::mem::take(&mut self.modified) {
            store.modified(entity, id);
        }
        store.stats.batched_entity_count += 1;
        store.stats.batched_command_count += std::mem::take(&mut self.commands);
    }
}

fn apply(store: &mut Store, entity: Option<Entity>, kind: CommandKind, values: &mut ValueStack) {
    match (kind, entity) {
        (CommandKind::Modified { id }, Some(entity)) => {
            store.modified(entity, id);
            store.stats.modified_count += 1;
        }
        (CommandKind::Delete, Some(entity)) => {
            store.delete(entity);
            store.stats.delete_count += 1;
        }
        (CommandKind::Enable { id }, Some(entity)) => {
            store.set_enabled(entity, id, true);
            store.stats.other_count += 1;
        }
        (CommandKind::Disable { id }, Some(entity)) => {
            store.set_enabled(entity, id, false);
            store.stats.other_count += 1;
        }
        (CommandKind::Clone { source, copy_values }, Some(entity)) => {
            store.clone_entity(entity, source, copy_values);
            store.stats.other_count += 1;
        }
        (CommandKind::Path { parent, name }, Some(entity)) => {
            store.set_name(entity, parent, name);
            store.stats.other_count += 1;
        }
        (CommandKind::Event { event, ids, param }, entity) => {
            let param = param.map(|slot| take_value(values, slot));
            for id in ids {
                store.emit(event, entity, id, param.as_ref());
            }
            store.stats.event_count += 1;
        }
        (CommandKind::BulkNew { entities, id }, _) => {
            if let Some(id) = id {
                for entity in entities {
                    store.add(entity, id);
                }
            }
            store.stats.other_count += 1;
        }
        (CommandKind::OnDeleteAction { id, action }, _) => {
            store.on_delete_action(id, action);
            store.stats.other_count += 1;
        }
        (kind, entity) => {
            trace!(?kind, ?entity, "discarding command");
            store.stats.discard_count += 1;
        }
    }
}

/// Applies every command of `queue` to `store` and resets the queue.
///
/// Returns the number of commands visited.

pub fn flush(store: &mut Store, queue: &mut CommandQueue) -> usize {
    let (mut commands, mut values) = queue.drain();
    let total = commands.len();
    if total == 0 {
        return 0;
    }
    let discarded_before = store.stats.discard_count;

    let mut folded = vec![false; total];
    for index in 0..total {
        if folded[index] {
            continue;
        }
        let command = &mut commands[index];
        let kind = std::mem::replace(&mut command.kind, CommandKind::Skip);
        let mut cursor = command.next_for_entity;
        let Some(entity) = command.entity else {
            apply(store, None, kind, &mut values);
            continue;
        };
        if !store.is_alive(entity) || matches!(kind, CommandKind::Skip) {
            store.stats.discard_count += 1;
            continue;
        }
        if !kind.is_structural() {
            apply(store, Some(entity), kind, &mut values);
            continue;
        }

        let mut batch = Batch::default();
        batch.push(store, entity, kind, &mut values);
        while let Some(link) = cursor.map(|link| link as usize) {
            let command = &mut commands[link];
            if !command.kind.is_structural() {
                break;
            }
            cursor = command.next_for_entity;
            folded[link] = true;
            let kind = std::mem::replace(&mut command.kind, CommandKind::Skip);
            batch.push(store, entity, kind, &mut values);
        }
        batch.commit(store, entity);
    }

    values.reset();
    debug!(
        commands = total,
        discarded = store.stats.discard_count - discarded_before,
        "merged command queue"
    );
    total
}
