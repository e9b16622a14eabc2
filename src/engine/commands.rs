//! # Commands
//!
//! Deferred mutations recorded by a stage while the world is readonly.
//!
//! ## Purpose
//! Systems running inside a readonly region cannot touch the store's
//! structure. They record [`Command`]s into their stage's [`CommandQueue`];
//! the merge engine applies them at the next synchronization point.
//!
//! ## Design
//! - A command is a tagged [`CommandKind`] carrying only the payload its kind
//!   needs, plus the target entity.
//! - Commands targeting the same entity form a chain: each links to the next
//!   command for that entity by index, and the first one is marked as the
//!   chain head. A side map tracks `first`/`last` per entity while the queue
//!   fills.
//! - Values travel on a scratch stack owned by the queue and are referenced by
//!   [`ValueSlot`]. The stack is reset when the queue is drained.
//!
//! ## Invariants
//! - Following `next_for_entity` from a head visits exactly the commands for
//!   that entity, in enqueue order.
//! - Only chain heads are marked with `head`.
//! - The side map is empty whenever the command list is empty.

use std::collections::HashMap;

use crate::engine::component::ComponentValue;
use crate::engine::entity::Entity;
use crate::engine::storage::{DeleteAction, EventKind};
use crate::engine::types::Id;


/// Index of a value on a queue's scratch stack.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueSlot(u32);

/// Scratch storage for command payloads.

#[derive(Default, Debug)]
pub struct ValueStack {
    slots: Vec<Option<ComponentValue>>,
}

impl ValueStack {
    /// Pushes a value and returns its slot.
    pub fn push(&mut self, value: ComponentValue) -> ValueSlot {
        self.slots.push(Some(value));
        ValueSlot((self.slots.len() - 1) as u32)
    }

    /// Moves the value out of `slot`. Each slot can be taken once.
    pub fn take(&mut self, slot: ValueSlot) -> Option<ComponentValue> {
        self.slots.get_mut(slot.0 as usize).and_then(Option::take)
    }

    /// Drops every remaining value.
    pub fn reset(&mut self) { self.slots.clear(); }

    /// Number of slots pushed since the last reset.
    pub fn len(&self) -> usize { self.slots.len() }

    /// Returns `true` if nothing was pushed since the last reset.
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
}

/// Payload of a deferred command.

#[derive(Debug)]
pub enum CommandKind {
    /// Add an id (default-constructed if it carries data).
    Add {
        /// Id to add.
        id: Id,
    },
    /// Remove every id matching a pattern.
    Remove {
        /// Id or pattern to remove.
        id: Id,
    },
    /// Add an id with a value copied at enqueue time.
    Set {
        /// Target id.
        id: Id,
        /// Value on the scratch stack.
        value: ValueSlot,
    },
    /// Add an id with a value constructed at enqueue time.
    Emplace {
        /// Target id.
        id: Id,
        /// Value on the scratch stack.
        value: ValueSlot,
    },
    /// The value was already written in place; ensure the id and notify.
    AddModified {
        /// Target id.
        id: Id,
    },
    /// Notify that a value changed.
    Modified {
        /// Target id.
        id: Id,
    },
    /// Remove every id from the entity.
    Clear,
    /// Delete the entity.
    Delete,
    /// Enable an id on the entity.
    Enable {
        /// Target id.
        id: Id,
    },
    /// Disable an id on the entity.
    Disable {
        /// Target id.
        id: Id,
    },
    /// Copy the type (and optionally the values) of another entity.
    Clone {
        /// Entity to copy from.
        source: Entity,
        /// Copy values instead of default-constructing them.
        copy_values: bool,
    },
    /// Name the entity under an optional parent.
    Path {
        /// Parent entity.
        parent: Option<Entity>,
        /// Entity name.
        name: String,
    },
    /// Give a batch of reserved entities an id.
    BulkNew {
        /// Reserved entities.
        entities: Vec<Entity>,
        /// Id to add to each, if any.
        id: Option<Id>,
    },
    /// Emit an event to observers.
    Event {
        /// Event to emit.
        event: EventKind,
        /// Ids the event is about.
        ids: Vec<Id>,
        /// Optional payload.
        param: Option<ValueSlot>,
    },
    /// Apply a cleanup action to every holder of an id.
    OnDeleteAction {
        /// Id being cleaned up.
        id: Id,
        /// Action to apply.
        action: DeleteAction,
    },
    /// Consumed; nothing to do.
    Skip,
}

impl CommandKind {
    /// Returns `true` for kinds the merge engine folds into a single table
    /// move.

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CommandKind::Add { .. }
                | CommandKind::Remove { .. }
                | CommandKind::Set { .. }
                | CommandKind::Emplace { .. }
                | CommandKind::AddModified { .. }
                | CommandKind::Clear
        )
    }
}

/// A recorded mutation.

#[derive(Debug)]
pub struct Command {
    /// What to do.
    pub kind: CommandKind,
    /// Target entity, if the command has one.
    pub entity: Option<Entity>,
    /// Index of the next command for the same entity.
    pub next_for_entity: Option<u32>,
    /// First command of this entity in the queue.
    pub head: bool,
}

#[derive(Clone, Copy, Debug)]
struct EntityEntry {
    first: u32,
    last: u32,
}

/// Ordered, per-stage command log.

#[derive(Default, Debug)]
pub struct CommandQueue {
    commands: Vec<Command>,
    entries: HashMap<Entity, EntityEntry>,
    values: ValueStack,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self { Self::default() }

    /// Number of recorded commands.
    #[inline] pub fn len(&self) -> usize { self.commands.len() }
    /// Returns `true` if nothing is recorded.
    #[inline] pub fn is_empty(&self) -> bool { self.commands.is_empty() }

    /// Commands in enqueue order.
    #[inline] pub fn commands(&self) -> &[Command] { &self.commands }

    /// Pushes a value onto the scratch stack.
    #[inline]
    pub fn push_value(&mut self, value: ComponentValue) -> ValueSlot { self.values.push(value) }

    /// Records a command and links it into its entity's chain.

    pub fn push(&mut self, entity: Option<Entity>, kind: CommandKind) -> u32 {
        let index = self.commands.len() as u32;
        let mut head = false;
        if let Some(entity) = entity {
            match self.entries.get_mut(&entity) {
                Some(entry) => {
                    self.commands[entry.last as usize].next_for_entity = Some(index);
                    entry.last = index;
                }
                None => {
                    self.entries.insert(entity, EntityEntry { first: index, last: index });
                    head = true;
                }
            }
        }
        self.commands.push(Command { kind, entity, next_for_entity: None, head });
        index
    }

    /// Iterates the chain of `entity` in enqueue order.

    pub fn chain(&self, entity: Entity) -> impl Iterator<Item = &Command> + '_ {
        let mut cursor = self.entries.get(&entity).map(|entry| entry.first);
        std::iter::from_fn(move || {
            let command = &self.commands[cursor? as usize];
            cursor = command.next_for_entity;
            Some(command)
        })
    }

    /// Index of the first command recorded for `entity`.
    pub fn first_for(&self, entity: Entity) -> Option<u32> {
        self.entries.get(&entity).map(|entry| entry.first)
    }

    /// Takes the commands and values, leaving the queue empty.
    pub(crate) fn drain(&mut self) -> (Vec<Command>, ValueStack) {
        self.entries.clear();
        (std::mem::take(&mut self.commands), std::mem::take(&mut self.values))
    }

    /// Drops every recorded command and value.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.entries.clear();
        self.values.reset();
    }
}
