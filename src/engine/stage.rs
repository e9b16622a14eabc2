//! # Stages
//!
//! A [`Stage`] is a per-thread mutation context: a defer counter plus a
//! [`CommandQueue`]. Every managed stage belongs to one worker (stage 0 is the
//! calling thread); unmanaged stages are created on demand for user threads.
//!
//! ## Defer counter
//! - `0`: mutations apply directly to the store.
//! - `> 0`: mutations are recorded; ending the outermost scope flushes.
//! - `< 0`: suspended; mutations apply directly until resumed.
//!
//! ## StageRef
//! [`StageRef`] is the handle systems and callers use to read the store and to
//! issue mutations through a stage. Every mutating call either records a
//! command (deferred) or applies immediately, in which case the world must not
//! be readonly.
//!
//! ## Invariants
//! - A stage's queue is only touched by the thread that owns the stage, or by
//!   the merge on the calling thread while no op is running.
//! - No lock is held while a system callback runs.

use parking_lot::Mutex;
use tracing::trace;

use crate::engine::commands::{CommandKind, CommandQueue};
use crate::engine::component::{Component, ComponentValue};
use crate::engine::entity::Entity;
use crate::engine::manager::World;
use crate::engine::merge;
use crate::engine::storage::{DeleteAction, EventKind, Store};
use crate::engine::types::Id;


/// Per-thread mutation context.

#[derive(Debug)]
pub struct Stage {
    id: Option<usize>,
    defer: i32,
    queue: CommandQueue,
}

impl Stage {
    /// Creates a stage. `None` marks an unmanaged stage.
    pub fn new(id: Option<usize>) -> Self {
        Self { id, defer: 0, queue: CommandQueue::new() }
    }

    /// Creates an unmanaged stage, already deferred.
    pub fn unmanaged() -> Self {
        let mut stage = Self::new(None);
        stage.defer_begin();
        stage
    }

    /// Managed stage index, `None` for unmanaged stages.
    #[inline] pub fn id(&self) -> Option<usize> { self.id }
    /// Current defer counter.
    #[inline] pub fn defer_depth(&self) -> i32 { self.defer }
    /// Returns `true` if mutations are being recorded.
    #[inline] pub fn is_deferred(&self) -> bool { self.defer > 0 }
    /// Returns `true` if deferral is suspended.
    #[inline] pub fn is_suspended(&self) -> bool { self.defer < 0 }
    /// Recorded commands.
    #[inline] pub fn queue(&self) -> &CommandQueue { &self.queue }

    /// Opens a defer scope.
    ///
    /// Returns `true` if this call started deferring. Does nothing while
    /// suspended.

    pub fn defer_begin(&mut self) -> bool {
        if self.defer < 0 {
            return false;
        }
        self.defer += 1;
        self.defer == 1
    }

    /// Closes a defer scope.
    ///
    /// Returns the recorded commands when the outermost scope closes and
    /// something was recorded. Does nothing while suspended.
    ///
    /// ## Panics
    /// Panics if no scope is open.

    pub fn defer_end(&mut self) -> Option<CommandQueue> {
        if self.defer < 0 {
            return None;
        }
        assert!(self.defer > 0, "defer_end called without a matching defer_begin");
        self.defer -= 1;
        if self.defer == 0 && !self.queue.is_empty() {
            Some(std::mem::take(&mut self.queue))
        } else {
            None
        }
    }

    /// Temporarily applies mutations directly.
    ///
    /// ## Panics
    /// Panics if the stage is not deferred.

    pub fn defer_suspend(&mut self) {
        assert!(self.defer > 0, "defer_suspend called on a stage that is not deferred");
        self.defer = -self.defer;
    }

    /// Resumes recording after [`Stage::defer_suspend`].
    ///
    /// ## Panics
    /// Panics if the stage is not suspended.

    pub fn defer_resume(&mut self) {
        assert!(self.defer < 0, "defer_resume called on a stage that is not suspended");
        self.defer = -self.defer;
    }

    fn record(&mut self, entity: Option<Entity>, kind: CommandKind) {
        self.queue.push(entity, kind);
    }
}

/// Handle for reading the store and mutating it through one stage.

#[derive(Clone, Copy)]
pub struct StageRef<'w> {
    world: &'w World,
    stage: &'w Mutex<Stage>,
}

impl<'w> StageRef<'w> {
    pub(crate) fn new(world: &'w World, stage: &'w Mutex<Stage>) -> Self {
        Self { world, stage }
    }

    /// World this stage belongs to.
    #[inline] pub fn world(&self) -> &'w World { self.world }

    /// Managed stage index, `None` for unmanaged stages.
    pub fn id(&self) -> Option<usize> { self.stage.lock().id() }

    /// Returns `true` if mutations are being recorded.
    pub fn is_deferred(&self) -> bool { self.stage.lock().is_deferred() }

    /// Number of commands recorded and not merged yet.
    pub fn command_count(&self) -> usize { self.stage.lock().queue().len() }

    /// Opens a defer scope. See [`Stage::defer_begin`].
    pub fn defer_begin(&self) -> bool { self.stage.lock().defer_begin() }

    /// Closes a defer scope, flushing into the store when the outermost scope
    /// closes.
    ///
    /// Returns `true` if commands were flushed.
    ///
    /// ## Panics
    /// Panics if a flush is required while the world is readonly.

    pub fn defer_end(&self) -> bool {
        let queue = self.stage.lock().defer_end();
        match queue {
            Some(mut queue) => {
                self.direct(|store| { merge::flush(store, &mut queue); });
                true
            }
            None => false,
        }
    }

    /// Suspends deferral. See [`Stage::defer_suspend`].
    pub fn defer_suspend(&self) { self.stage.lock().defer_suspend() }

    /// Resumes deferral. See [`Stage::defer_resume`].
    pub fn defer_resume(&self) { self.stage.lock().defer_resume() }

    // ── reads ──────────────────────────────────────────────────────────────

    /// Runs `f` with shared access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&self.world.store_lock().read_recursive())
    }

    /// Id registered for `T`.
    ///
    /// ## Panics
    /// Panics if `T` was never registered.

    pub fn component<T: 'static>(&self) -> Id {
        self.world.component::<T>()
    }

    /// Returns `true` if `entity` is alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.with_store(|store| store.is_alive(entity))
    }

    /// Returns `true` if `entity` has an id matching `id`.
    pub fn has(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        self.with_store(|store| store.has(entity, id))
    }

    /// Copy of the `T` component of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<T> {
        let id = self.component::<T>();
        self.with_store(|store| store.get::<T>(entity, id))
    }

    // ── mutations ──────────────────────────────────────────────────────────

    fn direct(&self, f: impl FnOnce(&mut Store)) {
        assert!(
            !self.world.is_readonly(),
            "cannot mutate the world directly while it is readonly; enter defer mode first"
        );
        f(&mut self.world.store_lock().write());
    }

    /// Records `kind` if deferred, otherwise hands it back for direct use.
    fn submit(&self, entity: Option<Entity>, kind: CommandKind) -> Option<CommandKind> {
        let mut stage = self.stage.lock();
        if !stage.is_deferred() {
            return Some(kind);
        }
        stage.record(entity, kind);
        None
    }

    /// Reserves a new entity. Safe while readonly.
    pub fn new_entity(&self) -> Entity {
        self.with_store(|store| store.new_entity())
    }

    /// Adds `id` to `entity`.
    pub fn add(&self, entity: Entity, id: impl Into<Id>) {
        let id = id.into();
        if self.submit(Some(entity), CommandKind::Add { id }).is_some() {
            self.direct(|store| store.add(entity, id));
        }
    }

    /// Removes every id matching `id` from `entity`.
    pub fn remove(&self, entity: Entity, id: impl Into<Id>) {
        let id = id.into();
        if self.submit(Some(entity), CommandKind::Remove { id }).is_some() {
            self.direct(|store| store.remove(entity, id));
        }
    }

    /// Assigns a type-erased value to `id` on `entity`.
    ///
    /// ## Semantics
    /// While deferred, if the entity already owns `id` the value is written in
    /// place immediately and an add-modified command is recorded; otherwise
    /// the value is stored with a set command.
    ///
    /// ## Panics
    /// An in-place write panics immediately on a size or type mismatch; a
    /// recorded one panics at merge.

    pub fn set_id(&self, entity: Entity, id: impl Into<Id>, value: ComponentValue) {
        let id = id.into();
        let mut stage = self.stage.lock();
        if !stage.is_deferred() {
            drop(stage);
            self.direct(|store| store.set(entity, id, value));
            return;
        }
        let written = self.world.store_lock().read_recursive().write_in_place(entity, id, value);
        match written {
            Ok(()) => stage.record(Some(entity), CommandKind::AddModified { id }),
            Err(value) => {
                let slot = stage.queue.push_value(value);
                stage.record(Some(entity), CommandKind::Set { id, value: slot });
            }
        }
    }

    /// Assigns `value` to the `T` component of `entity`.
    pub fn set<T: Component>(&self, entity: Entity, value: T) {
        let id = self.component::<T>();
        self.set_id(entity, id, ComponentValue::new(value));
    }

    /// Ensures `entity` has a `T` and initializes it with `init`.
    ///
    /// ## Semantics
    /// `init` runs on a copy of the current value, or on a default-constructed
    /// one, with no lock held, so it may read the world. While deferred, an
    /// owned value is then written back in place and an add command is
    /// recorded; otherwise the value is stored with an emplace command.
    ///
    /// ## Panics
    /// Panics if `T` has no default constructor and the entity lacks it.

    pub fn emplace<T: Component>(&self, entity: Entity, init: impl FnOnce(&mut T)) {
        let id = self.component::<T>();
        let mut value = self.with_store(|store| match store.get::<T>(entity, id) {
            Some(current) => ComponentValue::new(current),
            None => store.construct(id),
        });
        match value.downcast_mut::<T>() {
            Some(inner) => init(inner),
            None => unreachable!("constructor of {} built a {}", std::any::type_name::<T>(), value.type_name()),
        }

        let mut stage = self.stage.lock();
        if !stage.is_deferred() {
            drop(stage);
            self.direct(|store| {
                let mut ty = store.type_of(entity);
                ty.push(id);
                store.commit(entity, ty, vec![(id, value)]);
            });
            return;
        }
        let written = self.world.store_lock().read_recursive().write_in_place(entity, id, value);
        match written {
            Ok(()) => stage.record(Some(entity), CommandKind::Add { id }),
            Err(value) => {
                let slot = stage.queue.push_value(value);
                stage.record(Some(entity), CommandKind::Emplace { id, value: slot });
            }
        }
    }

    /// Flags the value of `id` on `entity` as changed.
    pub fn modified(&self, entity: Entity, id: impl Into<Id>) {
        let id = id.into();
        if self.submit(Some(entity), CommandKind::Modified { id }).is_some() {
            self.direct(|store| store.modified(entity, id));
        }
    }

    /// Removes every id from `entity`.
    pub fn clear(&self, entity: Entity) {
        if self.submit(Some(entity), CommandKind::Clear).is_some() {
            self.direct(|store| store.clear(entity));
        }
    }

    /// Deletes `entity`.
    pub fn delete(&self, entity: Entity) {
        if self.submit(Some(entity), CommandKind::Delete).is_some() {
            self.direct(|store| store.delete(entity));
        }
    }

    /// Enables `id` on `entity`.
    pub fn enable(&self, entity: Entity, id: impl Into<Id>) {
        let id = id.into();
        if self.submit(Some(entity), CommandKind::Enable { id }).is_some() {
            self.direct(|store| store.set_enabled(entity, id, true));
        }
    }

    /// Disables `id` on `entity`; queries skip the entity until re-enabled.
    pub fn disable(&self, entity: Entity, id: impl Into<Id>) {
        let id = id.into();
        if self.submit(Some(entity), CommandKind::Disable { id }).is_some() {
            self.direct(|store| store.set_enabled(entity, id, false));
        }
    }

    /// Creates a new entity with the type of `source`.
    ///
    /// Values are copied when `copy_values` is set.

    pub fn clone_entity(&self, source: Entity, copy_values: bool) -> Entity {
        let entity = self.new_entity();
        if self.submit(Some(entity), CommandKind::Clone { source, copy_values }).is_some() {
            self.direct(|store| store.clone_entity(entity, source, copy_values));
        }
        entity
    }

    /// Names `entity`, optionally under `parent`.
    pub fn set_name(&self, entity: Entity, parent: Option<Entity>, name: &str) {
        let kind = CommandKind::Path { parent, name: name.to_string() };
        if let Some(CommandKind::Path { parent, name }) = self.submit(Some(entity), kind) {
            self.direct(|store| store.set_name(entity, parent, name));
        }
    }

    /// Reserves `count` entities and gives each `id`, if any.
    pub fn bulk_new(&self, count: usize, id: Option<Id>) -> Vec<Entity> {
        let entities: Vec<Entity> = self.with_store(|store| (0..count).map(|_| store.new_entity()).collect());
        let kind = CommandKind::BulkNew { entities: entities.clone(), id };
        if self.submit(None, kind).is_some() {
            if let Some(id) = id {
                self.direct(|store| entities.iter().for_each(|&entity| store.add(entity, id)));
            }
        }
        entities
    }

    /// Emits `event` for `ids`, optionally about `entity` and with a payload.
    pub fn enqueue(&self, event: EventKind, entity: Option<Entity>, ids: Vec<Id>, param: Option<ComponentValue>) {
        let mut stage = self.stage.lock();
        if stage.is_deferred() {
            let param = param.map(|value| stage.queue.push_value(value));
            stage.record(entity, CommandKind::Event { event, ids, param });
            return;
        }
        drop(stage);
        self.direct(|store| {
            for id in ids {
                store.emit(event, entity, id, param.as_ref());
            }
        });
    }

    /// Removes `id` from every entity that has it.
    pub fn remove_all(&self, id: impl Into<Id>) {
        self.on_delete_action(id.into(), DeleteAction::Remove);
    }

    /// Deletes every entity that has `id`.
    pub fn delete_with(&self, id: impl Into<Id>) {
        self.on_delete_action(id.into(), DeleteAction::Delete);
    }

    fn on_delete_action(&self, id: Id, action: DeleteAction) {
        if self.submit(None, CommandKind::OnDeleteAction { id, action }).is_some() {
            trace!(%id, ?action, "applying cleanup action directly");
            self.direct(|store| store.on_delete_action(id, action));
        }
    }
}
