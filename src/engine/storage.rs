//! # Store
//!
//! The live entity/component store the merge engine writes into and systems
//! read from.
//!
//! ## Purpose
//! [`Store`] owns the tables, the entity allocator, names, disabled ids and
//! observers. It exposes two kinds of operations:
//!
//! - **shared** (`&self`): lookups, id reservation and in-place value writes.
//!   These are safe to call from any stage while the world is readonly.
//! - **structural** (`&mut self`): anything that moves an entity between
//!   tables. These run only when the world is not readonly, either directly
//!   or from a merge.
//!
//! ## Emptiness monitor
//! Whenever a table gains its first row or loses its last one the monitor is
//! marked dirty. [`Store::eval_component_monitors`] folds that into
//! `activity_version`, which the pipeline uses to decide whether the set of
//! active systems may have changed.
//!
//! ## Invariants
//! - An entity with a location has exactly one row in exactly one table.
//! - An entity without a location is alive but has an empty type.
//! - The table with an empty type is never created.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::trace;

use crate::engine::archetype::Table;
use crate::engine::component::{Component, ComponentRegistry, ComponentValue};
use crate::engine::entity::{Entities, Entity, EntityLocation};
use crate::engine::merge::CommandStats;
use crate::engine::query::Query;
use crate::engine::types::{Id, TableID, RowID};


/// Built-in and user events delivered to observers.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An id was added to an entity.
    OnAdd,
    /// An id was removed from an entity (including on delete).
    OnRemove,
    /// A value was assigned or flagged as modified.
    OnSet,
    /// User event identified by an id.
    Custom(Id),
}

/// Data passed to an observer callback.

#[derive(Debug)]
pub struct ObserverEvent<'a> {
    /// Event kind.
    pub event: EventKind,
    /// Entity the event is about, if any.
    pub entity: Option<Entity>,
    /// Id the event is about.
    pub id: Id,
    /// Optional payload of a custom event.
    pub param: Option<&'a ComponentValue>,
}

/// Observer callback signature.
pub type ObserverFn = Box<dyn Fn(&Store, &ObserverEvent<'_>) + Send + Sync>;

struct Observer {
    event: EventKind,
    filter: Option<Id>,
    callback: ObserverFn,
}

/// What to do with entities holding an id when that id is cleaned up.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteAction {
    /// Remove the id from every entity that has it.
    Remove,
    /// Delete every entity that has the id.
    Delete,
}

#[derive(Clone, Debug)]
struct EntityName {
    parent: Option<Entity>,
    name: String,
}

#[derive(Default)]
struct EmptinessMonitor {
    dirty: bool,
    activity_version: u64,
}

/// Entity/component store.

#[derive(Default)]
pub struct Store {
    registry: ComponentRegistry,
    entities: RwLock<Entities>,
    tables: Vec<Table>,
    table_index: HashMap<Vec<Id>, TableID>,
    names: HashMap<Entity, EntityName>,
    disabled: HashSet<(Entity, Id)>,
    observers: Vec<Observer>,
    monitor: EmptinessMonitor,
    pub(crate) stats: CommandStats,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self { Self::default() }

    /// Component registry.
    #[inline] pub fn registry(&self) -> &ComponentRegistry { &self.registry }
    /// Mutable component registry.
    #[inline] pub fn registry_mut(&mut self) -> &mut ComponentRegistry { &mut self.registry }
    /// Command statistics accumulated by merges.
    #[inline] pub fn stats(&self) -> &CommandStats { &self.stats }
    /// Number of tables created so far.
    #[inline] pub fn table_count(&self) -> usize { self.tables.len() }
    /// Number of live entities.
    pub fn entity_count(&self) -> usize { self.entities.read().live_count() }

    // ── shared operations ──────────────────────────────────────────────────

    /// Reserves a new entity id.
    ///
    /// ## Semantics
    /// Safe from any thread. The entity is alive immediately with an empty
    /// type.

    pub fn new_entity(&self) -> Entity {
        self.entities.write().alloc()
    }

    /// Returns `true` if `entity` is alive.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.read().is_alive(entity)
    }

    fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.read().location(entity)
    }

    /// Sorted type of `entity` (empty for dead or tableless entities).
    pub fn type_of(&self, entity: Entity) -> Vec<Id> {
        self.location(entity)
            .map(|loc| self.tables[loc.table as usize].ty().to_vec())
            .unwrap_or_default()
    }

    /// Returns `true` if `entity` has an id matching `id`.
    pub fn has(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        self.location(entity)
            .is_some_and(|loc| self.tables[loc.table as usize].has(id))
    }

    /// Runs `f` on the value of `id` stored for `entity`.
    pub fn with_value<R>(&self, entity: Entity, id: Id, f: impl FnOnce(&ComponentValue) -> R) -> Option<R> {
        let loc = self.location(entity)?;
        self.tables[loc.table as usize].column(id)?.with(loc.row, f)
    }

    /// Returns a copy of the `T` value stored under `id` for `entity`.
    pub fn get<T: Component>(&self, entity: Entity, id: impl Into<Id>) -> Option<T> {
        self.with_value(entity, id.into(), |value| value.downcast_ref::<T>().cloned())
            .flatten()
    }

    /// Overwrites the value of an id the entity already owns.
    ///
    /// Returns the value back if the entity does not own `id`.
    ///
    /// ## Panics
    /// Panics if `value` does not match the registered component.

    pub fn write_in_place(&self, entity: Entity, id: Id, value: ComponentValue) -> Result<(), ComponentValue> {
        let Some(loc) = self.location(entity) else { return Err(value) };
        let Some(column) = self.tables[loc.table as usize].column(id) else { return Err(value) };
        self.registry.check_value(id.first(), &value);
        match column.replace(loc.row, value) {
            Some(_) => Ok(()),
            None => unreachable!("location row {} out of bounds for table {}", loc.row, loc.table),
        }
    }

    /// Returns `true` unless `id` was disabled on `entity`.
    pub fn is_enabled(&self, entity: Entity, id: Id) -> bool {
        !self.disabled.contains(&(entity, id))
    }

    /// Name of `entity`, if set.
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.names.get(&entity).map(|n| n.name.as_str())
    }

    /// Parent of `entity`, if set.
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.names.get(&entity).and_then(|n| n.parent)
    }

    /// Full `::`-separated path of a named entity.
    pub fn path(&self, entity: Entity) -> Option<String> {
        let mut parts = vec![self.name(entity)?.to_string()];
        let mut cursor = self.parent(entity);
        while let Some(parent) = cursor {
            parts.push(self.name(parent).map(str::to_string).unwrap_or_else(|| parent.to_string()));
            cursor = self.parent(parent);
        }
        parts.reverse();
        Some(parts.join("::"))
    }

    /// Activity fingerprint of the tables.
    #[inline]
    pub fn activity_version(&self) -> u64 { self.monitor.activity_version }

    fn matching_tables<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Table> + 'a {
        self.tables.iter().filter(move |table| query.matches_type(|id| table.has(id)))
    }

    /// Returns `true` if `query` would iterate at least one entity.
    ///
    /// Queries without `This` terms are always active.

    pub fn is_query_active(&self, query: &Query) -> bool {
        !query.has_this_terms() || self.matching_tables(query).any(|table| !table.is_empty())
    }

    /// Entities matched by `query`, in table then row order.
    ///
    /// ## Semantics
    /// Entities with a disabled required id are skipped.

    pub fn matching_entities(&self, query: &Query) -> Vec<Entity> {
        if !query.has_this_terms() {
            return Vec::new();
        }
        let required: Vec<Id> = query.required_ids().collect();
        let mut out = Vec::new();
        for table in self.matching_tables(query) {
            out.extend(table.entities().iter().copied().filter(|&entity| {
                self.disabled.is_empty()
                    || required.iter().all(|&id| self.is_enabled(entity, id))
            }));
        }
        out
    }

    /// Registers an observer.
    ///
    /// `filter` restricts delivery to events whose id matches the pattern.

    pub fn observe(&mut self, event: EventKind, filter: Option<Id>, callback: ObserverFn) {
        self.observers.push(Observer { event, filter, callback });
    }

    /// Delivers an event to matching observers.
    pub fn emit(&self, event: EventKind, entity: Option<Entity>, id: Id, param: Option<&ComponentValue>) {
        if self.observers.is_empty() {
            return;
        }
        let data = ObserverEvent { event, entity, id, param };
        for observer in &self.observers {
            if observer.event == event && observer.filter.map_or(true, |pattern| id.matches(pattern)) {
                (observer.callback)(self, &data);
            }
        }
    }

    // ── structural operations ──────────────────────────────────────────────

    fn ensure_table(&mut self, ty: &[Id]) -> TableID {
        if let Some(&table_id) = self.table_index.get(ty) {
            return table_id;
        }
        let table_id = self.tables.len() as TableID;
        let data_ids: Vec<Id> = ty.iter().copied()
            .filter(|id| {
                id.component_id()
                    .and_then(|c| self.registry.desc(c))
                    .is_some_and(|desc| desc.has_data())
            })
            .collect();
        trace!(table = table_id, ty = ?ty, "creating table");
        self.tables.push(Table::new(table_id, ty.to_vec(), &data_ids));
        self.table_index.insert(ty.to_vec(), table_id);
        table_id
    }

    pub(crate) fn construct(&self, id: Id) -> ComponentValue {
        let desc = id.component_id().and_then(|c| self.registry.desc(c));
        match desc.and_then(|d| d.hooks).and_then(|hooks| hooks.ctor) {
            Some(ctor) => ctor(),
            None => panic!(
                "component `{}` has no default constructor; add it with a value",
                desc.map(|d| d.name.as_str()).unwrap_or("?")
            ),
        }
    }

    fn take_row(&mut self, entity: Entity, loc: EntityLocation) -> Vec<(Id, ComponentValue)> {
        let table = &mut self.tables[loc.table as usize];
        let removed = table.swap_remove(loc.row);
        if table.is_empty() {
            self.monitor.dirty = true;
        }
        let entities = self.entities.get_mut();
        if let Some(moved) = removed.moved {
            entities.set_location(moved, Some(EntityLocation { table: loc.table, row: loc.row }));
        }
        entities.set_location(entity, None);
        removed.values
    }

    fn place_row(&mut self, entity: Entity, ty: &[Id], values: Vec<(Id, ComponentValue)>) {
        if ty.is_empty() {
            return;
        }
        let table_id = self.ensure_table(ty);
        let table = &mut self.tables[table_id as usize];
        if table.is_empty() {
            self.monitor.dirty = true;
        }
        let row: RowID = table.push(entity, values);
        self.entities.get_mut().set_location(entity, Some(EntityLocation { table: table_id, row }));
    }

    /// Moves `entity` to the table of `target` in a single step.
    ///
    /// ## Semantics
    /// - Values in `values` are stored for their ids (overwriting kept ones).
    /// - Ids kept from the current type keep their values.
    /// - New data ids without a supplied value are default-constructed.
    /// - `OnRemove` fires for dropped ids, `OnAdd` for new ids.
    ///
    /// Dead entities are ignored.
    ///
    /// ## Panics
    /// Panics if a supplied value does not match its component, or if a new
    /// data id has no default constructor and no value was supplied.

    pub fn commit(&mut self, entity: Entity, mut target: Vec<Id>, values: Vec<(Id, ComponentValue)>) {
        if !self.entities.get_mut().is_alive(entity) {
            return;
        }
        target.sort_unstable();
        target.dedup();
        for (id, value) in &values {
            self.registry.check_value(id.first(), value);
        }
        let loc = self.entities.get_mut().location(entity);
        let current = loc.map(|l| self.tables[l.table as usize].ty().to_vec()).unwrap_or_default();

        if current == target {
            if let Some(loc) = loc {
                let table = &self.tables[loc.table as usize];
                for (id, value) in values {
                    if let Some(column) = table.column(id) {
                        column.replace(loc.row, value);
                    }
                }
            }
            return;
        }

        let mut old = match loc {
            Some(loc) => self.take_row(entity, loc),
            None => Vec::new(),
        };
        let mut supplied = values;
        let mut row = Vec::new();
        let data_ids: Vec<Id> = target.iter().copied()
            .filter(|id| {
                id.component_id()
                    .and_then(|c| self.registry.desc(c))
                    .is_some_and(|desc| desc.has_data())
            })
            .collect();
        for id in data_ids {
            if let Some(pos) = supplied.iter().position(|(vid, _)| *vid == id) {
                row.push(supplied.swap_remove(pos));
            } else if let Some(pos) = old.iter().position(|(vid, _)| *vid == id) {
                row.push(old.swap_remove(pos));
            } else {
                row.push((id, self.construct(id)));
            }
        }
        self.place_row(entity, &target, row);
        drop(old);

        for &id in current.iter().filter(|id| target.binary_search(id).is_err()) {
            self.disabled.remove(&(entity, id));
            self.emit(EventKind::OnRemove, Some(entity), id, None);
        }
        for &id in target.iter().filter(|id| current.binary_search(id).is_err()) {
            self.emit(EventKind::OnAdd, Some(entity), id, None);
        }
    }

    /// Adds `id` to `entity`, default-constructing its value.
    pub fn add(&mut self, entity: Entity, id: Id) {
        let mut ty = self.type_of(entity);
        if ty.binary_search(&id).is_ok() {
            return;
        }
        ty.push(id);
        self.commit(entity, ty, Vec::new());
    }

    /// Removes every id matching `id` from `entity`.
    pub fn remove(&mut self, entity: Entity, id: Id) {
        let ty = self.type_of(entity);
        if !ty.iter().any(|t| t.matches(id)) {
            return;
        }
        let kept = ty.into_iter().filter(|t| !t.matches(id)).collect();
        self.commit(entity, kept, Vec::new());
    }

    /// Assigns `value` to `id` on `entity`, adding the id if needed, then
    /// fires `OnSet`.

    pub fn set(&mut self, entity: Entity, id: Id, value: ComponentValue) {
        if !self.entities.get_mut().is_alive(entity) {
            return;
        }
        let value = match self.write_in_place(entity, id, value) {
            Ok(()) => None,
            Err(value) => Some(value),
        };
        if let Some(value) = value {
            let mut ty = self.type_of(entity);
            ty.push(id);
            self.commit(entity, ty, vec![(id, value)]);
        }
        self.emit(EventKind::OnSet, Some(entity), id, None);
    }

    /// Fires `OnSet` for `id` if `entity` has it.
    pub fn modified(&mut self, entity: Entity, id: Id) {
        if self.has(entity, id) {
            self.emit(EventKind::OnSet, Some(entity), id, None);
        }
    }

    /// Removes every id from `entity` without deleting it.
    pub fn clear(&mut self, entity: Entity) {
        self.commit(entity, Vec::new(), Vec::new());
    }

    /// Deletes `entity` and, recursively, its children.
    pub fn delete(&mut self, entity: Entity) {
        if !self.entities.get_mut().is_alive(entity) {
            return;
        }
        let children: Vec<Entity> = self.names.iter()
            .filter(|(_, n)| n.parent == Some(entity))
            .map(|(&child, _)| child)
            .collect();
        for child in children {
            self.delete(child);
        }
        self.clear(entity);
        self.names.remove(&entity);
        self.disabled.retain(|(e, _)| *e != entity);
        self.entities.get_mut().free(entity);
    }

    /// Enables or disables `id` on `entity`.
    pub fn set_enabled(&mut self, entity: Entity, id: Id, enabled: bool) {
        if !self.has(entity, id) {
            return;
        }
        if enabled {
            self.disabled.remove(&(entity, id));
        } else {
            self.disabled.insert((entity, id));
        }
    }

    /// Gives `dst` the type of `src`, copying values when `copy_values` is set
    /// and default-constructing them otherwise.

    pub fn clone_entity(&mut self, dst: Entity, src: Entity, copy_values: bool) {
        if !self.is_alive(src) {
            return;
        }
        let ty = self.type_of(src);
        let mut values = Vec::new();
        if copy_values {
            for &id in &ty {
                let copy = id.component_id()
                    .and_then(|c| self.registry.desc(c))
                    .and_then(|d| d.hooks)
                    .map(|hooks| hooks.copy);
                if let Some(copy) = copy {
                    if let Some(value) = self.with_value(src, id, copy) {
                        values.push((id, value));
                    }
                }
            }
        }
        self.commit(dst, ty, values);
    }

    /// Names `entity` under `parent`.
    ///
    /// ## Semantics
    /// If `parent` is given but no longer alive, `entity` is deleted instead.

    pub fn set_name(&mut self, entity: Entity, parent: Option<Entity>, name: String) {
        if !self.entities.get_mut().is_alive(entity) {
            return;
        }
        if let Some(parent) = parent {
            if !self.entities.get_mut().is_alive(parent) {
                self.delete(entity);
                return;
            }
        }
        self.names.insert(entity, EntityName { parent, name });
    }

    /// Applies `action` to every entity holding an id matching `id`.
    pub fn on_delete_action(&mut self, id: Id, action: DeleteAction) {
        let holders: Vec<Entity> = self.tables.iter()
            .filter(|table| table.has(id))
            .flat_map(|table| table.entities().iter().copied())
            .collect();
        for entity in holders {
            match action {
                DeleteAction::Remove => self.remove(entity, id),
                DeleteAction::Delete => self.delete(entity),
            }
        }
    }

    /// Folds pending table emptiness changes into the activity version.
    ///
    /// Returns `true` if the version changed.

    pub fn eval_component_monitors(&mut self) -> bool {
        if !std::mem::take(&mut self.monitor.dirty) {
            return false;
        }
        self.monitor.activity_version += 1;
        trace!(version = self.monitor.activity_version, "table activity changed");
        true
    }
}
