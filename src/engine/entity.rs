//! Entity handles and the generational entity allocator.
//!
//! Entities are plain packed ids (see [`types`](crate::engine::types)). The
//! allocator hands out indices from a free list and bumps the slot version on
//! deletion so stale handles are detected by [`Entities::is_alive`].
//!
//! The allocator is wrapped in a lock by the store so that ids can be reserved
//! from any stage while the world is readonly. A reserved entity is alive
//! immediately but has no table until its first structural change is merged.

use crate::engine::types::{
    EntityID, IndexID, VersionID,
    INDEX_BITS, INDEX_MASK, INDEX_CAP,
    TableID, RowID,
};


/// Packed entity handle.

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    #[inline]
    pub(crate) fn new(index: IndexID, version: VersionID) -> Self {
        debug_assert!((index as EntityID) <= INDEX_MASK);
        Entity(make_id(index, version))
    }

    /// Slot index inside the allocator.
    #[inline] pub fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }
    /// Generation of the slot when this handle was issued.
    #[inline] pub fn version(self) -> VersionID { (self.0 >> INDEX_BITS) as VersionID }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index(), self.version())
    }
}

/// Location of an entity's row.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Table holding the entity.
    pub table: TableID,
    /// Row inside the table.
    pub row: RowID,
}

/// Generational entity allocator with per-slot locations.
///
/// ## Invariants
/// - `versions`, `alive` and `locations` have equal length.
/// - A slot on the free list is never alive.

#[derive(Default)]
pub struct Entities {
    versions: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    locations: Vec<Option<EntityLocation>>,
    live_count: usize,
}

impl Entities {
    /// Creates an empty allocator.
    pub fn new() -> Self { Self::default() }

    fn grow(&mut self, additional: usize) {
        let current = self.versions.len();
        let needed = current + additional;
        assert!(
            needed <= INDEX_CAP as usize + 1,
            "entity limit reached ({needed} needed; capacity {})", INDEX_CAP as usize + 1
        );
        self.versions.resize(needed, 0);
        self.alive.resize(needed, false);
        self.locations.resize(needed, None);
        for index in (current..needed).rev() {
            self.free_store.push(index as IndexID);
        }
    }

    /// Allocates a new live entity with no table.
    ///
    /// ## Panics
    /// Panics if the index space is exhausted.

    pub fn alloc(&mut self) -> Entity {
        if self.free_store.is_empty() {
            self.grow(1024.max(self.versions.len() / 2));
        }
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => unreachable!("allocator grew without yielding a slot"),
        };
        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = None;
        self.live_count += 1;
        Entity::new(index, self.versions[slot])
    }

    /// Frees `entity`, invalidating every outstanding handle to it.
    ///
    /// Returns `false` if the handle was already stale.

    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.locations[slot] = None;
        self.free_store.push(entity.index());
        self.live_count -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a live slot of the same generation.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        slot < self.versions.len() && self.alive[slot] && self.versions[slot] == entity.version()
    }

    /// Returns the row of a live entity, `None` if dead or tableless.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.is_alive(entity) { self.locations[entity.index() as usize] } else { None }
    }

    /// Updates the row of a live entity.
    pub fn set_location(&mut self, entity: Entity, location: Option<EntityLocation>) {
        debug_assert!(
            self.is_alive(entity),
            "set_location was called on a dead or stale entity. Entity: {entity:?}, Location: {location:?}"
        );
        if self.is_alive(entity) {
            self.locations[entity.index() as usize] = location;
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn live_count(&self) -> usize { self.live_count }
}
