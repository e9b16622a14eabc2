//! Core identifiers and bit-level layouts.
//!
//! This module defines the **small, copyable identifiers** shared by every other
//! part of the engine: entity handles, component ids, the combined [`Id`] used in
//! table types and query terms, and the counters used by the scheduler.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | version | index |
//! ```
//!
//! - **Index** identifies the slot inside the entity allocator.
//! - **Version** enables stale-entity detection after deletion.
//!
//! ## Ids
//!
//! An [`Id`] is either a single component id or a *pair* `(first, second)` of
//! component ids. Pairs are encoded with the top bit set:
//!
//! ```text
//! | 1 | first (31 bits) | second (32 bits) |
//! ```
//!
//! The reserved component id [`WILDCARD`] matches any component. A pair with a
//! wildcard on either side is itself a wildcard pattern.
//!
//! ## Invariants
//!
//! - Component ids never exceed [`COMPONENT_MASK`].
//! - `Id::WILDCARD` is never stored in a table type.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index within the entity allocator.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Unique identifier for a component type or tag.
pub type ComponentID = u32;
/// Unique identifier for a system.
pub type SystemID = u32;
/// Unique identifier for a pipeline.
pub type PipelineID = u32;
/// Index of a table in the store.
pub type TableID = u32;
/// Row index within a table.
pub type RowID = u32;
/// Frame counter.
pub type Tick = u64;

/// Total number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for entity versioning.
pub const VERSION_BITS: Bits = 32;
/// Number of bits reserved for the entity index.
pub const INDEX_BITS: Bits = ENTITY_BITS - VERSION_BITS;

const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];

const fn mask(bits: Bits) -> EntityID {
    if bits == 0 { 0 } else { ((1 as EntityID) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = mask(INDEX_BITS);
/// Maximum number of live entity slots.
pub const INDEX_CAP: IndexID = INDEX_MASK as IndexID;

/// Largest encodable component id.
pub const COMPONENT_MASK: ComponentID = 0x7FFF_FFFF;
/// Reserved component id matching every component.
pub const WILDCARD: ComponentID = COMPONENT_MASK;

const PAIR_FLAG: u64 = 1 << 63;

/// Component id or pair of component ids.
///
/// ## Semantics
/// `Id` is the unit of a table type and of a query term. A plain id wraps a
/// [`ComponentID`]; a pair carries a relationship and a target.

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Id(pub u64);

impl Id {
    /// Matches any id.
    pub const WILDCARD: Id = Id(WILDCARD as u64);

    /// Creates a plain component id.
    #[inline]
    pub const fn component(component_id: ComponentID) -> Id {
        Id((component_id & COMPONENT_MASK) as u64)
    }

    /// Creates a pair id `(first, second)`.
    #[inline]
    pub const fn pair(first: ComponentID, second: ComponentID) -> Id {
        Id(PAIR_FLAG
            | (((first & COMPONENT_MASK) as u64) << 32)
            | ((second & COMPONENT_MASK) as u64))
    }

    /// Returns `true` if this id is a pair.
    #[inline]
    pub const fn is_pair(self) -> bool { self.0 & PAIR_FLAG != 0 }

    /// Returns the component id, or the first element for pairs.
    #[inline]
    pub const fn first(self) -> ComponentID {
        if self.is_pair() {
            ((self.0 >> 32) as u32) & COMPONENT_MASK
        } else {
            (self.0 as u32) & COMPONENT_MASK
        }
    }

    /// Returns the second element of a pair.
    #[inline]
    pub const fn second(self) -> Option<ComponentID> {
        if self.is_pair() { Some((self.0 as u32) & COMPONENT_MASK) } else { None }
    }

    /// Returns the component id for plain ids.
    #[inline]
    pub const fn component_id(self) -> Option<ComponentID> {
        if self.is_pair() { None } else { Some(self.first()) }
    }

    /// Returns `true` if this id is a wildcard pattern.
    ///
    /// ## Semantics
    /// The plain wildcard and any pair with a wildcard side are patterns.

    pub const fn is_wildcard(self) -> bool {
        if self.is_pair() {
            self.first() == WILDCARD || matches!(self.second(), Some(WILDCARD))
        } else {
            self.first() == WILDCARD
        }
    }

    /// Returns `true` if `self` is matched by `pattern`.
    ///
    /// ## Semantics
    /// - The plain wildcard matches every id.
    /// - A pair pattern matches pairs whose sides are equal or wildcarded.
    /// - Otherwise ids must be equal.

    pub fn matches(self, pattern: Id) -> bool {
        if self == pattern || pattern == Id::WILDCARD {
            return true;
        }
        match (self.is_pair(), pattern.is_pair()) {
            (true, true) => {
                let first = pattern.first() == WILDCARD || pattern.first() == self.first();
                let second = pattern.second() == Some(WILDCARD) || pattern.second() == self.second();
                first && second
            }
            _ => false,
        }
    }
}

impl From<ComponentID> for Id {
    fn from(component_id: ComponentID) -> Self { Id::component(component_id) }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |c: ComponentID| if c == WILDCARD { "*".to_string() } else { c.to_string() };
        match self.second() {
            Some(second) => write!(f, "({}, {})", show(self.first()), show(second)),
            None => write!(f, "{}", show(self.first())),
        }
    }
}
