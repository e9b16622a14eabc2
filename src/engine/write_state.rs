//! Tracks which ids have pending (unmerged) writes while a schedule is built.
//!
//! The pipeline builder walks systems in order and records, for every id an
//! active system writes, that the id is *staged*. A later system reading a
//! staged id needs a merge first.
//!
//! Wildcard ids are handled in both directions: a wildcard query matches any
//! staged concrete id, and a staged wildcard matches any concrete query. Writing
//! the plain wildcard raises a barrier that stages everything.

use std::collections::HashSet;

use crate::engine::types::Id;


/// Staging status of an id.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    /// No pending write.
    None,
    /// Written to a stage and not merged yet.
    Staged,
}

/// Set of ids with pending writes.

#[derive(Clone, Debug, Default)]
pub struct WriteState {
    ids: HashSet<Id>,
    wildcard_ids: HashSet<Id>,
    write_barrier: bool,
}

impl WriteState {
    /// Creates an empty write state.
    pub fn new() -> Self { Self::default() }

    /// Returns the staging status of `id`.
    ///
    /// ## Semantics
    /// - With the barrier raised every id is staged.
    /// - The plain wildcard is staged if anything is.
    /// - A concrete id is staged if recorded exactly or matched by a staged
    ///   wildcard pattern.
    /// - A wildcard pattern is staged if it matches any recorded id.

    pub fn get(&self, id: Id) -> WriteKind {
        if self.write_barrier {
            return WriteKind::Staged;
        }
        if id == Id::WILDCARD {
            return if self.ids.is_empty() && self.wildcard_ids.is_empty() {
                WriteKind::None
            } else {
                WriteKind::Staged
            };
        }
        let staged = if id.is_wildcard() {
            self.ids.iter().any(|written| written.matches(id))
                || self.wildcard_ids.iter().any(|written| written.matches(id) || id.matches(*written))
        } else {
            self.ids.contains(&id)
                || self.wildcard_ids.iter().any(|pattern| id.matches(*pattern))
        };
        if staged { WriteKind::Staged } else { WriteKind::None }
    }

    /// Marks `id` as staged.
    pub fn set(&mut self, id: Id) {
        if id == Id::WILDCARD {
            self.write_barrier = true;
        } else if id.is_wildcard() {
            self.wildcard_ids.insert(id);
        } else {
            self.ids.insert(id);
        }
    }

    /// Clears everything.
    pub fn reset(&mut self) {
        self.ids.clear();
        self.wildcard_ids.clear();
        self.write_barrier = false;
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        !self.write_barrier && self.ids.is_empty() && self.wildcard_ids.is_empty()
    }
}
