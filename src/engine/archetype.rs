//! # Tables
//!
//! A [`Table`] stores every entity that has exactly the same sorted set of ids
//! (its *type*). Each id that carries data has one column; tags have none.
//!
//! ## Purpose
//! Tables are the unit of query matching and of the emptiness monitor: the
//! scheduler only cares whether a table a system matches has entities in it.
//!
//! ## Design
//! - Rows are dense; removal is swap-remove and reports the entity that moved.
//! - Columns sit behind a `parking_lot::RwLock` so a stage may overwrite a value
//!   in place through `&Table` while other stages read different rows.
//!
//! ## Invariants
//! - `ty` is sorted and free of duplicates.
//! - Every column has exactly `entities.len()` values.

use parking_lot::RwLock;

use crate::engine::component::ComponentValue;
use crate::engine::entity::Entity;
use crate::engine::types::{Id, TableID, RowID};


/// Type-erased storage for one data id of a table.

pub struct Column {
    id: Id,
    data: RwLock<Vec<ComponentValue>>,
}

impl Column {
    fn new(id: Id) -> Self {
        Self { id, data: RwLock::new(Vec::new()) }
    }

    /// Id stored in this column.
    #[inline]
    pub fn id(&self) -> Id { self.id }

    /// Runs `f` on the value at `row`.
    pub fn with<R>(&self, row: RowID, f: impl FnOnce(&ComponentValue) -> R) -> Option<R> {
        let data = self.data.read();
        data.get(row as usize).map(f)
    }

    /// Replaces the value at `row`, returning the previous one.
    pub fn replace(&self, row: RowID, value: ComponentValue) -> Option<ComponentValue> {
        let mut data = self.data.write();
        data.get_mut(row as usize).map(|slot| std::mem::replace(slot, value))
    }
}

/// Result of removing a row.

#[derive(Debug)]
pub struct RemovedRow {
    /// Values of the removed row, paired with their ids.
    pub values: Vec<(Id, ComponentValue)>,
    /// Entity that was swapped into the vacated row, if any.
    pub moved: Option<Entity>,
}

/// Storage for all entities sharing a type.

pub struct Table {
    id: TableID,
    ty: Vec<Id>,
    entities: Vec<Entity>,
    columns: Vec<Column>,
}

impl Table {
    /// Creates an empty table.
    ///
    /// `data_ids` lists the ids in `ty` that carry values.

    pub fn new(id: TableID, ty: Vec<Id>, data_ids: &[Id]) -> Self {
        debug_assert!(ty.windows(2).all(|w| w[0] < w[1]), "table type must be sorted");
        let columns = ty.iter()
            .filter(|id| data_ids.contains(id))
            .map(|&id| Column::new(id))
            .collect();
        Self { id, ty, entities: Vec::new(), columns }
    }

    /// Table id.
    #[inline] pub fn id(&self) -> TableID { self.id }
    /// Sorted ids of this table.
    #[inline] pub fn ty(&self) -> &[Id] { &self.ty }
    /// Entities in row order.
    #[inline] pub fn entities(&self) -> &[Entity] { &self.entities }
    /// Number of rows.
    #[inline] pub fn len(&self) -> usize { self.entities.len() }
    /// Returns `true` if the table has no rows.
    #[inline] pub fn is_empty(&self) -> bool { self.entities.is_empty() }

    /// Returns `true` if the type contains an id matching `pattern`.
    pub fn has(&self, pattern: Id) -> bool {
        if pattern.is_wildcard() {
            self.ty.iter().any(|id| id.matches(pattern))
        } else {
            self.ty.binary_search(&pattern).is_ok()
        }
    }

    /// Returns the column of `id`, if it carries data.
    pub fn column(&self, id: Id) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == id)
    }

    /// Appends a row.
    ///
    /// `values` must hold exactly one value per column; missing values are a
    /// caller bug.
    ///
    /// ## Panics
    /// Panics if a column has no value supplied.

    pub fn push(&mut self, entity: Entity, mut values: Vec<(Id, ComponentValue)>) -> RowID {
        for column in &mut self.columns {
            let position = values.iter().position(|(id, _)| *id == column.id);
            let Some(position) = position else {
                panic!("no value supplied for column {} of table {}", column.id, self.id);
            };
            let (_, value) = values.swap_remove(position);
            column.data.get_mut().push(value);
        }
        self.entities.push(entity);
        (self.entities.len() - 1) as RowID
    }

    /// Swap-removes `row` and returns its values.

    pub fn swap_remove(&mut self, row: RowID) -> RemovedRow {
        let row = row as usize;
        let values = self.columns.iter_mut()
            .map(|column| (column.id, column.data.get_mut().swap_remove(row)))
            .collect();
        self.entities.swap_remove(row);
        let moved = self.entities.get(row).copied();
        RemovedRow { values, moved }
    }
}
