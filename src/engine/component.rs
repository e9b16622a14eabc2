//! # Component Registry
//!
//! This module assigns stable [`ComponentID`] values to Rust component types and
//! tags, and exposes the type hooks the merge engine needs to construct and copy
//! type-erased values.
//!
//! ## Purpose
//! Table columns and queued command payloads store values as [`ComponentValue`]
//! (a boxed `Any` tagged with its size and type). The registry keeps the
//! matching [`ComponentDesc`] so that payloads can be validated against the
//! component they are applied to.
//!
//! ## Design
//! - The registry is owned by the world, not global.
//! - Ids are assigned sequentially; tags are components with size zero.
//! - Hooks are plain function pointers built from the concrete type at
//!   registration time.
//!
//! ## Invariants
//! - Every id below `next_id` has a descriptor.
//! - A tag never carries a value.
//! - A descriptor's `size` equals `size_of::<T>()` of the registered type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::mem::{size_of, align_of};

use crate::engine::types::{ComponentID, COMPONENT_MASK, WILDCARD};


/// Marker trait for types that can be stored as components.
///
/// Any `'static + Send + Sync + Clone` type qualifies. `Clone` backs the copy
/// hook used by `set` and `clone`.

pub trait Component: Any + Send + Sync + Clone {}

impl<T: Any + Send + Sync + Clone> Component for T {}

/// Type-erased component value.
///
/// ## Semantics
/// Carries the boxed value together with the size and [`TypeId`] of the type
/// it was built from, so a payload can be checked against a component
/// descriptor without knowing its concrete type.

pub struct ComponentValue {
    value: Box<dyn Any + Send + Sync>,
    size: usize,
    type_id: TypeId,
    type_name: &'static str,
}

impl ComponentValue {
    /// Wraps a concrete value.
    pub fn new<T: Component>(value: T) -> Self {
        Self {
            value: Box::new(value),
            size: size_of::<T>(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Size in bytes of the wrapped type.
    #[inline] pub fn size(&self) -> usize { self.size }
    /// `TypeId` of the wrapped type.
    #[inline] pub fn type_id(&self) -> TypeId { self.type_id }
    /// Name of the wrapped type, for diagnostics.
    #[inline] pub fn type_name(&self) -> &'static str { self.type_name }

    /// Borrows the value as `T`.
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> { self.value.downcast_ref::<T>() }

    /// Mutably borrows the value as `T`.
    #[inline]
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> { self.value.downcast_mut::<T>() }
}

impl std::fmt::Debug for ComponentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentValue")
            .field("type", &self.type_name)
            .field("size", &self.size)
            .finish()
    }
}

/// Lifecycle hooks for a component type.
///
/// ## Semantics
/// - `ctor` default-constructs a value (`None` if the type has no default).
/// - `copy` produces an owned copy of a value of this type.

#[derive(Clone, Copy)]
pub struct TypeHooks {
    /// Default constructor.
    pub ctor: Option<fn() -> ComponentValue>,
    /// Copy constructor.
    pub copy: fn(&ComponentValue) -> ComponentValue,
}

fn default_value<T: Component + Default>() -> ComponentValue {
    ComponentValue::new(T::default())
}

fn copy_value<T: Component>(value: &ComponentValue) -> ComponentValue {
    match value.downcast_ref::<T>() {
        Some(inner) => ComponentValue::new(inner.clone()),
        None => panic!(
            "copy hook for {} received a value of type {}",
            type_name::<T>(), value.type_name()
        ),
    }
}

/// Metadata for a registered component or tag.

#[derive(Clone)]
pub struct ComponentDesc {
    /// Assigned id.
    pub component_id: ComponentID,
    /// Type or tag name.
    pub name: String,
    /// Concrete type, `None` for tags.
    pub type_id: Option<TypeId>,
    /// Size in bytes, zero for tags.
    pub size: usize,
    /// Alignment in bytes.
    pub align: usize,
    /// Hooks, `None` for tags.
    pub hooks: Option<TypeHooks>,
}

impl ComponentDesc {
    /// Returns `true` if values of this component are stored in columns.
    #[inline]
    pub fn has_data(&self) -> bool { self.hooks.is_some() }
}

/// Per-world mapping between component types and compact ids.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - The wildcard id is never assigned.

#[derive(Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    by_name: HashMap<String, ComponentID>,
    by_id: Vec<ComponentDesc>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    fn alloc_id(&self) -> ComponentID {
        let component_id = self.by_id.len() as ComponentID;
        assert!(
            component_id < COMPONENT_MASK && component_id != WILDCARD,
            "exceeded component id space"
        );
        component_id
    }

    fn insert(&mut self, desc: ComponentDesc) -> ComponentID {
        let component_id = desc.component_id;
        if let Some(type_id) = desc.type_id {
            self.by_type.insert(type_id, component_id);
        }
        self.by_name.insert(desc.name.clone(), component_id);
        self.by_id.push(desc);
        component_id
    }

    fn register_with_hooks<T: Component>(&mut self, ctor: Option<fn() -> ComponentValue>) -> ComponentID {
        if let Some(&existing) = self.by_type.get(&TypeId::of::<T>()) {
            return existing;
        }
        let component_id = self.alloc_id();
        self.insert(ComponentDesc {
            component_id,
            name: type_name::<T>().to_string(),
            type_id: Some(TypeId::of::<T>()),
            size: size_of::<T>(),
            align: align_of::<T>(),
            hooks: Some(TypeHooks { ctor, copy: copy_value::<T> }),
        })
    }

    /// Registers `T` with a default constructor. Idempotent.

    pub fn register<T: Component + Default>(&mut self) -> ComponentID {
        let component_id = self.register_with_hooks::<T>(Some(default_value::<T>));
        if let Some(desc) = self.by_id.get_mut(component_id as usize) {
            if let Some(hooks) = desc.hooks.as_mut() {
                hooks.ctor.get_or_insert(default_value::<T>);
            }
        }
        component_id
    }

    /// Registers `T` without a default constructor. Idempotent.
    ///
    /// Such components can only be added with a value (`set`), never by id
    /// alone.

    pub fn register_without_default<T: Component>(&mut self) -> ComponentID {
        self.register_with_hooks::<T>(None)
    }

    /// Registers a zero-sized tag by name. Idempotent.

    pub fn register_tag(&mut self, name: &str) -> ComponentID {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        let component_id = self.alloc_id();
        self.insert(ComponentDesc {
            component_id,
            name: name.to_string(),
            type_id: None,
            size: 0,
            align: 1,
            hooks: None,
        })
    }

    /// Returns the id assigned to `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the id registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<ComponentID> {
        self.by_name.get(name).copied()
    }

    /// Returns the descriptor of `component_id`.
    #[inline]
    pub fn desc(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize)
    }

    /// Number of registered components and tags.
    pub fn len(&self) -> usize { self.by_id.len() }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }

    /// Panics if `value` cannot be stored in a column of `component_id`.
    ///
    /// ## Panics
    /// - the component is a tag or unknown,
    /// - the payload size differs from the registered size,
    /// - the payload type differs from the registered type.

    pub fn check_value(&self, component_id: ComponentID, value: &ComponentValue) {
        let Some(desc) = self.desc(component_id) else {
            panic!("value of type {} supplied for unknown component {component_id}", value.type_name());
        };
        assert!(
            desc.has_data(),
            "value of type {} supplied for tag `{}`", value.type_name(), desc.name
        );
        assert!(
            desc.size == value.size(),
            "mismatching size for component `{}`: expected {} bytes, got {} bytes ({})",
            desc.name, desc.size, value.size(), value.type_name()
        );
        assert!(
            desc.type_id == Some(value.type_id()),
            "mismatching type for component `{}`: got {}", desc.name, value.type_name()
        );
    }
}
