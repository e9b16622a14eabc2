//! # ABM Pipeline
//!
//! Staged execution core for an archetype Entity-Component-System (ECS)
//! used by large-scale Agent-Based Models (ABM).
//!
//! ## Design Goals
//! - Systems declare their access; merges are placed only where needed
//! - Structural changes are recorded per stage and merged at sync points
//! - Parallel CPU execution over a fixed set of stages
//! - Deterministic per-entity command order
//!
//! ## Layout
//! - [`engine::pipeline`] compiles systems into ops
//! - [`engine::scheduler`] runs the ops
//! - [`engine::commands`] and [`engine::stage`] record mutations
//! - [`engine::merge`] applies them
//! - [`engine::manager::World`] ties everything together

#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(dead_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::manager::{
    World,
    WorldInfo,
    FRAME_PIPELINE,
    STARTUP_PIPELINE,
};

pub use engine::config::WorldConfig;

pub use engine::entity::{
    Entity,
    EntityLocation,
};

pub use engine::component::{
    Component,
    ComponentValue,
};

pub use engine::query::{
    InOutKind,
    Query,
    QueryBuilder,
    Term,
    TermOper,
    TermSource,
};

pub use engine::systems::{
    System,
    SystemContext,
    SystemDesc,
};

pub use engine::pipeline::{
    Op,
    Phase,
    PipelineDesc,
    PipelineState,
};

pub use engine::stage::{
    Stage,
    StageRef,
};

pub use engine::commands::{
    Command,
    CommandKind,
    CommandQueue,
};

pub use engine::merge::CommandStats;

pub use engine::storage::{
    DeleteAction,
    EventKind,
    ObserverEvent,
    Store,
};

pub use engine::error::{
    ECSResult,
    ECSError,
    ConfigError,
    PipelineError,
    SystemError,
};

pub use engine::types::{
    EntityID,
    ComponentID,
    Id,
    PipelineID,
    SystemID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use abm_pipeline::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        World,
        WorldConfig,
        Entity,
        Id,
        Phase,
        PipelineDesc,
        QueryBuilder,
        System,
        SystemContext,
        SystemDesc,
        StageRef,
        EventKind,
        ECSResult,
    };
}
