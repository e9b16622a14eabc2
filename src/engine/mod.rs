//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! This module contains the staged execution core and its collaborators:
//! - Entity management and archetype storage
//! - Query terms
//! - Per-stage command queues and the merge engine
//! - The pipeline builder and executor
//! - The world facade
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod entity;
pub mod component;
pub mod archetype;
pub mod storage;
pub mod query;
pub mod commands;
pub mod write_state;
pub mod stage;
pub mod merge;
pub mod pipeline;
pub mod systems;
pub mod scheduler;
pub mod manager;
