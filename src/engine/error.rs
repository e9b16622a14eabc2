//! Error types for world configuration, pipelines and systems.
//!
//! This module declares the *recoverable* failures of the public API. Each error
//! carries enough context to make the failure actionable while remaining small
//! and cheap to pass around or convert into the aggregate [`ECSError`].
//!
//! ## What is not an error here
//! Broken engine invariants are not reported through these types. Entering a
//! nested readonly region, mutating the store directly while readonly, or
//! merging a payload whose size does not match its component are programming
//! errors and panic at the point of detection.
//!
//! ## Typical flow
//! Lower-level helpers return a focused error (e.g. [`ConfigError`]); callers use
//! `?` to bubble it into [`ECSError`]:
//!
//! ```ignore
//! fn boot(text: &str) -> ECSResult<World> {
//!     let config = WorldConfig::from_toml_str(text)?;
//!     World::with_config(config)
//! }
//! ```
//!
//! ## Display vs. Debug
//! * `Display` is short, imperative and meant for logs.
//! * `Debug` (derived) retains the full structure for diagnostics.

use thiserror::Error;

use crate::engine::types::{PipelineID, SystemID};


/// Returned when a [`WorldConfig`](crate::engine::config::WorldConfig) cannot
/// be parsed or fails validation.

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML source could not be deserialized.
    #[error("failed to parse world configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Returned when a pipeline handle does not resolve.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// No pipeline is registered under this id.
    #[error("unknown pipeline {0}")]
    Unknown(PipelineID),

    /// The pipeline cannot be switched while the world is readonly.
    #[error("cannot change the active pipeline while the world is readonly")]
    Readonly,
}

/// Returned when a system handle does not resolve.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SystemError {
    /// No system is registered under this id.
    #[error("unknown system {0}")]
    Unknown(SystemID),
}

/// Aggregate error type for the public API.
///
/// ### Variants
/// * `Config`: configuration could not be loaded or validated.
/// * `Pipeline`: a pipeline handle failed to resolve.
/// * `System`: a system handle failed to resolve.
/// * `ThreadPool`: the worker pool could not be created.
/// * `Stage`: a stage index is out of range.

#[derive(Debug, Error)]
pub enum ECSError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pipeline lookup failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// System lookup failure.
    #[error(transparent)]
    System(#[from] SystemError),

    /// Worker pool creation failure.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Stage index out of range.
    #[error("stage {index} out of bounds (stage count {count})")]
    Stage {
        /// Requested stage index.
        index: usize,
        /// Number of managed stages.
        count: usize,
    },
}

/// Convenience alias for results returned by the public API.
pub type ECSResult<T> = Result<T, ECSError>;
