//! World configuration.
//!
//! [`WorldConfig`] collects the knobs a [`World`](crate::engine::manager::World)
//! reads at construction. It can be built in code with the `with_*` builders
//! or deserialized from TOML:
//!
//! ```toml
//! threads = 4
//! measure_frame_time = true
//! target_fps = 60.0
//! time_scale = 0.5
//! thread_name_prefix = "sim-worker"
//! ```
//!
//! Missing keys take their default. [`WorldConfig::validate`] is called by the
//! world before the configuration is applied.

use serde::{Deserialize, Serialize};

use crate::engine::error::ConfigError;


/// Construction-time settings of a world.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Number of stages, one per worker thread including the caller.
    pub threads: usize,
    /// Accumulate wall-clock frame time into `frame_time_total`.
    pub measure_frame_time: bool,
    /// Frames per second to throttle to; `0` runs unthrottled.
    pub target_fps: f32,
    /// Accumulate per-op and per-merge timings.
    pub measure_system_time: bool,
    /// Multiplier applied to every frame delta.
    pub time_scale: f32,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            measure_frame_time: false,
            target_fps: 0.0,
            measure_system_time: false,
            time_scale: 1.0,
            thread_name_prefix: "abm-worker".to_string(),
        }
    }
}

impl WorldConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of stages.
    pub fn with_threads(mut self, threads: usize) -> Self { self.threads = threads; self }
    /// Enables frame time measurement.
    pub fn with_measure_frame_time(mut self, on: bool) -> Self { self.measure_frame_time = on; self }
    /// Sets the frame rate limit.
    pub fn with_target_fps(mut self, fps: f32) -> Self { self.target_fps = fps; self }
    /// Enables op and merge timing.
    pub fn with_measure_system_time(mut self, on: bool) -> Self { self.measure_system_time = on; self }
    /// Sets the time scale.
    pub fn with_time_scale(mut self, scale: f32) -> Self { self.time_scale = scale; self }
    /// Sets the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Checks every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid {
                field: "threads",
                reason: "at least one stage is required".to_string(),
            });
        }
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "time_scale",
                reason: format!("must be positive and finite, got {}", self.time_scale),
            });
        }
        if !self.target_fps.is_finite() || self.target_fps < 0.0 {
            return Err(ConfigError::Invalid {
                field: "target_fps",
                reason: format!("must be zero or positive, got {}", self.target_fps),
            });
        }
        Ok(())
    }
}
