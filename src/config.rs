//! Interpreter settings.
//!
//! A `Config` is built once by the front end (defaults, then an optional JSON
//! file, then environment overrides) and handed to the evaluator by value.
//! Nothing here is process-global.

use crate::error::{Result, ZenError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable overriding [`Config::max_call_depth`].
pub const MAX_CALL_DEPTH_ENV: &str = "ZEN_MAX_CALL_DEPTH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nested user-function calls allowed before `Stack overflow` is raised.
    /// The evaluator grows the host stack on demand, so any depth is safe
    /// on any thread.
    pub max_call_depth: usize,

    /// Call count at which a function is reported as hot.
    pub hot_threshold: u64,

    /// Per-function call counts and timings.
    pub profiling: bool,

    /// Reuse the current frame for `return self(...)` in tail position.
    pub tail_calls: bool,

    /// Cache results of binary expressions built only from literals.
    pub constant_folding: bool,

    /// Skip side-effect-free literal statements inside blocks.
    pub dead_code_elimination: bool,

    /// Upper bound on iterations of a single `while` loop.
    pub max_loop_iterations: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 2000,
            hot_threshold: 100,
            profiling: true,
            tail_calls: false,
            constant_folding: false,
            dead_code_elimination: false,
            max_loop_iterations: None,
        }
    }
}

impl Config {
    /// Read a JSON settings file; missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path: &Path = path.as_ref();
        let text: String = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;

        info!("Loaded config from {}: {:?}", path.display(), config);

        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(MAX_CALL_DEPTH_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => self.max_call_depth = depth,
                _ => warn!("Ignoring invalid {}={:?}", MAX_CALL_DEPTH_ENV, raw),
            }
        }

        self
    }

    /// Check settings that serde alone cannot.
    pub fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(ZenError::config("max_call_depth must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{ "tail_calls": true }"#).unwrap();

        assert!(config.tail_calls);
        assert_eq!(config.max_call_depth, 2000);
        assert_eq!(config.max_loop_iterations, None);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let config = Config {
            max_call_depth: 0,
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(ZenError::Config { .. })));
    }
}
