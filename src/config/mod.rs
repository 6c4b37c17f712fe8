//! Configuration module for the agent and its plugins.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Global options shared by every plugin (export timeout)
//! - Private plugin sections, decoded by each plugin on top of its defaults

mod app;
mod options;
mod validation;

pub use app::AgentConfig;
pub use options::{GlobalOptions, PrivateOptions, unmarshal};
pub use validation::{ConfigError, check_duration_range, expand_env_vars, parse_duration};

// Re-export constants
pub use options::{DEFAULT_TIMEOUT, MAX_TIMEOUT, MIN_TIMEOUT};
