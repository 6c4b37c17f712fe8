//! Options handed to plugins by the host.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, check_duration_range};

/// Default export timeout (3 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum export timeout (1 second).
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum export timeout (30 seconds).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Private plugin configuration as an opaque YAML blob.
pub type PrivateOptions = serde_yaml::Value;

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Agent-wide options shared by every plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOptions {
    /// Export timeout (default: 3s, range 1s..30s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GlobalOptions {
    /// Validate the global options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration_range("timeout", self.timeout, MIN_TIMEOUT, MAX_TIMEOUT)
    }
}

/// Decode a private configuration blob on top of `defaults`.
///
/// Keys present in `private` replace the matching fields of `defaults`; all
/// other fields keep their default values. A missing or null blob yields the
/// defaults unchanged. Unknown keys are rejected when `T` denies them.
pub fn unmarshal<T>(private: Option<&PrivateOptions>, defaults: T) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    let overlay = match private {
        None | Some(serde_yaml::Value::Null) => return Ok(defaults),
        Some(serde_yaml::Value::Mapping(m)) => m,
        Some(other) => {
            return Err(ConfigError::ValidationError(format!(
                "expected a mapping of options, got {}",
                value_kind(other)
            )));
        }
    };

    let mut merged = match serde_yaml::to_value(&defaults)? {
        serde_yaml::Value::Mapping(m) => m,
        _ => {
            return Err(ConfigError::ValidationError(
                "option defaults must serialize to a mapping".to_string(),
            ));
        }
    };
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }

    Ok(serde_yaml::from_value(serde_yaml::Value::Mapping(merged))?)
}

fn value_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}
