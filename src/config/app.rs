//! Agent configuration file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::options::{GlobalOptions, PrivateOptions};
use super::validation::{ConfigError, expand_env_vars};

/// Top-level agent configuration.
///
/// ```yaml
/// timeout: 3s
/// plugins:
///   DebugExternalFull:
///     interval: 20
///   Postgres:
///     uri: tcp://localhost:5432
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Options shared by every plugin.
    #[serde(flatten)]
    pub global: GlobalOptions,

    /// Private plugin sections, keyed by plugin name. Decoded by each plugin.
    #[serde(default)]
    pub plugins: BTreeMap<String, PrivateOptions>,
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate agent-level values.
    ///
    /// Plugin sections are validated by the plugins themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.global.validate()?;

        if let Some(name) = self.plugins.keys().find(|name| name.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "plugin name cannot be empty: '{}'",
                name
            )));
        }

        Ok(())
    }

    /// Private section of one plugin.
    pub fn plugin(&self, name: &str) -> Option<&PrivateOptions> {
        self.plugins.get(name)
    }
}
