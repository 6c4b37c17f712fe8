//! Debug plugin implementing the full lifecycle.
//!
//! Answers a constant for its single key and logs every hook, which makes it
//! useful to check how a host drives plugins.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{self, ConfigError, GlobalOptions, PrivateOptions};
use crate::plugin::{
    Dispatcher, ExportContext, Handler, ItemValue, NoResource, ParamSpec, Plugin, PluginError,
    PluginRegistry, RegistryError,
};

/// Registered plugin name.
pub const PLUGIN_NAME: &str = "DebugExternalFull";

/// The only key served.
pub const KEY_FULL: &str = "debug.external.full";

const RESPONSE: &str = "debug full test response";

/// Interval before `configure` runs.
const INITIAL_INTERVAL: u64 = 1;

/// Interval default applied by `configure` before the private overlay.
const CONFIGURED_INTERVAL: u64 = 10;

/// Options recognized by the debug plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugOptions {
    /// Polling period in seconds.
    pub interval: u64,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            interval: INITIAL_INTERVAL,
        }
    }
}

impl DebugOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::ValidationError(
                "interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

struct FullResponse;

#[async_trait::async_trait]
impl Handler<()> for FullResponse {
    async fn handle(
        &self,
        _: &ExportContext,
        _: &(),
        key: &str,
        params: &[String],
    ) -> Result<ItemValue, PluginError> {
        tracing::debug!(plugin = PLUGIN_NAME, key, ?params, "export");
        Ok(ItemValue::Text(RESPONSE.to_string()))
    }
}

/// Debug plugin answering `debug.external.full`.
pub struct DebugFullPlugin {
    options: RwLock<DebugOptions>,
    dispatcher: Dispatcher<()>,
}

impl std::fmt::Debug for DebugFullPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugFullPlugin")
            .field("options", &self.options())
            .finish_non_exhaustive()
    }
}

impl Default for DebugFullPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugFullPlugin {
    /// Create the plugin with initial options.
    pub fn new() -> Self {
        Self {
            options: RwLock::new(DebugOptions::default()),
            dispatcher: Dispatcher::new().route(
                KEY_FULL,
                "Returns test value.",
                ParamSpec::ANY,
                FullResponse,
            ),
        }
    }

    /// Snapshot of the active options.
    pub fn options(&self) -> DebugOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Plugin for DebugFullPlugin {
    fn metrics(&self) -> Vec<(&'static str, &'static str)> {
        self.dispatcher.metrics().collect()
    }

    fn configure(&self, _: &GlobalOptions, private: Option<&PrivateOptions>) {
        let defaults = DebugOptions {
            interval: CONFIGURED_INTERVAL,
        };
        let options = config::unmarshal(private, defaults.clone())
            .and_then(|o| o.validate().map(|_| o))
            .unwrap_or_else(|e| {
                tracing::warn!(plugin = PLUGIN_NAME, error = %e, "cannot unmarshal configuration options");
                defaults
            });

        tracing::debug!(plugin = PLUGIN_NAME, interval = options.interval, "configure");
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    fn validate(&self, private: Option<&PrivateOptions>) -> Result<(), ConfigError> {
        tracing::debug!(plugin = PLUGIN_NAME, "executing Validate");
        config::unmarshal(private, DebugOptions::default())?.validate()
    }

    fn start(&self) {
        tracing::debug!(plugin = PLUGIN_NAME, "executing Start");
    }

    fn stop(&self) {
        tracing::debug!(plugin = PLUGIN_NAME, "executing Stop");
    }

    fn interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.options().interval))
    }

    async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &ExportContext,
    ) -> Result<ItemValue, PluginError> {
        self.dispatcher.dispatch(ctx, key, params, &NoResource).await
    }
}

/// Register the debug plugin with `registry`.
pub fn register(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(DebugFullPlugin::new()), PLUGIN_NAME)
}
