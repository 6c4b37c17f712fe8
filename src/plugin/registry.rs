//! Plugin registry for managing plugin lifecycle and key routing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::config::{ConfigError, GlobalOptions, PrivateOptions};
use crate::plugin::{
    ExportContext, ItemValue, Lifecycle, LifecycleError, LifecycleState, Plugin, PluginError,
};

/// Errors raised while registering plugins.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Plugin name is empty.
    #[error("plugin name cannot be empty")]
    EmptyName,

    /// A plugin with the same name is already registered.
    #[error("duplicate plugin name: '{0}'")]
    DuplicatePlugin(String),

    /// A plugin registered no keys.
    #[error("plugin '{0}' registers no metrics")]
    NoMetrics(String),

    /// A key is already served by another plugin (or listed twice).
    #[error("key '{key}' of plugin '{plugin}' is already registered by '{owner}'")]
    DuplicateKey {
        key: String,
        plugin: String,
        owner: String,
    },
}

/// A registered metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    /// Item key.
    pub key: String,
    /// Human-readable description.
    pub description: String,
    /// Name of the owning plugin.
    pub plugin: String,
}

/// A plugin together with its lifecycle state.
///
/// All host calls go through this wrapper so that the state machine is
/// enforced in one place for every plugin.
pub struct PluginInstance {
    name: String,
    plugin: Arc<dyn Plugin>,
    keys: BTreeSet<String>,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl PluginInstance {
    fn new(name: String, plugin: Arc<dyn Plugin>, keys: BTreeSet<String>) -> Self {
        Self {
            name,
            plugin,
            keys,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Registered plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Polling period advertised by the plugin.
    pub fn interval(&self) -> Option<std::time::Duration> {
        self.plugin.interval()
    }

    /// Configure the plugin. Allowed until it is started.
    pub fn configure(
        &self,
        global: &GlobalOptions,
        private: Option<&PrivateOptions>,
    ) -> Result<(), LifecycleError> {
        let state = self.lifecycle.state();
        if !matches!(
            state,
            LifecycleState::Unconfigured | LifecycleState::Configured
        ) {
            return Err(LifecycleError {
                action: "configure",
                state,
            });
        }
        self.plugin.configure(global, private);
        self.lifecycle.configure()?;
        tracing::debug!(plugin = %self.name, "Plugin configured");
        Ok(())
    }

    /// Validate a candidate configuration. Allowed in any state.
    pub fn validate(&self, private: Option<&PrivateOptions>) -> Result<(), ConfigError> {
        self.plugin.validate(private)
    }

    /// Start the plugin.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle.start()?;
        self.plugin.start();
        tracing::info!(plugin = %self.name, "Plugin started");
        Ok(())
    }

    /// Stop the plugin. Stopping twice is a no-op.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        if self.lifecycle.stop()? {
            self.plugin.stop();
            tracing::info!(plugin = %self.name, "Plugin stopped");
        }
        Ok(())
    }

    /// Export a key.
    ///
    /// Keys the plugin was not registered with fail with `UnsupportedKey`
    /// whatever the state; otherwise fails with `ResourceUnavailable` unless
    /// started.
    pub async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &ExportContext,
    ) -> Result<ItemValue, PluginError> {
        if !self.keys.contains(key) {
            return Err(PluginError::unsupported_key(key));
        }
        self.lifecycle
            .ensure_started()
            .map_err(PluginError::resource_unavailable)?;

        let start = Instant::now();
        let result = self.plugin.export(key, params, ctx).await;
        let duration_ms = start.elapsed().as_millis();

        match &result {
            Ok(_) => {
                tracing::debug!(plugin = %self.name, key, duration_ms, "Export succeeded");
            }
            Err(e) if !e.kind().is_hard_failure() => {
                tracing::debug!(plugin = %self.name, key, duration_ms, "Export returned no data");
            }
            Err(e) => {
                tracing::warn!(
                    plugin = %self.name,
                    key,
                    kind = %e.kind(),
                    retryable = e.kind().is_retryable(),
                    error = %e,
                    "Export failed"
                );
            }
        }
        result
    }
}

/// Registry of plugins and the keys they serve.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<PluginInstance>>,
    metrics: BTreeMap<String, Metric>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_count", &self.plugins.len())
            .field("metric_count", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `name` serving `metrics` (`(key, description)`).
    ///
    /// Nothing is registered if any key collides.
    pub fn register_metrics(
        &mut self,
        plugin: Arc<dyn Plugin>,
        name: &str,
        metrics: &[(&str, &str)],
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.plugins.contains_key(name) {
            return Err(RegistryError::DuplicatePlugin(name.to_string()));
        }
        if metrics.is_empty() {
            return Err(RegistryError::NoMetrics(name.to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for (key, _) in metrics {
            if let Some(existing) = self.metrics.get(*key) {
                return Err(RegistryError::DuplicateKey {
                    key: key.to_string(),
                    plugin: name.to_string(),
                    owner: existing.plugin.clone(),
                });
            }
            if !seen.insert(*key) {
                return Err(RegistryError::DuplicateKey {
                    key: key.to_string(),
                    plugin: name.to_string(),
                    owner: name.to_string(),
                });
            }
        }

        for (key, description) in metrics {
            self.metrics.insert(
                key.to_string(),
                Metric {
                    key: key.to_string(),
                    description: description.to_string(),
                    plugin: name.to_string(),
                },
            );
        }
        self.plugins.insert(
            name.to_string(),
            Arc::new(PluginInstance::new(
                name.to_string(),
                plugin,
                metrics.iter().map(|(key, _)| key.to_string()).collect(),
            )),
        );

        tracing::info!(plugin = %name, metric_count = metrics.len(), "Plugin registered");
        Ok(())
    }

    /// Register a plugin with the keys it advertises through [`Plugin::metrics`].
    pub fn register(&mut self, plugin: Arc<dyn Plugin>, name: &str) -> Result<(), RegistryError> {
        let metrics = plugin.metrics();
        self.register_metrics(plugin, name, &metrics)
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.plugins.get(name).cloned()
    }

    /// Look up the plugin serving `key`.
    pub fn plugin_for_key(&self, key: &str) -> Option<Arc<PluginInstance>> {
        self.metrics
            .get(key)
            .and_then(|m| self.plugins.get(&m.plugin))
            .cloned()
    }

    /// All registered metrics, sorted by key.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// All registered plugins, sorted by name.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<PluginInstance>> {
        self.plugins.values()
    }

    /// Number of registered plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Configure every plugin with its private section from `private`.
    ///
    /// Sections for unknown plugins are reported and ignored.
    pub fn configure_all(
        &self,
        global: &GlobalOptions,
        private: &BTreeMap<String, PrivateOptions>,
    ) {
        for name in private.keys() {
            if !self.plugins.contains_key(name) {
                tracing::warn!(plugin = %name, "Configuration for unknown plugin ignored");
            }
        }
        for (name, instance) in &self.plugins {
            if let Err(e) = instance.configure(global, private.get(name)) {
                tracing::warn!(plugin = %name, error = %e, "Plugin configure rejected");
            }
        }
    }

    /// Validate every private section against its plugin.
    pub fn validate_all(
        &self,
        private: &BTreeMap<String, PrivateOptions>,
    ) -> Result<(), ConfigError> {
        for (name, instance) in &self.plugins {
            instance.validate(private.get(name)).map_err(|e| {
                ConfigError::ValidationError(format!("plugin '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Start every configured plugin.
    pub fn start_all(&self) {
        for (name, instance) in &self.plugins {
            if let Err(e) = instance.start() {
                tracing::warn!(plugin = %name, error = %e, "Plugin start rejected");
            }
        }
    }

    /// Stop every started plugin.
    pub fn stop_all(&self) {
        for (name, instance) in &self.plugins {
            if let Err(e) = instance.stop() {
                tracing::debug!(plugin = %name, error = %e, "Plugin stop skipped");
            }
        }
    }

    /// Route an export to the plugin serving `key`.
    pub async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &ExportContext,
    ) -> Result<ItemValue, PluginError> {
        let instance = self
            .plugin_for_key(key)
            .ok_or_else(|| PluginError::unsupported_key(key))?;
        instance.export(key, params, ctx).await
    }
}
