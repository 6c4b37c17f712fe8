//! Core plugin trait.

use std::time::Duration;

use crate::config::{ConfigError, GlobalOptions, PrivateOptions};
use crate::plugin::{ExportContext, ItemValue, PluginError};

/// Contract every collector plugin implements.
///
/// The host drives an instance through `configure` → `validate` (optional) →
/// `start` → `export`* → `stop`. Only `export` is called repeatedly, and it may
/// run concurrently with itself and with `stop`. The other hooks are called
/// sequentially.
///
/// # Error Handling Philosophy
///
/// - **Configuration problems** in `configure` are never fatal: the plugin logs
///   a warning and keeps its defaults.
/// - **Export failures** are returned as a classified [`PluginError`] and never
///   panic. A failed call leaves the instance able to serve the next one.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Keys served by this plugin with their descriptions.
    fn metrics(&self) -> Vec<(&'static str, &'static str)>;

    /// Apply global options and the plugin's private configuration.
    ///
    /// Options are re-derived from defaults on every call.
    fn configure(&self, global: &GlobalOptions, private: Option<&PrivateOptions>);

    /// Check a candidate private configuration without applying it.
    fn validate(&self, private: Option<&PrivateOptions>) -> Result<(), ConfigError>;

    /// Prepare resources used by `export`. Must not block.
    fn start(&self) {}

    /// Release resources acquired by `start`. Must be idempotent and must not
    /// block.
    fn stop(&self) {}

    /// Polling period advertised to the host, if the plugin has one.
    fn interval(&self) -> Option<Duration> {
        None
    }

    /// Produce a value for `key`.
    ///
    /// # Returns
    ///
    /// - `Ok(ItemValue)`: scalar or JSON document
    /// - `Err(PluginError)`: one of the classified kinds, wrapping the cause
    async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &ExportContext,
    ) -> Result<ItemValue, PluginError>;
}
