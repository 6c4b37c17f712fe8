//! The PostgreSQL plugin.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::{self, ConfigError, DEFAULT_TIMEOUT, GlobalOptions, PrivateOptions};
use crate::plugin::{
    Acquire, Dispatcher, ExportContext, ItemValue, ParamSpec, Plugin, PluginError, PluginRegistry,
    RegistryError,
};
use crate::plugins::postgres::handlers::{
    DatabaseSize, DatabasesDiscovery, KEY_DB_DISCOVERY, KEY_DB_SIZE, KEY_UPTIME, Uptime,
};
use crate::plugins::postgres::{
    ConnectionProvider, PostgresClient, PostgresOptions, SqlxConnectionManager,
};

/// Registered plugin name.
pub const PLUGIN_NAME: &str = "Postgres";

/// Common key parameters: `[uri|session, user, password, database]`.
const COMMON_PARAMS: ParamSpec = ParamSpec::up_to(4);

type ProviderFactory =
    dyn Fn(&PostgresOptions, Duration) -> Arc<dyn ConnectionProvider> + Send + Sync;

/// Options in effect, replaced as a whole by `configure`.
#[derive(Debug)]
struct Settings {
    options: PostgresOptions,
    timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            options: PostgresOptions::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Collects database metrics over pooled connections.
///
/// The connection provider exists between `start` and `stop`. Exports clone
/// it out of the lock, so a concurrent `stop` lets in-flight calls finish
/// while new ones fail with `ResourceUnavailable`.
pub struct PostgresPlugin {
    settings: RwLock<Arc<Settings>>,
    connections: RwLock<Option<Arc<dyn ConnectionProvider>>>,
    factory: Box<ProviderFactory>,
    dispatcher: Dispatcher<dyn PostgresClient>,
}

impl std::fmt::Debug for PostgresPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPlugin")
            .field("settings", &self.settings())
            .field("started", &self.provider().is_some())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Default for PostgresPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresPlugin {
    /// Create the plugin backed by sqlx connection pools.
    pub fn new() -> Self {
        Self::with_provider_factory(|options, timeout| {
            Arc::new(SqlxConnectionManager::new(timeout, options.keep_alive))
        })
    }

    /// Create the plugin with a custom connection source, built on `start`
    /// from the configured options and timeout.
    pub fn with_provider_factory<F>(factory: F) -> Self
    where
        F: Fn(&PostgresOptions, Duration) -> Arc<dyn ConnectionProvider> + Send + Sync + 'static,
    {
        Self {
            settings: RwLock::new(Arc::new(Settings::default())),
            connections: RwLock::new(None),
            factory: Box::new(factory),
            dispatcher: Dispatcher::new()
                .route(
                    KEY_DB_DISCOVERY,
                    "List of databases. Returns JSON document.",
                    COMMON_PARAMS,
                    DatabasesDiscovery,
                )
                .route(
                    KEY_DB_SIZE,
                    "Database size in bytes.",
                    COMMON_PARAMS,
                    DatabaseSize,
                )
                .route(
                    KEY_UPTIME,
                    "Time since the server started, in seconds.",
                    COMMON_PARAMS,
                    Uptime,
                ),
        }
    }

    /// Snapshot of the active options.
    pub fn options(&self) -> PostgresOptions {
        self.settings().options.clone()
    }

    /// Query timeout in effect.
    pub fn timeout(&self) -> Duration {
        self.settings().timeout
    }

    fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn provider(&self) -> Option<Arc<dyn ConnectionProvider>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Acquire for PostgresPlugin {
    type Resource = Box<dyn PostgresClient>;

    async fn acquire(
        &self,
        ctx: &ExportContext,
        params: &[String],
    ) -> Result<Self::Resource, PluginError> {
        let key = self.settings().options.resolve(params)?;
        let provider = self
            .provider()
            .ok_or_else(|| PluginError::resource_unavailable("plugin is not started"))?;

        tracing::trace!(plugin = PLUGIN_NAME, conn = %key, "Acquiring connection");
        provider
            .acquire(ctx, &key)
            .await
            .map_err(PluginError::resource_unavailable)
    }
}

#[async_trait::async_trait]
impl Plugin for PostgresPlugin {
    fn metrics(&self) -> Vec<(&'static str, &'static str)> {
        self.dispatcher.metrics().collect()
    }

    fn configure(&self, global: &GlobalOptions, private: Option<&PrivateOptions>) {
        let options = config::unmarshal(private, PostgresOptions::default())
            .and_then(|o| o.validate().map(|_| o))
            .unwrap_or_else(|e| {
                tracing::warn!(plugin = PLUGIN_NAME, error = %e, "cannot unmarshal configuration options");
                PostgresOptions::default()
            });
        let timeout = options.timeout.unwrap_or(global.timeout);

        tracing::debug!(
            plugin = PLUGIN_NAME,
            interval = options.interval,
            uri = %options.uri,
            sessions = options.sessions.len(),
            timeout = ?timeout,
            "configure"
        );
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(Settings { options, timeout });
    }

    fn validate(&self, private: Option<&PrivateOptions>) -> Result<(), ConfigError> {
        config::unmarshal(private, PostgresOptions::default())?.validate()
    }

    fn start(&self) {
        let settings = self.settings();
        let provider = (self.factory)(&settings.options, settings.timeout);
        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(provider);
        if let Some(previous) = previous {
            previous.close();
        }
        tracing::debug!(plugin = PLUGIN_NAME, "Connection manager created");
    }

    fn interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.settings().options.interval))
    }

    fn stop(&self) {
        let provider = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(provider) = provider {
            provider.close();
            tracing::debug!(plugin = PLUGIN_NAME, "Connection manager closed");
        }
    }

    async fn export(
        &self,
        key: &str,
        params: &[String],
        ctx: &ExportContext,
    ) -> Result<ItemValue, PluginError> {
        let ctx = ctx.with_timeout(self.timeout());
        self.dispatcher.dispatch(&ctx, key, params, self).await
    }
}

/// Register the PostgreSQL plugin with `registry`.
pub fn register(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(PostgresPlugin::new()), PLUGIN_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ErrorKind;
    use crate::plugins::postgres::{ClientError, ConnKey, Endpoint, Row};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedRow(i64);

    impl Row for FixedRow {
        fn scan_text(&self) -> Result<String, ClientError> {
            Ok(r#"{"data":[{"{#DBNAME}":"postgres"}]}"#.to_string())
        }

        fn scan_i64(&self) -> Result<i64, ClientError> {
            Ok(self.0)
        }
    }

    struct FixedClient;

    #[async_trait::async_trait]
    impl PostgresClient for FixedClient {
        async fn query_row(
            &self,
            _: &ExportContext,
            _: &str,
            _: &[&str],
        ) -> Result<Box<dyn Row>, ClientError> {
            Ok(Box::new(FixedRow(7)))
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        keys: Mutex<Vec<ConnKey>>,
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ConnectionProvider for RecordingProvider {
        async fn acquire(
            &self,
            _: &ExportContext,
            key: &ConnKey,
        ) -> Result<Box<dyn PostgresClient>, ClientError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            self.keys.lock().unwrap().push(key.clone());
            Ok(Box::new(FixedClient))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn plugin() -> (PostgresPlugin, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::default());
        let shared = provider.clone();
        let plugin = PostgresPlugin::with_provider_factory(move |_, _| shared.clone());
        (plugin, provider)
    }

    fn yaml(s: &str) -> PrivateOptions {
        serde_yaml::from_str(s).unwrap()
    }

    fn params(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_metrics() {
        let (plugin, _) = plugin();
        let keys: Vec<_> = plugin.metrics().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![KEY_DB_DISCOVERY, KEY_DB_SIZE, KEY_UPTIME]);
    }

    #[test]
    fn test_configure_timeout_falls_back_to_global() {
        let (plugin, _) = plugin();
        let global = GlobalOptions {
            timeout: Duration::from_secs(7),
        };

        plugin.configure(&global, None);
        assert_eq!(plugin.timeout(), Duration::from_secs(7));

        plugin.configure(&global, Some(&yaml("timeout: 12s")));
        assert_eq!(plugin.timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_configure_malformed_keeps_defaults() {
        let (plugin, _) = plugin();
        for blob in [
            "uri: 'ftp://nope'",
            "keep_alive: 5s",
            "timeout: 2m",
            "port: 5432",
            "sessions: [1, 2]",
        ] {
            plugin.configure(&GlobalOptions::default(), Some(&yaml(blob)));
            assert_eq!(plugin.options(), PostgresOptions::default(), "blob: {blob}");
        }
    }

    #[test]
    fn test_validate_is_side_effect_free() {
        let (plugin, _) = plugin();
        assert!(plugin.validate(Some(&yaml("uri: 'tcp://db:5433'"))).is_ok());
        assert!(plugin.validate(Some(&yaml("keep_alive: 1h"))).is_err());
        assert_eq!(plugin.options(), PostgresOptions::default());
    }

    #[tokio::test]
    async fn test_export_before_start_is_resource_unavailable() {
        let (plugin, _) = plugin();
        let ctx = ExportContext::background();

        let err = plugin.export(KEY_UPTIME, &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);

        // Unknown keys are classified before any resource is needed.
        let err = plugin.export("pgsql.nope", &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKey);
    }

    #[tokio::test]
    async fn test_export_resolves_session_params() {
        let (plugin, provider) = plugin();
        plugin.configure(
            &GlobalOptions::default(),
            Some(&yaml(
                "sessions:\n  replica:\n    uri: 'tcp://replica:6432'\n    user: mon\n",
            )),
        );
        plugin.start();

        let ctx = ExportContext::new(Duration::from_secs(1));
        let value = plugin
            .export(KEY_DB_SIZE, &params(&["replica", "", "", "app"]), &ctx)
            .await
            .unwrap();
        assert_eq!(value, ItemValue::Integer(7));

        let keys = provider.keys.lock().unwrap();
        assert_eq!(
            keys[0].endpoint,
            Endpoint::Tcp {
                host: "replica".into(),
                port: 6432
            }
        );
        assert_eq!(keys[0].user, "mon");
        assert_eq!(keys[0].database, "app");
    }

    #[tokio::test]
    async fn test_export_param_errors() {
        let (plugin, provider) = plugin();
        plugin.configure(&GlobalOptions::default(), None);
        plugin.start();
        let ctx = ExportContext::background();

        let err = plugin
            .export(KEY_UPTIME, &params(&["a", "b", "c", "d", "e"]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);

        let err = plugin
            .export(KEY_UPTIME, &params(&["http://bad"]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);

        assert!(provider.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_closes_provider() {
        let (plugin, provider) = plugin();
        plugin.configure(&GlobalOptions::default(), None);
        plugin.start();

        let ctx = ExportContext::background();
        let value = plugin.export(KEY_DB_DISCOVERY, &[], &ctx).await.unwrap();
        assert!(value.is_document());

        plugin.stop();
        plugin.stop();
        assert!(provider.closed.load(Ordering::SeqCst));

        let err = plugin.export(KEY_DB_DISCOVERY, &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    }

    #[test]
    fn test_configure_applies_interval_with_other_fields() {
        let (plugin, _) = plugin();
        assert_eq!(plugin.interval(), Some(Duration::from_secs(1)));

        let private = yaml("interval: 30\nuser: zbx");
        assert!(plugin.validate(Some(&private)).is_ok());
        plugin.configure(&GlobalOptions::default(), Some(&private));

        assert_eq!(plugin.options().interval, 30);
        assert_eq!(plugin.options().user, "zbx");
        assert_eq!(plugin.interval(), Some(Duration::from_secs(30)));

        plugin.configure(&GlobalOptions::default(), Some(&yaml("interval: 0\nuser: zbx")));
        assert_eq!(plugin.options(), PostgresOptions::default());
    }

    /// Client whose every query takes `delay`, bounded by the call context.
    struct SlowClient {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl PostgresClient for SlowClient {
        async fn query_row(
            &self,
            ctx: &ExportContext,
            _: &str,
            _: &[&str],
        ) -> Result<Box<dyn Row>, ClientError> {
            ctx.run(tokio::time::sleep(self.delay)).await?;
            Ok(Box::new(FixedRow(1)))
        }
    }

    /// Provider that waits `acquire_delay` before lending a [`SlowClient`].
    struct SlowProvider {
        acquire_delay: Duration,
        query_delay: Duration,
    }

    #[async_trait::async_trait]
    impl ConnectionProvider for SlowProvider {
        async fn acquire(
            &self,
            ctx: &ExportContext,
            _: &ConnKey,
        ) -> Result<Box<dyn PostgresClient>, ClientError> {
            ctx.run(tokio::time::sleep(self.acquire_delay)).await?;
            Ok(Box::new(SlowClient {
                delay: self.query_delay,
            }))
        }

        fn close(&self) {}
    }

    fn slow_plugin(acquire_delay: Duration, query_delay: Duration) -> PostgresPlugin {
        let plugin = PostgresPlugin::with_provider_factory(move |_, _| {
            Arc::new(SlowProvider {
                acquire_delay,
                query_delay,
            })
        });
        plugin.configure(&GlobalOptions::default(), None);
        plugin.start();
        plugin
    }

    #[tokio::test]
    async fn test_query_deadline_is_cannot_fetch_data() {
        let plugin = slow_plugin(Duration::ZERO, Duration::from_secs(10));
        let ctx = ExportContext::new(Duration::from_millis(50));

        let err = plugin.export(KEY_UPTIME, &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotFetchData);
        assert!(err.to_string().contains("timeout elapsed"));
    }

    #[tokio::test]
    async fn test_cancel_during_acquire_is_resource_unavailable() {
        let plugin = slow_plugin(Duration::from_secs(10), Duration::ZERO);
        let (ctx, handle) = ExportContext::cancellable(Duration::from_secs(30));

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let err = plugin.export(KEY_UPTIME, &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert!(err.to_string().contains("call cancelled"));
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_during_export_lets_call_finish() {
        let plugin = Arc::new(slow_plugin(Duration::ZERO, Duration::from_millis(200)));

        let in_flight = tokio::spawn({
            let plugin = plugin.clone();
            async move {
                let ctx = ExportContext::new(Duration::from_secs(5));
                plugin.export(KEY_UPTIME, &[], &ctx).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        plugin.stop();

        assert_eq!(in_flight.await.unwrap().unwrap(), ItemValue::Integer(1));

        let ctx = ExportContext::new(Duration::from_secs(1));
        let err = plugin.export(KEY_UPTIME, &[], &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    }
}
