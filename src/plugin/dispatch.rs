//! Key dispatch and handler protocol.
//!
//! A plugin owns one [`Dispatcher`], built once at construction, mapping each
//! item key it serves to a [`Handler`] and the parameter arity that handler
//! accepts. Serving a new metric means registering one more route; the
//! dispatch path itself never changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::plugin::{ExportContext, ItemValue, PluginError};

/// Accepted parameter count for a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Minimum number of parameters.
    pub min: usize,
    /// Maximum number of parameters.
    pub max: usize,
}

impl ParamSpec {
    /// Handler takes no parameters.
    pub const NONE: Self = Self { min: 0, max: 0 };

    /// Handler accepts any number of parameters.
    pub const ANY: Self = Self {
        min: 0,
        max: usize::MAX,
    };

    /// Handler takes between `min` and `max` parameters.
    pub const fn range(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Handler takes at most `max` parameters.
    pub const fn up_to(max: usize) -> Self {
        Self { min: 0, max }
    }

    /// Check a parameter list against these bounds.
    pub fn check(&self, params: &[String]) -> Result<(), PluginError> {
        if params.len() < self.min {
            return Err(PluginError::invalid_params(format!(
                "too few parameters: got {}, expected at least {}",
                params.len(),
                self.min
            )));
        }
        if params.len() > self.max {
            return Err(PluginError::invalid_params(format!(
                "too many parameters: got {}, expected at most {}",
                params.len(),
                self.max
            )));
        }
        Ok(())
    }
}

/// One handler: produce a value for a key from a borrowed resource.
///
/// Handlers must be stateless; everything they need arrives as arguments.
#[async_trait::async_trait]
pub trait Handler<R: ?Sized>: Send + Sync + 'static {
    /// Produce a value for `key` or fail with a classified error.
    async fn handle(
        &self,
        ctx: &ExportContext,
        resource: &R,
        key: &str,
        params: &[String],
    ) -> Result<ItemValue, PluginError>;
}

/// Obtains the call-scoped resource a handler runs against.
///
/// Implementations map acquisition failures to
/// [`ErrorKind::ResourceUnavailable`](crate::plugin::ErrorKind::ResourceUnavailable).
#[async_trait::async_trait]
pub trait Acquire: Send + Sync {
    /// Resource lent to the handler; dropped when the call returns.
    type Resource: Send + Sync;

    /// Acquire the resource for one call.
    async fn acquire(
        &self,
        ctx: &ExportContext,
        params: &[String],
    ) -> Result<Self::Resource, PluginError>;
}

/// Acquirer for plugins that need no external resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResource;

#[async_trait::async_trait]
impl Acquire for NoResource {
    type Resource = ();

    async fn acquire(&self, _: &ExportContext, _: &[String]) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A registered key.
pub struct Route<R: ?Sized> {
    description: &'static str,
    params: ParamSpec,
    handler: Arc<dyn Handler<R>>,
}

impl<R: ?Sized> Route<R> {
    /// Human-readable description of the metric.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Accepted parameter count.
    pub fn params(&self) -> ParamSpec {
        self.params
    }
}

/// Fixed key to handler mapping.
pub struct Dispatcher<R: ?Sized> {
    routes: BTreeMap<&'static str, Route<R>>,
}

impl<R: ?Sized> Default for Dispatcher<R> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }
}

impl<R: ?Sized> fmt::Debug for Dispatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("keys", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<R: ?Sized + Send + Sync + 'static> Dispatcher<R> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `key`.
    ///
    /// Registering the same key twice replaces the earlier route; routes are
    /// declared in one place per plugin so this only happens by mistake.
    #[must_use]
    pub fn route<H>(
        mut self,
        key: &'static str,
        description: &'static str,
        params: ParamSpec,
        handler: H,
    ) -> Self
    where
        H: Handler<R>,
    {
        let prev = self.routes.insert(
            key,
            Route {
                description,
                params,
                handler: Arc::new(handler),
            },
        );
        if prev.is_some() {
            tracing::warn!(key, "Handler registered twice, keeping the last one");
        }
        self
    }

    /// Resolve a key.
    pub fn resolve(&self, key: &str) -> Result<&Route<R>, PluginError> {
        self.routes
            .get(key)
            .ok_or_else(|| PluginError::unsupported_key(key))
    }

    /// Registered keys with their descriptions, sorted by key.
    pub fn metrics(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.routes.iter().map(|(k, r)| (*k, r.description))
    }

    /// Full export path: resolve, check arity, acquire, invoke.
    pub async fn dispatch<A>(
        &self,
        ctx: &ExportContext,
        key: &str,
        params: &[String],
        acquirer: &A,
    ) -> Result<ItemValue, PluginError>
    where
        A: Acquire + ?Sized,
        A::Resource: std::borrow::Borrow<R>,
    {
        use std::borrow::Borrow;

        let route = self.resolve(key)?;
        route.params.check(params)?;

        let resource = acquirer.acquire(ctx, params).await?;
        route
            .handler
            .handle(ctx, resource.borrow(), key, params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait::async_trait]
    impl Handler<()> for Echo {
        async fn handle(
            &self,
            _: &ExportContext,
            _: &(),
            key: &str,
            params: &[String],
        ) -> Result<ItemValue, PluginError> {
            Ok(ItemValue::Text(format!("{key}:{}", params.join("|"))))
        }
    }

    struct CountingAcquire {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Acquire for CountingAcquire {
        type Resource = ();

        async fn acquire(&self, _: &ExportContext, _: &[String]) -> Result<(), PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PluginError::resource_unavailable("pool exhausted"))
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher() -> Dispatcher<()> {
        Dispatcher::new()
            .route("echo", "Echoes parameters.", ParamSpec::range(1, 2), Echo)
            .route("echo.none", "Takes nothing.", ParamSpec::NONE, Echo)
    }

    fn params(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let ctx = ExportContext::background();
        let out = dispatcher()
            .dispatch(&ctx, "echo", &params(&["a", "b"]), &NoResource)
            .await
            .unwrap();
        assert_eq!(out, ItemValue::Text("echo:a|b".into()));
    }

    #[tokio::test]
    async fn test_unknown_key_ignores_params() {
        let ctx = ExportContext::background();
        let d = dispatcher();
        for p in [params(&[]), params(&["x"]), params(&["x", "y", "z", "w"])] {
            let err = d.dispatch(&ctx, "nope", &p, &NoResource).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedKey);
        }
    }

    #[tokio::test]
    async fn test_arity_checked_before_acquire() {
        let ctx = ExportContext::background();
        let acquirer = CountingAcquire {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let d = dispatcher();

        let err = d.dispatch(&ctx, "echo", &[], &acquirer).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert!(err.to_string().contains("too few"));

        let err = d
            .dispatch(&ctx, "echo.none", &params(&["x"]), &acquirer)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert!(err.to_string().contains("too many"));

        assert_eq!(acquirer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquire_failure_is_resource_unavailable() {
        let ctx = ExportContext::background();
        let acquirer = CountingAcquire {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let err = dispatcher()
            .dispatch(&ctx, "echo", &params(&["a"]), &acquirer)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metrics_listing() {
        let d = dispatcher();
        let metrics: Vec<_> = d.metrics().collect();
        assert_eq!(
            metrics,
            vec![("echo", "Echoes parameters."), ("echo.none", "Takes nothing.")]
        );
        assert_eq!(d.resolve("echo").unwrap().params(), ParamSpec::range(1, 2));
    }
}
