//! Plugin Layer
//!
//! The contract between the host agent and its collector plugins: lifecycle,
//! key dispatch and classified errors.
//!
//! # Architecture
//!
//! - [`Plugin`]: Core trait implemented by every collector
//! - [`Dispatcher`] / [`Handler`]: Fixed key to handler routing inside a plugin
//! - [`PluginError`] / [`ErrorKind`]: Closed error taxonomy for export failures
//! - [`PluginRegistry`]: Registration, lifecycle fan-out and key routing for the host
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use collectkit::plugin::{ExportContext, PluginRegistry};
//! use collectkit::plugins::debug::{DebugFullPlugin, PLUGIN_NAME};
//! use collectkit::config::GlobalOptions;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = PluginRegistry::new();
//! registry.register(Arc::new(DebugFullPlugin::new()), PLUGIN_NAME)?;
//! registry.configure_all(&GlobalOptions::default(), &Default::default());
//! registry.start_all();
//!
//! let ctx = ExportContext::new(std::time::Duration::from_secs(3));
//! let value = registry.export("debug.external.full", &[], &ctx).await?;
//! println!("{value}");
//! registry.stop_all();
//! # Ok(())
//! # }
//! ```

mod context;
pub mod dispatch;
mod error;
mod item;
mod lifecycle;
mod registry;
mod traits;

pub use context::{CancelHandle, ExportContext, Interrupted};
pub use dispatch::{Acquire, Dispatcher, Handler, NoResource, ParamSpec};
pub use error::{BoxError, ErrorKind, PluginError};
pub use item::{ItemKey, ItemValue, KeyParseError};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleState};
pub use registry::{Metric, PluginInstance, PluginRegistry, RegistryError};
pub use traits::Plugin;
