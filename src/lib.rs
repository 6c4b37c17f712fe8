//! Collectkit - Collector Plugin Contract
//!
//! This crate provides the contract between a monitoring agent and the plugins
//! that collect its metrics. It can be used as a library by an agent, or run as
//! a standalone binary with the `collectkit` executable to exercise the bundled
//! plugins.
//!
//! # Architecture
//!
//! - **Plugin**: Lifecycle, key dispatch, classified errors and the registry
//! - **Config**: Agent options and typed decoding of private plugin sections
//! - **Plugins**: Bundled collectors (debug, PostgreSQL)
//!
//! # Example
//!
//! ```rust,no_run
//! use collectkit::{AgentConfig, ExportContext, PluginRegistry, plugins};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AgentConfig::load("configs/agent.yaml")?;
//!
//!     let mut registry = PluginRegistry::new();
//!     plugins::register_all(&mut registry)?;
//!     registry.configure_all(&config.global, &config.plugins);
//!     registry.start_all();
//!
//!     let ctx = ExportContext::new(config.global.timeout);
//!     let value = registry.export("pgsql.db.discovery", &[], &ctx).await?;
//!     println!("{value}");
//!
//!     registry.stop_all();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod plugin;
pub mod plugins;

pub use config::{AgentConfig, ConfigError, GlobalOptions, PrivateOptions};
pub use plugin::{
    ErrorKind, ExportContext, ItemKey, ItemValue, Plugin, PluginError, PluginRegistry,
};
