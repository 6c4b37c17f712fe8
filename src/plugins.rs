//! Bundled collector plugins.
//!
//! - [`debug`]: Constant-response plugin for exercising the host contract
//! - [`postgres`]: PostgreSQL metrics and database discovery

use crate::plugin::{PluginRegistry, RegistryError};

pub mod debug;
pub mod postgres;

/// Register every bundled plugin with `registry`.
pub fn register_all(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    debug::register(registry)?;
    postgres::register(registry)?;
    Ok(())
}
