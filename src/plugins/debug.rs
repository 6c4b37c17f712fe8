//! Debug plugins.
//!
//! - [`DebugFullPlugin`]: implements every lifecycle hook and answers a fixed string

mod full;

pub use full::{DebugFullPlugin, DebugOptions, KEY_FULL, PLUGIN_NAME, register};
