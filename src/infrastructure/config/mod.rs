//! Foreman settings, merged from built-in defaults, `.foreman/*.yaml` files
//! and `FOREMAN_*` environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
