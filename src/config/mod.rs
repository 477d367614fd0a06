//! Client configuration: TOML schema, validation and file loading.

/// Configuration error types.
pub mod error;

/// Configuration file loader.
pub mod loader;

/// TOML configuration schema and validation.
pub mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{ClientConfig, FrameConfig, ValidatedConfig};
