//! Keyed runtime configuration, read between work items.

pub mod error;
pub mod http;
pub mod memory;
pub mod settings;
pub mod source;

pub use error::ConfigError;
pub use source::ConfigSource;
