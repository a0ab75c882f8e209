//! Configuration: TOML file plus environment overrides.

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::Config;
