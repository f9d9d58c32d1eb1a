//! Application configuration module.
//!
//! Manages the TOML config file: device and guide endpoints, fetch
//! horizon and retries, output location, placeholder defaults and server
//! settings.

#[allow(clippy::module_inception)]
mod config;
mod paths;

#[allow(clippy::module_name_repetitions)]
pub use config::AppConfig;
pub use paths::resolve_config_path;
