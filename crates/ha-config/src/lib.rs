//! Configuration loading and live core configuration
//!
//! This crate provides YAML configuration loading with support for the
//! platform's custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! It also owns the core location settings (`CoreConfig`) and their live,
//! observable form (`LocationConfig`).
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{load_yaml, section, CoreConfig};
//!
//! let config = load_yaml("/config", "configuration.yaml")?;
//! let core = CoreConfig::from_yaml(&config)?;
//! let zones = section(&config, "zone");
//! ```

mod core_config;
mod error;
mod loader;
mod location;
mod secrets;

pub use core_config::{validate_latitude, validate_longitude, CoreConfig};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, section, YamlLoader};
pub use location::{CoreConfigUpdate, LocationConfig};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
