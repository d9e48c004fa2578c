//! Core location configuration
//!
//! Parses the `homeassistant:` section from configuration.yaml. Only the
//! location related keys are modeled; unknown keys are ignored.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{load_yaml, section};

/// Core configuration from the `homeassistant:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Name of the location (e.g., "Home"); becomes the home zone's name
    #[serde(default = "default_name")]
    pub name: String,

    /// Latitude of the location
    #[serde(default)]
    pub latitude: f64,

    /// Longitude of the location
    #[serde(default)]
    pub longitude: f64,

    /// Elevation in meters
    #[serde(default)]
    pub elevation: i32,

    /// Radius of the home zone in meters
    #[serde(default = "default_radius")]
    pub radius: f64,

    /// Time zone (e.g., "America/Los_Angeles")
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_name() -> String {
    "Home".to_string()
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_radius() -> f64 {
    100.0
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0,
            radius: default_radius(),
            time_zone: default_time_zone(),
        }
    }
}

impl CoreConfig {
    /// Load core configuration from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), "configuration.yaml")?;
        Self::from_yaml(&yaml)
    }

    /// Parse core configuration from a loaded configuration root
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        if !yaml.is_mapping() {
            return Err(ConfigError::invalid("root", "configuration must be a mapping"));
        }

        let config: CoreConfig = match section(yaml, "homeassistant") {
            Some(Value::Null) | None => CoreConfig::default(),
            Some(ha_section) => serde_yaml::from_value(ha_section.clone())
                .map_err(|e| ConfigError::invalid("homeassistant", e.to_string()))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check coordinate ranges and the home radius
    pub fn validate(&self) -> ConfigResult<()> {
        validate_latitude(self.latitude)?;
        validate_longitude(self.longitude)?;
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(ConfigError::invalid(
                "radius",
                format!("{} is not a non-negative distance", self.radius),
            ));
        }
        Ok(())
    }
}

/// Latitude must be within [-90, 90]
pub fn validate_latitude(latitude: f64) -> ConfigResult<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ConfigError::invalid(
            "latitude",
            format!("{} is outside [-90, 90]", latitude),
        ));
    }
    Ok(())
}

/// Longitude must be within [-180, 180]
pub fn validate_longitude(longitude: f64) -> ConfigResult<()> {
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ConfigError::invalid(
            "longitude",
            format!("{} is outside [-180, 180]", longitude),
        ));
    }
    Ok(())
}
