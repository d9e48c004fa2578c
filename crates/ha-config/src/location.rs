//! Live core configuration
//!
//! `LocationConfig` owns the running instance's location settings. Components
//! read a snapshot whenever they need it and learn about changes through the
//! `core_config_updated` event fired on every effective update.

use std::sync::{Arc, RwLock};

use ha_core::events::CoreConfigUpdatedData;
use ha_core::Context;
use ha_event_bus::EventBus;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core_config::CoreConfig;
use crate::error::{ConfigError, ConfigResult};

/// Partial update of the location settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Shared, observable core configuration
pub struct LocationConfig {
    current: RwLock<CoreConfig>,
    bus: Arc<EventBus>,
}

impl LocationConfig {
    pub fn new(config: CoreConfig, bus: Arc<EventBus>) -> Self {
        Self {
            current: RwLock::new(config),
            bus,
        }
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> CoreConfig {
        match self.current.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply a partial update
    ///
    /// The update is validated as a whole before anything is written. When at
    /// least one value actually changed, `core_config_updated` is fired after
    /// the new settings are in place. Returns the names of the changed keys.
    pub fn update(&self, update: CoreConfigUpdate, context: Context) -> ConfigResult<Vec<String>> {
        let mut next = self.snapshot();
        let mut changed = Vec::new();

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("name", "location name cannot be empty"));
            }
            if name != next.name {
                next.name = name;
                changed.push("location_name".to_string());
            }
        }
        if let Some(latitude) = update.latitude.filter(|v| *v != next.latitude) {
            next.latitude = latitude;
            changed.push("latitude".to_string());
        }
        if let Some(longitude) = update.longitude.filter(|v| *v != next.longitude) {
            next.longitude = longitude;
            changed.push("longitude".to_string());
        }
        if let Some(elevation) = update.elevation.filter(|v| *v != next.elevation) {
            next.elevation = elevation;
            changed.push("elevation".to_string());
        }
        if let Some(radius) = update.radius.filter(|v| *v != next.radius) {
            next.radius = radius;
            changed.push("radius".to_string());
        }
        if let Some(time_zone) = update.time_zone.filter(|v| *v != next.time_zone) {
            next.time_zone = time_zone;
            changed.push("time_zone".to_string());
        }

        next.validate()?;

        if changed.is_empty() {
            return Ok(changed);
        }

        match self.current.write() {
            Ok(mut current) => *current = next,
            Err(poisoned) => {
                warn!("Core config lock poisoned, overwriting");
                *poisoned.into_inner() = next;
            }
        }

        info!(changed = ?changed, "Core configuration updated");
        self.bus.fire_typed(
            CoreConfigUpdatedData {
                changed: changed.clone(),
            },
            context,
        );
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::CORE_CONFIG_UPDATE;
    use std::sync::Mutex;

    fn make_test_setup() -> (Arc<EventBus>, LocationConfig) {
        let bus = Arc::new(EventBus::new());
        let config = LocationConfig::new(CoreConfig::default(), bus.clone());
        (bus, config)
    }

    #[test]
    fn test_update_fires_event_with_changed_keys() {
        let (bus, config) = make_test_setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.listen_typed::<CoreConfigUpdatedData, _>(move |event| {
            sink.lock().unwrap().push(event.data.changed);
        });

        let changed = config
            .update(
                CoreConfigUpdate {
                    latitude: Some(32.87),
                    longitude: Some(0.0),
                    name: Some("Beach".to_string()),
                    ..Default::default()
                },
                Context::new(),
            )
            .unwrap();

        assert_eq!(changed, vec!["location_name".to_string(), "latitude".to_string()]);
        assert_eq!(config.snapshot().name, "Beach");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_noop_update_is_silent() {
        let (bus, config) = make_test_setup();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        bus.listen(CORE_CONFIG_UPDATE, move |_| *counter.lock().unwrap() += 1);

        let changed = config
            .update(
                CoreConfigUpdate {
                    name: Some("Home".to_string()),
                    ..Default::default()
                },
                Context::new(),
            )
            .unwrap();

        assert!(changed.is_empty());
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn test_invalid_update_leaves_config_unchanged() {
        let (_, config) = make_test_setup();

        let result = config.update(
            CoreConfigUpdate {
                latitude: Some(120.0),
                name: Some("Elsewhere".to_string()),
                ..Default::default()
            },
            Context::new(),
        );

        assert!(result.is_err());
        assert_eq!(config.snapshot(), CoreConfig::default());
    }
}
