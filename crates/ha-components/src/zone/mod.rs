//! Zone integration
//!
//! Circular geographic regions with live occupancy counts. Each zone is
//! published as `zone.<id>` whose state is the number of tracked entities
//! (persons by default) whose own state names the zone.
//!
//! - [`location`]: distance, containment and active-zone resolution
//! - [`occupancy`]: per-zone membership of tracked entities
//! - [`ZoneManager`]: the live zone set with storage-backed CRUD
//! - [`websocket`]: the `zone/*` command surface

pub mod collection;
pub mod config;
pub mod location;
pub mod model;
pub mod occupancy;
pub mod websocket;

use std::sync::Arc;

use ha_config::ConfigError;
use ha_core::ServiceCall;
use ha_registries::StorageError;
use ha_service_registry::{ServiceError, ServiceRegistry};
use thiserror::Error;
use tracing::{info, warn};

pub use collection::{zone_store, ZoneManager, STORAGE_KEY};
pub use config::{parse_zone_section, YamlConfigSource, ZoneConfigSource};
pub use location::{
    contains, contains_with_accuracy, distance, in_zone, resolve_active,
    resolve_active_with_accuracy, EARTH_RADIUS_M,
};
pub use model::{Point, Zone, ZoneConfig, ZoneCreate, ZoneItem, ZoneSource, ZoneUpdate};
pub use occupancy::OccupancyTracker;

pub const DOMAIN: &str = "zone";

/// Id of the zone generated from the core location settings
pub const HOME_ZONE: &str = "home";

pub const ATTR_RADIUS: &str = "radius";
pub const ATTR_PASSIVE: &str = "passive";

/// Radius in meters of zones that do not set one
pub const DEFAULT_RADIUS: f64 = 100.0;

pub const SERVICE_RELOAD: &str = "reload";

/// Errors raised by zone operations
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("Unable to find zone_id {0}")]
    NotFound(String),

    #[error("Zone {0} is not editable")]
    NotEditable(String),

    #[error("invalid zone: {0}")]
    InvalidInput(String),

    #[error("failed to persist zones: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ZoneResult<T> = Result<T, ZoneError>;

/// Register the admin-only `zone.reload` service
pub fn register_services(
    services: &ServiceRegistry,
    manager: Arc<ZoneManager>,
    source: Arc<dyn ZoneConfigSource>,
) {
    services.register_admin(DOMAIN, SERVICE_RELOAD, move |call: ServiceCall| {
        let manager = manager.clone();
        let source = source.clone();
        async move {
            let config_root = source
                .load_config()
                .map_err(|e| ServiceError::CallFailed(e.to_string()))?;
            manager
                .reload(&config_root, call.context)
                .await
                .map_err(|e| {
                    warn!("Zone reload failed: {}", e);
                    ServiceError::CallFailed(e.to_string())
                })?;
            Ok(None)
        }
    });
    info!("Zone services registered");
}
