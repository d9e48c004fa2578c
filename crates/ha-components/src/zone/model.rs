//! Zone data model
//!
//! [`Zone`] is a live circular region. [`ZoneItem`] is the record kept in the
//! `zone` store; [`ZoneConfig`] is one entry of the `zone:` YAML section.

use ha_config::{validate_latitude, validate_longitude, CoreConfig};
use ha_core::{attrs, Attributes, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ZoneError, ZoneResult, ATTR_PASSIVE, ATTR_RADIUS, DEFAULT_RADIUS, DOMAIN, HOME_ZONE};

/// Icon of the generated home zone
pub const HOME_ICON: &str = "mdi:home";

/// Name a static zone must carry to replace the generated home zone
pub const HOME_OVERRIDE_NAME: &str = "Home";

/// Where a zone came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    /// Generated from the core location settings
    Home,
    /// `zone:` section of configuration.yaml
    Config,
    /// The `zone` store, including zones imported from legacy config entries
    Storage,
}

/// A point on the earth's surface in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A live zone
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub entity_id: EntityId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters, never negative
    pub radius: f64,
    pub passive: bool,
    pub icon: Option<String>,
    pub source: ZoneSource,
}

impl Zone {
    /// Home zone built from the core location settings
    pub fn home(core: &CoreConfig) -> ZoneResult<Self> {
        Ok(Self {
            id: HOME_ZONE.to_string(),
            entity_id: zone_entity_id(HOME_ZONE)?,
            name: core.name.clone(),
            latitude: core.latitude,
            longitude: core.longitude,
            radius: core.radius,
            passive: false,
            icon: Some(HOME_ICON.to_string()),
            source: ZoneSource::Home,
        })
    }

    pub fn from_config(id: &str, config: &ZoneConfig) -> ZoneResult<Self> {
        Ok(Self {
            id: id.to_string(),
            entity_id: zone_entity_id(id)?,
            name: config.name.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            radius: config.radius,
            passive: config.passive,
            icon: config.icon.clone(),
            source: ZoneSource::Config,
        })
    }

    pub fn from_item(item: &ZoneItem) -> ZoneResult<Self> {
        Ok(Self {
            id: item.id.clone(),
            entity_id: zone_entity_id(&item.id)?,
            name: item.name.clone(),
            latitude: item.latitude,
            longitude: item.longitude,
            radius: item.radius,
            passive: item.passive,
            icon: item.icon.clone(),
            source: ZoneSource::Storage,
        })
    }

    pub fn center(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }

    /// Only zones from the store can be changed at runtime
    pub fn editable(&self) -> bool {
        self.source == ZoneSource::Storage
    }

    /// Stored form of the zone
    pub fn to_item(&self) -> ZoneItem {
        ZoneItem {
            id: self.id.clone(),
            name: self.name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            radius: self.radius,
            passive: self.passive,
            icon: self.icon.clone(),
        }
    }

    /// Attributes published with the zone's state
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(attrs::ATTR_LATITUDE.to_string(), json!(self.latitude));
        attributes.insert(attrs::ATTR_LONGITUDE.to_string(), json!(self.longitude));
        attributes.insert(ATTR_RADIUS.to_string(), json!(self.radius));
        attributes.insert(ATTR_PASSIVE.to_string(), json!(self.passive));
        attributes.insert(attrs::ATTR_EDITABLE.to_string(), json!(self.editable()));
        attributes.insert(attrs::ATTR_FRIENDLY_NAME.to_string(), json!(self.name));
        if let Some(icon) = &self.icon {
            attributes.insert(attrs::ATTR_ICON.to_string(), json!(icon));
        }
        attributes
    }
}

/// Zone ids share a namespace with entity states, so the two placeholder
/// states cannot name a zone
pub(crate) fn zone_entity_id(id: &str) -> ZoneResult<EntityId> {
    if id == STATE_UNKNOWN || id == STATE_UNAVAILABLE {
        return Err(ZoneError::InvalidInput(format!(
            "'{}' is reserved and cannot be a zone id",
            id
        )));
    }
    EntityId::new(DOMAIN, id)
        .map_err(|e| ZoneError::InvalidInput(format!("invalid zone id '{}': {}", id, e)))
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS
}

/// A zone record in the `zone` store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneItem {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default)]
    pub passive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// One entry of the `zone:` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Fields of a new zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCreate {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub icon: Option<String>,
}

impl ZoneCreate {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            radius: DEFAULT_RADIUS,
            passive: false,
            icon: None,
        }
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn validate(&self) -> ZoneResult<()> {
        validate_fields(&self.name, self.latitude, self.longitude, self.radius)
    }

    pub(crate) fn into_item(self, id: String) -> ZoneItem {
        ZoneItem {
            id,
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            radius: self.radius,
            passive: self.passive,
            icon: self.icon,
        }
    }
}

/// Partial update of a stored zone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ZoneUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.radius.is_none()
            && self.passive.is_none()
            && self.icon.is_none()
    }

    /// Merge into an existing record and validate the result
    pub fn apply(&self, item: &ZoneItem) -> ZoneResult<ZoneItem> {
        if self.is_empty() {
            return Err(ZoneError::InvalidInput(
                "at least one field must be updated".to_string(),
            ));
        }

        let merged = ZoneItem {
            id: item.id.clone(),
            name: self.name.clone().unwrap_or_else(|| item.name.clone()),
            latitude: self.latitude.unwrap_or(item.latitude),
            longitude: self.longitude.unwrap_or(item.longitude),
            radius: self.radius.unwrap_or(item.radius),
            passive: self.passive.unwrap_or(item.passive),
            icon: self.icon.clone().or_else(|| item.icon.clone()),
        };
        validate_fields(&merged.name, merged.latitude, merged.longitude, merged.radius)?;
        Ok(merged)
    }
}

fn validate_fields(name: &str, latitude: f64, longitude: f64, radius: f64) -> ZoneResult<()> {
    if name.trim().is_empty() {
        return Err(ZoneError::InvalidInput("name cannot be empty".to_string()));
    }
    validate_latitude(latitude).map_err(|e| ZoneError::InvalidInput(e.to_string()))?;
    validate_longitude(longitude).map_err(|e| ZoneError::InvalidInput(e.to_string()))?;
    if !radius.is_finite() || radius < 0.0 {
        return Err(ZoneError::InvalidInput(format!(
            "radius must be a non-negative number of meters, got {}",
            radius
        )));
    }
    Ok(())
}

/// Validate a configured zone
pub fn validate_config(config: &ZoneConfig) -> ZoneResult<()> {
    validate_fields(&config.name, config.latitude, config.longitude, config.radius)
}

/// Validate a stored record
pub fn validate_item(item: &ZoneItem) -> ZoneResult<()> {
    validate_fields(&item.name, item.latitude, item.longitude, item.radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_zone_from_core_config() {
        let core = CoreConfig {
            name: "Cabin".to_string(),
            latitude: 32.87,
            longitude: -117.22,
            radius: 150.0,
            ..Default::default()
        };

        let home = Zone::home(&core).unwrap();
        assert_eq!(home.id, "home");
        assert_eq!(home.entity_id.to_string(), "zone.home");
        assert_eq!(home.name, "Cabin");
        assert_eq!(home.radius, 150.0);
        assert_eq!(home.icon.as_deref(), Some("mdi:home"));
        assert!(!home.passive);
        assert!(!home.editable());
    }

    #[test]
    fn test_attributes() {
        let item = ZoneItem {
            id: "from_storage".to_string(),
            name: "from storage".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            radius: 3.0,
            passive: false,
            icon: Some("mdi:from-storage".to_string()),
        };
        let zone = Zone::from_item(&item).unwrap();
        let attributes = zone.attributes();

        assert_eq!(attributes["latitude"], json!(1.0));
        assert_eq!(attributes["longitude"], json!(2.0));
        assert_eq!(attributes["radius"], json!(3.0));
        assert_eq!(attributes["passive"], json!(false));
        assert_eq!(attributes["editable"], json!(true));
        assert_eq!(attributes["friendly_name"], json!("from storage"));
        assert_eq!(attributes["icon"], json!("mdi:from-storage"));
        assert_eq!(zone.to_item(), item);
    }

    #[test]
    fn test_config_zone_has_no_icon_attribute_unless_set() {
        let config = ZoneConfig {
            name: "Test Zone".to_string(),
            latitude: 1.1,
            longitude: -2.2,
            radius: DEFAULT_RADIUS,
            passive: true,
            icon: None,
        };
        let zone = Zone::from_config("test_zone", &config).unwrap();
        let attributes = zone.attributes();

        assert!(!attributes.contains_key("icon"));
        assert_eq!(attributes["editable"], json!(false));
        assert_eq!(attributes["passive"], json!(true));
    }

    #[test]
    fn test_stored_item_defaults() {
        let item: ZoneItem = serde_json::from_value(json!({
            "id": "office",
            "name": "Office",
            "latitude": 1,
            "longitude": 2
        }))
        .unwrap();
        assert_eq!(item.radius, 100.0);
        assert!(!item.passive);
        assert!(item.icon.is_none());

        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("icon").is_none());
    }

    #[test]
    fn test_create_validation() {
        assert!(ZoneCreate::new("Office", 1.0, 2.0).validate().is_ok());
        assert!(ZoneCreate::new("Point", 1.0, 2.0).with_radius(0.0).validate().is_ok());

        for invalid in [
            ZoneCreate::new("", 1.0, 2.0),
            ZoneCreate::new("  ", 1.0, 2.0),
            ZoneCreate::new("Office", 91.0, 2.0),
            ZoneCreate::new("Office", 1.0, -181.0),
            ZoneCreate::new("Office", 1.0, 2.0).with_radius(-1.0),
            ZoneCreate::new("Office", 1.0, 2.0).with_radius(f64::NAN),
        ] {
            assert!(matches!(invalid.validate(), Err(ZoneError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_placeholder_state_ids_are_rejected() {
        for name in ["Unknown", "unavailable", "🏠"] {
            let item = ZoneCreate::new(name, 1.0, 2.0).into_item(ha_core::slugify(name));
            assert!(
                matches!(Zone::from_item(&item), Err(ZoneError::InvalidInput(_))),
                "{} should be rejected",
                name
            );
        }
        assert!(zone_entity_id("unknown_2").is_ok());
    }

    #[test]
    fn test_update_apply() {
        let item = ZoneCreate::new("Office", 1.0, 2.0)
            .with_icon("mdi:briefcase")
            .into_item("office".to_string());

        let update = ZoneUpdate {
            latitude: Some(3.0),
            passive: Some(true),
            ..Default::default()
        };
        let merged = update.apply(&item).unwrap();
        assert_eq!(merged.id, "office");
        assert_eq!(merged.name, "Office");
        assert_eq!(merged.latitude, 3.0);
        assert_eq!(merged.longitude, 2.0);
        assert!(merged.passive);
        assert_eq!(merged.icon.as_deref(), Some("mdi:briefcase"));

        assert!(matches!(
            ZoneUpdate::default().apply(&item),
            Err(ZoneError::InvalidInput(_))
        ));

        let bad = ZoneUpdate {
            radius: Some(-5.0),
            ..Default::default()
        };
        assert!(matches!(bad.apply(&item), Err(ZoneError::InvalidInput(_))));
    }
}
