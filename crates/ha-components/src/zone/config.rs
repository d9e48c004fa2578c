//! `zone:` section of configuration.yaml

use std::path::PathBuf;

use ha_config::{load_yaml, section, ConfigError, Value};
use tracing::debug;

use super::model::{validate_config, ZoneConfig};
use super::{ZoneError, ZoneResult, DOMAIN};

/// Main configuration file read on reload
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Parse the `zone:` section of a configuration root
///
/// The section may be missing, null, a single mapping or a list of mappings.
/// An empty mapping yields no zones.
pub fn parse_zone_section(config_root: &Value) -> ZoneResult<Vec<ZoneConfig>> {
    let Some(zone_section) = section(config_root, DOMAIN) else {
        return Ok(Vec::new());
    };

    let entries: Vec<&Value> = match zone_section {
        Value::Null => Vec::new(),
        Value::Mapping(mapping) if mapping.is_empty() => Vec::new(),
        Value::Mapping(_) => vec![zone_section],
        Value::Sequence(items) => items.iter().collect(),
        other => {
            return Err(invalid_section(format!(
                "expected a mapping or a list, got {}",
                yaml_type(other)
            )))
        }
    };

    let mut configs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let config: ZoneConfig = serde_yaml::from_value(entry.clone())
            .map_err(|e| invalid_section(format!("entry {}: {}", index, e)))?;
        validate_config(&config)?;
        configs.push(config);
    }

    debug!("Parsed {} zones from configuration", configs.len());
    Ok(configs)
}

fn invalid_section(reason: String) -> ZoneError {
    ZoneError::Config(ConfigError::InvalidValue {
        key: DOMAIN.to_string(),
        reason,
    })
}

fn yaml_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Where the zone manager reads its configuration root from on reload
pub trait ZoneConfigSource: Send + Sync {
    fn load_config(&self) -> ZoneResult<Value>;
}

/// Reads `configuration.yaml` from the config directory
#[derive(Debug, Clone)]
pub struct YamlConfigSource {
    config_dir: PathBuf,
}

impl YamlConfigSource {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }
}

impl ZoneConfigSource for YamlConfigSource {
    fn load_config(&self) -> ZoneResult<Value> {
        Ok(load_yaml(self.config_dir.clone(), CONFIG_FILE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> ZoneResult<Vec<ZoneConfig>> {
        let root: Value = serde_yaml::from_str(yaml).unwrap();
        parse_zone_section(&root)
    }

    #[test]
    fn test_missing_null_and_empty_section() {
        assert!(parse("homeassistant:\n  name: Home\n").unwrap().is_empty());
        assert!(parse("zone:\n").unwrap().is_empty());
        assert!(parse("zone: {}\n").unwrap().is_empty());
        assert!(parse("zone: []\n").unwrap().is_empty());
    }

    #[test]
    fn test_single_mapping() {
        let zones = parse(
            r#"
zone:
  name: Test Zone
  latitude: 32.880837
  longitude: -117.237561
  radius: 250
  passive: true
"#,
        )
        .unwrap();

        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "Test Zone");
        assert_eq!(zones[0].radius, 250.0);
        assert!(zones[0].passive);
        assert!(zones[0].icon.is_none());
    }

    #[test]
    fn test_list_with_defaults() {
        let zones = parse(
            r#"
zone:
  - name: yaml 1
    latitude: 1
    longitude: 2
  - name: yaml 2
    latitude: 3
    longitude: 4
    icon: mdi:office
"#,
        )
        .unwrap();

        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].radius, 100.0);
        assert!(!zones[0].passive);
        assert_eq!(zones[1].icon.as_deref(), Some("mdi:office"));
    }

    #[test]
    fn test_invalid_sections() {
        assert!(matches!(parse("zone: 5\n"), Err(ZoneError::Config(_))));
        assert!(matches!(
            parse("zone:\n  - latitude: 1\n    longitude: 2\n"),
            Err(ZoneError::Config(_))
        ));
        assert!(matches!(
            parse("zone:\n  name: Bad\n  latitude: 100\n  longitude: 2\n"),
            Err(ZoneError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_yaml_config_source() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            "zone:\n  - name: Office\n    latitude: 1\n    longitude: 2\n",
        )
        .unwrap();

        let source = YamlConfigSource::new(temp_dir.path());
        let root = source.load_config().unwrap();
        let zones = parse_zone_section(&root).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "Office");

        let missing = YamlConfigSource::new(temp_dir.path().join("nope"));
        assert!(matches!(missing.load_config(), Err(ZoneError::Config(_))));
    }
}
