//! Secrets loader
//!
//! Loads `secrets.yaml` so `!secret` references can be substituted. Values
//! keep their YAML type: `latitude: !secret home_latitude` yields a number.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Secrets store loaded from secrets.yaml
#[derive(Debug, Clone)]
pub struct Secrets {
    secrets: HashMap<String, Value>,
    path: PathBuf,
}

impl Secrets {
    /// Load secrets from `<config_dir>/secrets.yaml`; a missing file is empty
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");

        if !path.exists() {
            debug!("No secrets.yaml found at {:?}, using empty secrets", path);
            return Ok(Self {
                secrets: HashMap::new(),
                path,
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        let secrets: HashMap<String, Value> = if content.trim().is_empty() {
            HashMap::new()
        } else {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
                path: path.clone(),
                source: e,
            })?
        };

        debug!("Loaded {} secrets from {:?}", secrets.len(), path);

        Ok(Self { secrets, path })
    }

    /// Get a secret by key
    pub fn get(&self, key: &str) -> ConfigResult<&Value> {
        self.secrets
            .get(key)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    /// Get the path to the secrets file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if secrets store is empty
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
