//! Config Entries Manager
//!
//! Owns every configuration entry, keeps the lookup indexes consistent and
//! persists the collection to `.storage/core.config_entries`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use ha_registries::{Storable, Storage, StorageResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryUpdate};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    /// All config entries
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Config Entries Manager
///
/// Entries keep their insertion order, so domain lookups return them in the
/// order they were created or loaded.
pub struct ConfigEntries {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: RwLock<IndexMap<String, ConfigEntry>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_storable::<ConfigEntriesData>().await? else {
            return Ok(());
        };
        info!("Loading {} config entries from storage", data.entries.len());
        for entry in data.entries {
            self.index_entry(entry);
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let entries = self.all();
        let count = entries.len();
        self.storage
            .save_storable(&ConfigEntriesData { entries })
            .await?;
        debug!("Saved {} config entries to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.entry_id.clone(), entry);
        }
    }

    fn unindex_entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        let removed = self
            .entries
            .write()
            .ok()
            .and_then(|mut entries| entries.shift_remove(entry_id))?;

        if let Some(ref unique_id) = removed.unique_id {
            self.by_unique_id
                .remove(&(removed.domain.clone(), unique_id.clone()));
        }
        Some(removed)
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(entry_id).cloned())
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| e.domain == domain)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// First entry of `domain` whose data contains every key/value in `data`
    pub fn find_matching(
        &self,
        domain: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Option<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .find(|entry| entry.data_matches(data))
    }

    /// Add a new config entry
    ///
    /// The entry is dropped again if it cannot be persisted.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(entry.clone());
        if let Err(e) = self.save().await {
            warn!("Failed to persist config entry {}: {}", entry.entry_id, e);
            self.unindex_entry(&entry.entry_id);
            return Err(e.into());
        }

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an existing entry
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut updated = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        updated.modified_at = Utc::now();

        // Replace in place so the entry keeps its position
        if let Some(old_uid) = self.get(entry_id).and_then(|e| e.unique_id) {
            self.by_unique_id.remove(&(updated.domain.clone(), old_uid));
        }
        self.index_entry(updated.clone());
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .unindex_entry(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Snapshot of all entries in order
    pub fn all(&self) -> Vec<ConfigEntry> {
        self.entries
            .read()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, ConfigEntries) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        let manager = ConfigEntries::new(storage);
        (temp_dir, manager)
    }

    #[tokio::test]
    async fn test_add_entry() {
        let (_dir, manager) = create_test_manager();

        let entry = ConfigEntry::new("isy994", "ISY (1.1.1.1)");
        let entry_id = entry.entry_id.clone();

        manager.add(entry).await.unwrap();

        assert_eq!(manager.len(), 1);
        assert!(manager.get(&entry_id).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_rejected() {
        let (_dir, manager) = create_test_manager();

        let entry1 = ConfigEntry::new("isy994", "First").with_unique_id("ce:fb:72:31:b7:b9");
        manager.add(entry1).await.unwrap();

        let entry2 = ConfigEntry::new("isy994", "Second").with_unique_id("ce:fb:72:31:b7:b9");
        let result = manager.add(entry2).await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::AlreadyExists { .. })
        ));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_domain_keeps_order() {
        let (_dir, manager) = create_test_manager();

        manager.add(ConfigEntry::new("zone", "Office")).await.unwrap();
        manager.add(ConfigEntry::new("version", "Current Version")).await.unwrap();
        manager.add(ConfigEntry::new("zone", "School")).await.unwrap();

        let zones = manager.get_by_domain("zone");
        let titles: Vec<_> = zones.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Office", "School"]);
        assert_eq!(manager.get_by_domain("version").len(), 1);
        assert!(manager.get_by_domain("isy994").is_empty());
    }

    #[tokio::test]
    async fn test_find_matching() {
        let (_dir, manager) = create_test_manager();

        let data = HashMap::from([
            ("source".to_string(), json!("pypi")),
            ("channel".to_string(), json!("beta")),
        ]);
        manager
            .add(ConfigEntry::new("version", "Python Package Index (PyPI) Beta").with_data(data))
            .await
            .unwrap();

        let query = HashMap::from([("source".to_string(), json!("pypi"))]);
        assert!(manager.find_matching("version", &query).is_some());

        let query = HashMap::from([("source".to_string(), json!("local"))]);
        assert!(manager.find_matching("version", &query).is_none());
        assert!(manager.find_matching("zone", &HashMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_update_entry() {
        let (_dir, manager) = create_test_manager();

        let entry = ConfigEntry::new("isy994", "ISY").with_unique_id("old");
        let entry_id = entry.entry_id.clone();
        manager.add(entry).await.unwrap();

        let mut update = ConfigEntryUpdate::new().title("Renamed");
        update.unique_id = Some(Some("new".to_string()));
        let updated = manager.update(&entry_id, update).await.unwrap();

        assert_eq!(updated.title, "Renamed");
        assert!(manager.get_by_unique_id("isy994", "old").is_none());
        assert!(manager.get_by_unique_id("isy994", "new").is_some());
    }

    #[tokio::test]
    async fn test_update_missing_entry() {
        let (_dir, manager) = create_test_manager();
        let result = manager.update("nope", ConfigEntryUpdate::new()).await;
        assert!(matches!(result, Err(ConfigEntriesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let (_dir, manager) = create_test_manager();

        let entry = ConfigEntry::new("zone", "Office").with_unique_id("office");
        let entry_id = entry.entry_id.clone();
        manager.add(entry).await.unwrap();

        manager.remove(&entry_id).await.unwrap();
        assert!(manager.is_empty());
        assert!(manager.get_by_unique_id("zone", "office").is_none());
        assert!(matches!(
            manager.remove(&entry_id).await,
            Err(ConfigEntriesError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let manager = ConfigEntries::new(storage.clone());
            let data = HashMap::from([("host".to_string(), json!("http://1.1.1.1:80"))]);
            let entry = ConfigEntry::new("isy994", "ISY")
                .with_data(data)
                .with_unique_id("uuid-1");
            manager.add(entry).await.unwrap();
        }

        let manager = ConfigEntries::new(storage);
        manager.load().await.unwrap();

        assert_eq!(manager.len(), 1);
        let entry = manager.get_by_unique_id("isy994", "uuid-1").unwrap();
        assert_eq!(entry.data.get("host"), Some(&json!("http://1.1.1.1:80")));
    }
}
