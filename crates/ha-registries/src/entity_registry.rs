//! Entity Registry
//!
//! Maps platform-provided unique ids to entity ids so an entity keeps its id
//! across restarts. Components that own user-editable entities (storage
//! backed zones) register them here and remove the entry when the item is
//! deleted.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal id
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    pub unique_id: String,
    /// Component/platform that provides this entity
    pub platform: String,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Custom icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modified timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entity entry
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id: unique_id.into(),
            platform: platform.into(),
            name: None,
            icon: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    fn lookup_key(&self) -> (String, String, String) {
        (
            self.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// Entity registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    /// All registered entities
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Entity Registry
///
/// Entries are stored as `Arc<EntityEntry>` keyed by entity_id in insertion
/// order, with a secondary index on (domain, platform, unique_id).
pub struct EntityRegistry {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: entity_id -> EntityEntry
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<(String, String, String), String>,
}

impl EntityRegistry {
    /// Create a new entity registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_storable::<EntityRegistryData>().await? else {
            return Ok(());
        };
        info!("Loading {} entities from storage", data.entities.len());
        for entry in data.entities {
            self.index_entry(Arc::new(entry));
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let entities: Vec<EntityEntry> = self
            .by_entity_id
            .read()
            .map(|e| e.values().map(|v| (**v).clone()).collect())
            .unwrap_or_default();
        let count = entities.len();

        self.storage
            .save_storable(&EntityRegistryData { entities })
            .await?;
        debug!("Saved {} entities to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        self.by_unique_id
            .insert(entry.lookup_key(), entry.entity_id.clone());
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entry.entity_id.clone(), entry);
        }
    }

    fn unindex_entry(&self, entry: &EntityEntry) {
        self.by_unique_id.remove(&entry.lookup_key());
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.shift_remove(&entry.entity_id);
        }
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Look up the entity_id registered for a platform's unique_id
    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        self.by_unique_id
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())
    }

    /// Get or create an entity entry
    ///
    /// If the (domain, platform, unique_id) triple is already registered the
    /// existing entry is returned and `entity_id` is ignored.
    pub fn get_or_create(&self, platform: &str, entity_id: &str, unique_id: &str) -> Arc<EntityEntry> {
        let domain = entity_id.split('.').next().unwrap_or("");
        if let Some(existing) = self
            .get_entity_id(domain, platform, unique_id)
            .and_then(|id| self.get(&id))
        {
            debug!("Found existing entity by unique_id: {}", existing.entity_id);
            return existing;
        }

        let entry = Arc::new(EntityEntry::new(entity_id, platform, unique_id));
        self.index_entry(Arc::clone(&entry));
        info!("Registered entity {} ({})", entity_id, platform);
        entry
    }

    /// Apply an update to an entry in place
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let existing = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        let mut updated = (*existing).clone();
        f(&mut updated);
        updated.modified_at = Utc::now();

        self.unindex_entry(&existing);
        let updated = Arc::new(updated);
        self.index_entry(Arc::clone(&updated));
        Ok(updated)
    }

    /// Remove an entity entry
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.get(entity_id)?;
        self.unindex_entry(&entry);
        info!("Removed entity {} from registry", entity_id);
        Some(entry)
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in registration order
    pub fn entries(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}
