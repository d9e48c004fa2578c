//! In-memory zone store
//!
//! Keeps items in memory instead of `.storage/zone`, counts saves, and can
//! be switched to fail loads or saves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ha_components::zone::ZoneItem;
use ha_registries::{CollectionStore, StorageError, StorageResult};

/// Zone store mock for testing
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Option<Vec<ZoneItem>>>,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store that has never been saved
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `items`
    pub fn with_items(items: Vec<ZoneItem>) -> Self {
        Self {
            items: Mutex::new(Some(items)),
            ..Self::default()
        }
    }

    /// Items as last saved
    pub fn items(&self) -> Vec<ZoneItem> {
        self.items.lock().unwrap().clone().unwrap_or_default()
    }

    /// Replace the stored items without going through `save`
    pub fn set_items(&self, items: Vec<ZoneItem>) {
        *self.items.lock().unwrap() = Some(items);
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionStore<ZoneItem> for MemoryStore {
    async fn load(&self) -> StorageResult<Option<Vec<ZoneItem>>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("load disabled".into()));
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn save(&self, items: &[ZoneItem]) -> StorageResult<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("save disabled".into()));
        }
        *self.items.lock().unwrap() = Some(items.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
