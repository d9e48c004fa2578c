//! Storage abstraction for JSON persistence
//!
//! Implements the `.storage/` directory pattern with versioning, plus the
//! collection store used by components that persist a list of user-defined
//! items (zones are stored as `{"items": [...]}` under the `zone` key).

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by a newer major version
    #[error("Version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Envelope of every file under `.storage/`
///
/// ```json
/// { "version": 1, "minor_version": 1, "key": "zone", "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Bumped on incompatible layout changes
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// The `.storage/` directory of a config directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub async fn ensure_dir(&self) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!("Created storage directory: {:?}", self.storage_dir);
        }
        Ok(())
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Read a file; `None` if it was never written
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        if !path.exists() {
            debug!("Storage file not found: {}", key);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!("Loaded {} (v{}.{})", key, file.version, file.minor_version);
        Ok(Some(file))
    }

    /// Read a file and check it against the expected schema version
    ///
    /// A newer major version is an error. An older minor version is only
    /// logged, since minor bumps add optional fields.
    pub async fn load_versioned<T>(
        &self,
        key: &str,
        version: u32,
        minor_version: u32,
    ) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let Some(file) = self.load::<T>(key).await? else {
            return Ok(None);
        };

        if file.version > version {
            return Err(StorageError::VersionMismatch {
                key: key.to_string(),
                expected: version,
                found: file.version,
            });
        }
        if file.version == version && file.minor_version < minor_version {
            warn!(
                "Storage {} has older minor version ({} < {})",
                key, file.minor_version, minor_version
            );
        }
        Ok(Some(file.data))
    }

    /// Write a file through a temp file and rename
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        self.ensure_dir().await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));
        let content = serde_json::to_string_pretty(file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved {} (v{}.{})", file.key, file.version, file.minor_version);
        Ok(())
    }

    pub async fn load_storable<T: Storable>(&self) -> StorageResult<Option<T>> {
        self.load_versioned(T::KEY, T::VERSION, T::MINOR_VERSION)
            .await
    }

    pub async fn save_storable<T: Storable>(&self, data: &T) -> StorageResult<()> {
        self.save(&StorageFile::new(T::KEY, data, T::VERSION, T::MINOR_VERSION))
            .await
    }
}

/// A registry payload with a fixed key and schema version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

// ==================== Collection stores ====================

/// Load/save abstraction for a persisted list of collection items
///
/// `load` returns `None` when nothing was ever saved, which callers treat
/// differently from an empty list (for example to decide on one-time imports).
#[async_trait]
pub trait CollectionStore<T>: Send + Sync {
    /// Load all persisted items
    async fn load(&self) -> StorageResult<Option<Vec<T>>>;

    /// Replace the persisted items
    async fn save(&self, items: &[T]) -> StorageResult<()>;
}

/// On-disk payload of a collection store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionData<T> {
    pub items: Vec<T>,
}

/// Collection store backed by a `.storage/` file
pub struct Store<T> {
    storage: Arc<Storage>,
    key: String,
    version: u32,
    minor_version: u32,
    _items: PhantomData<fn() -> T>,
}

impl<T> Store<T> {
    /// Create a store for `key` at the given schema version
    pub fn new(storage: Arc<Storage>, key: impl Into<String>, version: u32, minor_version: u32) -> Self {
        Self {
            storage,
            key: key.into(),
            version,
            minor_version,
            _items: PhantomData,
        }
    }

    /// Storage key of this store
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<T> CollectionStore<T> for Store<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self) -> StorageResult<Option<Vec<T>>> {
        let data = self
            .storage
            .load_versioned::<CollectionData<T>>(&self.key, self.version, self.minor_version)
            .await?;
        Ok(data.map(|data| data.items))
    }

    async fn save(&self, items: &[T]) -> StorageResult<()> {
        // Borrowing wrapper so saving does not need to clone every item
        #[derive(Serialize)]
        struct ItemsRef<'a, T> {
            items: &'a [T],
        }

        let file = StorageFile::new(
            self.key.clone(),
            ItemsRef { items },
            self.version,
            self.minor_version,
        );
        self.storage.save(&file).await?;
        debug!("Saved {} items to {}", items.len(), self.key);
        Ok(())
    }
}
