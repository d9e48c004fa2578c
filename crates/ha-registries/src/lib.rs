//! Persistent registries and storage
//!
//! This crate provides:
//! - the `.storage/` JSON persistence layer with versioning (`Storage`)
//! - the `CollectionStore` abstraction with its file-backed `Store`
//! - the entity registry linking platform unique ids to entity ids

pub mod storage;

pub mod entity_registry;

pub use storage::{
    CollectionData, CollectionStore, Storable, Storage, StorageError, StorageFile, StorageResult,
    Store,
};

pub use entity_registry::{EntityEntry, EntityRegistry, EntityRegistryData, EntityRegistryError};
