//! Abstract storage traits for KyroFlow.
//!
//! These traits define the contract that storage backends must implement.
//! The registry and the platform only talk to storage through them, so an
//! in-memory backend serves tests and embedded use while other backends can
//! be plugged in later.

use std::collections::HashSet;

use thiserror::Error;

use crate::ids::{ItemId, TypeId};
use crate::item::{Item, Sample};
use crate::types::Type;
use crate::value::Value;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Type not found.
    #[error("Type not found: {0}")]
    TypeNotFound(TypeId),

    /// Item not found.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Storage trait for type definitions.
///
/// Names are unique across all types.
pub trait TypeStore: Send + Sync {
    /// Insert a new type. Fails with `DuplicateKey` if the id or name is taken.
    fn insert(&self, ty: Type) -> Result<(), StorageError>;

    /// Get a type by ID.
    fn get(&self, id: TypeId) -> Result<Option<Type>, StorageError>;

    /// Get a type by exact name.
    fn find_by_name(&self, name: &str) -> Result<Option<Type>, StorageError>;

    /// Replace a stored type. Fails if it does not exist or the new name is taken.
    fn update(&self, ty: Type) -> Result<(), StorageError>;

    /// All stored types.
    fn list(&self) -> Result<Vec<Type>, StorageError>;
}

/// Storage trait for items and their time series.
///
/// # Safety Considerations
/// - Appends to one item must be atomic with respect to readers of that item
/// - Operations on different items must not contend on a single lock
pub trait ItemStore: Send + Sync {
    /// Insert a new item. Fails with `DuplicateKey` if the id or name is taken.
    fn insert(&self, item: Item) -> Result<(), StorageError>;

    /// Get a snapshot of an item.
    fn get(&self, id: ItemId) -> Result<Option<Item>, StorageError>;

    /// Type of an item without cloning its series.
    fn type_of(&self, id: ItemId) -> Result<Option<TypeId>, StorageError>;

    /// Find an item by exact name.
    fn find_by_name(&self, name: &str) -> Result<Option<Item>, StorageError>;

    /// Items whose declared type is in `types`.
    fn find_by_types(&self, types: &HashSet<TypeId>) -> Result<Vec<Item>, StorageError>;

    /// Insert samples into the item's series, in order.
    fn append_samples(&self, id: ItemId, samples: Vec<(String, Sample)>) -> Result<(), StorageError>;

    /// Add properties that a type update introduced.
    ///
    /// Static defaults are set only where no value exists; dynamic properties get
    /// an empty series only where none exists.
    fn backfill(
        &self,
        id: ItemId,
        static_defaults: &[(String, Value)],
        dynamic_properties: &[String],
    ) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_type_store_object_safe(_: &dyn TypeStore) {}
    fn _assert_item_store_object_safe(_: &dyn ItemStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ItemNotFound(ItemId::new());
        assert!(err.to_string().contains("Item not found"));

        let err = StorageError::DuplicateKey("Kit".to_string());
        assert!(err.to_string().contains("Kit"));
    }
}
