//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::ids::{ItemId, TypeId};
use crate::item::{Item, Sample};
use crate::storage::traits::{ItemStore, StorageError, TypeStore};
use crate::types::Type;
use crate::value::Value;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct TypeState {
    by_id: HashMap<TypeId, Type>,
    by_name: HashMap<String, TypeId>,
}

impl TypeState {
    fn check_name_free(&self, name: &str, owner: TypeId) -> Result<(), StorageError> {
        match self.by_name.get(name) {
            Some(existing) if *existing != owner => Err(StorageError::DuplicateKey(name.to_string())),
            _ => Ok(()),
        }
    }

    fn replace(&mut self, ty: Type) {
        if let Some(old) = self.by_id.get(&ty.id) {
            if old.name != ty.name {
                self.by_name.remove(&old.name);
            }
        }
        self.by_name.insert(ty.name.clone(), ty.id);
        self.by_id.insert(ty.id, ty);
    }
}

/// Thread-safe in-memory type store.
#[derive(Debug, Default)]
pub struct InMemoryTypeStore {
    state: RwLock<TypeState>,
}

impl InMemoryTypeStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TypeStore for InMemoryTypeStore {
    fn insert(&self, ty: Type) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("type.insert"))?;
        if state.by_id.contains_key(&ty.id) {
            return Err(StorageError::DuplicateKey(ty.id.to_string()));
        }
        state.check_name_free(&ty.name, ty.id)?;
        state.replace(ty);
        Ok(())
    }

    fn get(&self, id: TypeId) -> Result<Option<Type>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("type.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Type>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("type.find_by_name"))?;
        Ok(state.by_name.get(name).and_then(|id| state.by_id.get(id)).cloned())
    }

    fn update(&self, ty: Type) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("type.update"))?;
        if !state.by_id.contains_key(&ty.id) {
            return Err(StorageError::TypeNotFound(ty.id));
        }
        state.check_name_free(&ty.name, ty.id)?;
        state.replace(ty);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Type>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("type.list"))?;
        Ok(state.by_id.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct ItemIndex {
    by_id: HashMap<ItemId, Arc<Mutex<Item>>>,
    types: HashMap<ItemId, TypeId>,
    by_name: HashMap<String, ItemId>,
    by_type: HashMap<TypeId, HashSet<ItemId>>,
}

/// Thread-safe in-memory item store.
///
/// The index lock is only held to locate an item; each item carries its own
/// mutex so appends to different items never contend.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    index: RwLock<ItemIndex>,
}

impl InMemoryItemStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, id: ItemId) -> Result<Option<Arc<Mutex<Item>>>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("item.cell"))?;
        Ok(index.by_id.get(&id).cloned())
    }

    fn snapshot(cell: &Mutex<Item>) -> Result<Item, StorageError> {
        cell.lock().map(|item| item.clone()).map_err(|_| lock_err("item.snapshot"))
    }
}

impl ItemStore for InMemoryItemStore {
    fn insert(&self, item: Item) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("item.insert"))?;
        if index.by_id.contains_key(&item.id) {
            return Err(StorageError::DuplicateKey(item.id.to_string()));
        }
        if let Some(name) = item.name.as_ref() {
            if index.by_name.contains_key(name) {
                return Err(StorageError::DuplicateKey(name.clone()));
            }
            index.by_name.insert(name.clone(), item.id);
        }
        index.by_type.entry(item.item_type).or_default().insert(item.id);
        index.types.insert(item.id, item.item_type);
        index.by_id.insert(item.id, Arc::new(Mutex::new(item)));
        Ok(())
    }

    fn get(&self, id: ItemId) -> Result<Option<Item>, StorageError> {
        match self.cell(id)? {
            Some(cell) => Self::snapshot(&cell).map(Some),
            None => Ok(None),
        }
    }

    fn type_of(&self, id: ItemId) -> Result<Option<TypeId>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("item.type_of"))?;
        Ok(index.types.get(&id).copied())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Item>, StorageError> {
        let cell = {
            let index = self.index.read().map_err(|_| lock_err("item.find_by_name"))?;
            index.by_name.get(name).and_then(|id| index.by_id.get(id)).cloned()
        };
        match cell {
            Some(cell) => Self::snapshot(&cell).map(Some),
            None => Ok(None),
        }
    }

    fn find_by_types(&self, types: &HashSet<TypeId>) -> Result<Vec<Item>, StorageError> {
        let cells: Vec<Arc<Mutex<Item>>> = {
            let index = self.index.read().map_err(|_| lock_err("item.find_by_types"))?;
            types
                .iter()
                .filter_map(|t| index.by_type.get(t))
                .flatten()
                .filter_map(|id| index.by_id.get(id).cloned())
                .collect()
        };
        let mut out = cells
            .iter()
            .map(|cell| Self::snapshot(cell))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn append_samples(&self, id: ItemId, samples: Vec<(String, Sample)>) -> Result<(), StorageError> {
        let cell = self.cell(id)?.ok_or(StorageError::ItemNotFound(id))?;
        let mut item = cell.lock().map_err(|_| lock_err("item.append_samples"))?;
        for (property, sample) in samples {
            item.push_sample(&property, sample);
        }
        Ok(())
    }

    fn backfill(
        &self,
        id: ItemId,
        static_defaults: &[(String, Value)],
        dynamic_properties: &[String],
    ) -> Result<(), StorageError> {
        let cell = self.cell(id)?.ok_or(StorageError::ItemNotFound(id))?;
        let mut item = cell.lock().map_err(|_| lock_err("item.backfill"))?;
        for (property, value) in static_defaults {
            item.static_values
                .entry(property.clone())
                .or_insert_with(|| value.clone());
        }
        for property in dynamic_properties {
            item.dynamic_series.entry(property.clone()).or_default();
        }
        Ok(())
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Type store.
    pub types: InMemoryTypeStore,
    /// Item store.
    pub items: InMemoryItemStore,
}

impl InMemoryStores {
    /// Create fresh empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
