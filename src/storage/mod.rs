//! Storage traits and the in-memory backend.
//!
//! Durable backends are out of scope; the traits keep the registry and the
//! platform independent of where types and items live.

pub mod memory;
mod traits;

pub use memory::{InMemoryItemStore, InMemoryStores, InMemoryTypeStore};
pub use traits::{ItemStore, StorageError, TypeStore};
