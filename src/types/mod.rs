//! Type definitions and the inheritance-resolving registry.
//!
//! A [`Type`] declares static and dynamic property schemas and may inherit from
//! several parents. The [`TypeRegistry`] resolves the full schema of each type
//! across the inheritance DAG and caches the result.

mod registry;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TypeId;
use crate::schema::PropertySchema;

pub use registry::{predicate_segment, Backfill, PredicateCatalog, PredicateInfo, TypeRegistry, TypeUpdate};

/// Property name to schema.
pub type PropertyMap = BTreeMap<String, PropertySchema>;

/// A registered type, exactly as declared (own properties only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub id: TypeId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Direct parents. Must not form a cycle.
    #[serde(default)]
    pub parents: Vec<TypeId>,

    #[serde(default)]
    pub static_properties: PropertyMap,

    #[serde(default)]
    pub dynamic_properties: PropertyMap,

    /// Free-form presentation metadata (icons and similar).
    #[serde(default)]
    pub properties: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Starts at 1 and increments on every update.
    pub version: u64,
}

/// Payload for creating a type.
///
/// # Examples
///
/// ```
/// use kyroflow::{PropertySchema, TypeDef};
///
/// let def = TypeDef::new("rPPG")
///     .dynamic_property("HR", PropertySchema::integer_range(48, 180));
/// assert_eq!(def.dynamic_properties.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parents: Vec<TypeId>,
    #[serde(default)]
    pub static_properties: PropertyMap,
    #[serde(default)]
    pub dynamic_properties: PropertyMap,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl TypeDef {
    /// Starts a definition with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: TypeId) -> Self {
        self.parents.push(parent);
        self
    }

    #[must_use]
    pub fn static_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.static_properties.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn dynamic_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.dynamic_properties.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn metadata(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Partial update of a type. Provided maps replace the type's own maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<TypeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_properties: Option<PropertyMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_properties: Option<PropertyMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// Lookup key for a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Id(TypeId),
    Name(String),
}

impl From<TypeId> for TypeRef {
    fn from(id: TypeId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// The fully inherited view of a type.
///
/// Computed once per type version by the registry and shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedType {
    pub type_id: TypeId,
    pub name: String,

    /// The type itself followed by every transitive ancestor, depth-first, without repeats.
    pub ancestors: Vec<TypeId>,

    /// Fact-name segment of each entry in `ancestors`, same order.
    pub ancestor_names: Vec<String>,

    pub static_properties: PropertyMap,
    pub dynamic_properties: PropertyMap,
}

impl ResolvedType {
    /// True if `type_id` is this type or one of its ancestors.
    #[must_use]
    pub fn descends_from(&self, type_id: TypeId) -> bool {
        self.ancestors.contains(&type_id)
    }
}
