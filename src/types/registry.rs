use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{FlowError, FlowResult, SchemaError, ValidationError};
use crate::ids::TypeId;
use crate::schema::PropertySchema;
use crate::storage::TypeStore;
use crate::types::{PropertyMap, ResolvedType, Type, TypeDef, TypePatch, TypeRef};
use crate::value::Value;

/// Field names every fact carries; properties may not shadow them.
const RESERVED_FIELDS: [&str; 2] = ["item_id", "timestamp"];

fn is_property_name(name: &str) -> bool {
    static PROPERTY_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    PROPERTY_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Fact-name segment for a type name: characters that cannot appear in a
/// predicate symbol become `_`.
#[must_use]
pub fn predicate_segment(type_name: &str) -> String {
    type_name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Properties a type update introduced for one affected type.
///
/// Items declared with `type_id` receive `static_defaults` where they have no
/// value yet and an empty series for each of `dynamic_properties`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backfill {
    pub type_id: TypeId,
    pub static_defaults: Vec<(String, Value)>,
    pub dynamic_properties: Vec<String>,
}

/// Result of [`TypeRegistry::update_type`].
#[derive(Debug, Clone)]
pub struct TypeUpdate {
    pub ty: Type,
    pub resolved: Arc<ResolvedType>,
    /// One entry per affected type (the updated type and its descendants)
    /// that gained properties.
    pub backfills: Vec<Backfill>,
}

/// What a rule may say about a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateInfo {
    /// Property the predicate carries as its value field.
    pub property: String,
    /// Dynamic-property facts carry a `timestamp` field.
    pub dynamic: bool,
}

impl PredicateInfo {
    /// True if `field` may appear in a pattern over this predicate.
    #[must_use]
    pub fn allows_field(&self, field: &str) -> bool {
        field == "item_id" || field == self.property || (self.dynamic && field == "timestamp")
    }
}

/// Every predicate the current set of types can produce.
#[derive(Debug, Clone, Default)]
pub struct PredicateCatalog {
    predicates: HashMap<String, PredicateInfo>,
}

impl PredicateCatalog {
    #[must_use]
    pub fn get(&self, predicate: &str) -> Option<&PredicateInfo> {
        self.predicates.get(predicate)
    }

    #[must_use]
    pub fn contains(&self, predicate: &str) -> bool {
        self.predicates.contains_key(predicate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    fn add_type(&mut self, resolved: &ResolvedType) {
        for ancestor in &resolved.ancestor_names {
            for property in resolved.static_properties.keys() {
                self.predicates
                    .entry(format!("{ancestor}_{property}"))
                    .or_insert_with(|| PredicateInfo {
                        property: property.clone(),
                        dynamic: false,
                    });
            }
            for property in resolved.dynamic_properties.keys() {
                self.predicates.insert(
                    format!("{ancestor}_has_{property}"),
                    PredicateInfo {
                        property: property.clone(),
                        dynamic: true,
                    },
                );
            }
        }
    }
}

/// Stores types and resolves their inherited schemas.
///
/// Resolved views are memoized per type id and recomputed when the type or
/// one of its ancestors changes. Mutations are serialized; reads are not.
pub struct TypeRegistry {
    store: Arc<dyn TypeStore>,
    resolved: RwLock<HashMap<TypeId, Arc<ResolvedType>>>,
    mutation: Mutex<()>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.resolved.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("TypeRegistry").field("cached", &cached).finish_non_exhaustive()
    }
}

impl TypeRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TypeStore>) -> Self {
        Self {
            store,
            resolved: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
        }
    }

    /// Registers a new type.
    ///
    /// # Errors
    ///
    /// - `EmptyName` / `DuplicateTypeName` for bad names
    /// - `UnknownType` if a parent or an item reference does not exist
    /// - `InvalidSchema` for malformed property definitions
    /// - `SchemaConflict` if two ancestors disagree on a property
    pub fn create_type(&self, def: TypeDef) -> FlowResult<Type> {
        let _guard = self.mutation.lock().map_err(|_| FlowError::internal("type registry lock poisoned"))?;

        let name = checked_name(&def.name)?;
        if self.store.find_by_name(&name)?.is_some() {
            return Err(SchemaError::DuplicateTypeName { name }.into());
        }
        check_properties(&def.static_properties, &def.dynamic_properties)?;

        let now = Utc::now();
        let ty = Type {
            id: TypeId::new(),
            name,
            description: def.description,
            parents: dedup_parents(def.parents),
            static_properties: def.static_properties,
            dynamic_properties: def.dynamic_properties,
            properties: def.properties,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.check_references(&ty)?;

        let overlay = HashMap::from([(ty.id, ty.clone())]);
        let resolved = Arc::new(resolve_with(ty.id, &|id| self.lookup(id, &overlay))?);

        self.store.insert(ty.clone())?;
        self.cache_write()?.insert(ty.id, resolved);
        info!(type_id = %ty.id, name = %ty.name, parents = ty.parents.len(), "type created");
        Ok(ty)
    }

    /// Looks a type up by id or name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if it does not exist.
    pub fn get_type(&self, reference: &TypeRef) -> FlowResult<Type> {
        let found = match reference {
            TypeRef::Id(id) => self.store.get(*id)?,
            TypeRef::Name(name) => self.store.find_by_name(name)?,
        };
        found.ok_or_else(|| FlowError::unknown_type(reference))
    }

    /// Looks a type up by exact name.
    ///
    /// # Errors
    ///
    /// Returns a storage error only; a missing type is `Ok(None)`.
    pub fn get_by_name(&self, name: &str) -> FlowResult<Option<Type>> {
        Ok(self.store.find_by_name(name)?)
    }

    /// All registered types, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub fn list(&self) -> FlowResult<Vec<Type>> {
        let mut types = self.store.list()?;
        types.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(types)
    }

    /// Applies `patch` to type `id`.
    ///
    /// The type and every descendant are re-resolved before anything is
    /// written; if any of them fails, the update is rejected and nothing
    /// changes.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_type`], plus `CyclicInheritance` when the new
    /// parents would make the type its own ancestor.
    pub fn update_type(&self, id: TypeId, patch: TypePatch) -> FlowResult<TypeUpdate> {
        let _guard = self.mutation.lock().map_err(|_| FlowError::internal("type registry lock poisoned"))?;

        let current = self.store.get(id)?.ok_or_else(|| FlowError::unknown_type(id))?;
        let mut updated = current.clone();
        if let Some(name) = patch.name {
            let name = checked_name(&name)?;
            if let Some(other) = self.store.find_by_name(&name)? {
                if other.id != id {
                    return Err(SchemaError::DuplicateTypeName { name }.into());
                }
            }
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(parents) = patch.parents {
            updated.parents = dedup_parents(parents);
        }
        if let Some(statics) = patch.static_properties {
            updated.static_properties = statics;
        }
        if let Some(dynamics) = patch.dynamic_properties {
            updated.dynamic_properties = dynamics;
        }
        if let Some(properties) = patch.properties {
            updated.properties = properties;
        }
        check_properties(&updated.static_properties, &updated.dynamic_properties)?;
        self.check_references(&updated)?;
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();

        // Re-resolve the type and its descendants against the patched graph.
        let affected = self.descendants(id)?;
        let overlay = HashMap::from([(id, updated.clone())]);
        let mut fresh = Vec::with_capacity(affected.len());
        for type_id in &affected {
            let resolved = resolve_with(*type_id, &|t| self.lookup(t, &overlay))?;
            fresh.push(Arc::new(resolved));
        }

        let mut backfills = Vec::new();
        for resolved in &fresh {
            let previous = self.resolve(resolved.type_id)?;
            let backfill = diff_added(&previous, resolved);
            if !backfill.static_defaults.is_empty() || !backfill.dynamic_properties.is_empty() {
                backfills.push(backfill);
            }
        }

        self.store.update(updated.clone())?;
        let mut cache = self.cache_write()?;
        for resolved in &fresh {
            cache.insert(resolved.type_id, Arc::clone(resolved));
        }
        drop(cache);

        let resolved = fresh
            .first()
            .cloned()
            .ok_or_else(|| FlowError::internal("updated type missing from its own descendants"))?;
        info!(
            type_id = %id,
            version = updated.version,
            descendants = affected.len() - 1,
            "type updated"
        );
        Ok(TypeUpdate {
            ty: updated,
            resolved,
            backfills,
        })
    }

    /// The fully inherited view of a type, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type or an ancestor is missing.
    pub fn resolve(&self, id: TypeId) -> FlowResult<Arc<ResolvedType>> {
        if let Some(hit) = self
            .resolved
            .read()
            .map_err(|_| FlowError::internal("resolved cache lock poisoned"))?
            .get(&id)
        {
            return Ok(Arc::clone(hit));
        }
        let empty = HashMap::new();
        let resolved = Arc::new(resolve_with(id, &|t| self.lookup(t, &empty))?);
        debug!(type_id = %id, ancestors = resolved.ancestors.len(), "type resolved");
        self.cache_write()?.insert(id, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// `id` followed by every type that inherits from it, directly or not.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `id` does not exist.
    pub fn descendants(&self, id: TypeId) -> FlowResult<Vec<TypeId>> {
        if self.store.get(id)?.is_none() {
            return Err(FlowError::unknown_type(id));
        }
        let mut out = vec![id];
        for ty in self.list()? {
            if ty.id != id && self.resolve(ty.id)?.descends_from(id) {
                out.push(ty.id);
            }
        }
        Ok(out)
    }

    /// Builds the catalog of predicates that facts of the current types can carry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub fn predicate_catalog(&self) -> FlowResult<PredicateCatalog> {
        let mut catalog = PredicateCatalog::default();
        for ty in self.store.list()? {
            catalog.add_type(&*self.resolve(ty.id)?);
        }
        Ok(catalog)
    }

    fn lookup(&self, id: TypeId, overlay: &HashMap<TypeId, Type>) -> FlowResult<Type> {
        if let Some(ty) = overlay.get(&id) {
            return Ok(ty.clone());
        }
        self.store.get(id)?.ok_or_else(|| FlowError::unknown_type(id))
    }

    fn check_references(&self, ty: &Type) -> FlowResult<()> {
        for parent in &ty.parents {
            if *parent != ty.id && self.store.get(*parent)?.is_none() {
                return Err(FlowError::unknown_type(parent));
            }
        }
        let referenced = ty
            .static_properties
            .values()
            .chain(ty.dynamic_properties.values())
            .filter_map(PropertySchema::referenced_type);
        for target in referenced {
            if target != ty.id && self.store.get(target)?.is_none() {
                return Err(FlowError::unknown_type(target));
            }
        }
        Ok(())
    }

    fn cache_write(
        &self,
    ) -> FlowResult<std::sync::RwLockWriteGuard<'_, HashMap<TypeId, Arc<ResolvedType>>>> {
        self.resolved
            .write()
            .map_err(|_| FlowError::internal("resolved cache lock poisoned"))
    }
}

fn checked_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyName)
    } else {
        Ok(trimmed.to_string())
    }
}

fn dedup_parents(parents: Vec<TypeId>) -> Vec<TypeId> {
    let mut seen = HashSet::new();
    parents.into_iter().filter(|p| seen.insert(*p)).collect()
}

fn check_properties(statics: &PropertyMap, dynamics: &PropertyMap) -> Result<(), FlowError> {
    for (property, schema) in statics.iter().chain(dynamics) {
        if !is_property_name(property) {
            return Err(ValidationError::InvalidSchema {
                property: property.clone(),
                reason: "property names must be identifiers".to_string(),
            }
            .into());
        }
        if RESERVED_FIELDS.contains(&property.as_str()) {
            return Err(ValidationError::InvalidSchema {
                property: property.clone(),
                reason: "name is reserved for fact fields".to_string(),
            }
            .into());
        }
        schema.check_definition(property)?;
    }
    if let Some(both) = statics.keys().find(|k| dynamics.contains_key(*k)) {
        return Err(SchemaError::SchemaConflict {
            property: both.clone(),
            first: format!("static {}", statics[both]),
            second: format!("dynamic {}", dynamics[both]),
        }
        .into());
    }
    Ok(())
}

/// Resolves `root` by walking parents depth-first through `lookup`.
fn resolve_with(root: TypeId, lookup: &dyn Fn(TypeId) -> FlowResult<Type>) -> FlowResult<ResolvedType> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut path = Vec::new();
    visit(root, lookup, &mut path, &mut seen, &mut order)?;

    let mut statics: BTreeMap<String, (PropertySchema, String)> = BTreeMap::new();
    let mut dynamics: BTreeMap<String, (PropertySchema, String)> = BTreeMap::new();
    for ty in &order {
        merge(&mut statics, &ty.static_properties, &ty.name)?;
        merge(&mut dynamics, &ty.dynamic_properties, &ty.name)?;
    }
    if let Some(both) = statics.keys().find(|k| dynamics.contains_key(*k)) {
        return Err(SchemaError::SchemaConflict {
            property: both.clone(),
            first: format!("static {} ({})", statics[both].0, statics[both].1),
            second: format!("dynamic {} ({})", dynamics[both].0, dynamics[both].1),
        }
        .into());
    }

    let (name, type_id) = order
        .first()
        .map(|t| (t.name.clone(), t.id))
        .ok_or_else(|| FlowError::unknown_type(root))?;
    Ok(ResolvedType {
        type_id,
        name,
        ancestors: order.iter().map(|t| t.id).collect(),
        ancestor_names: order.iter().map(|t| predicate_segment(&t.name)).collect(),
        static_properties: statics.into_iter().map(|(k, (s, _))| (k, s)).collect(),
        dynamic_properties: dynamics.into_iter().map(|(k, (s, _))| (k, s)).collect(),
    })
}

fn visit(
    id: TypeId,
    lookup: &dyn Fn(TypeId) -> FlowResult<Type>,
    path: &mut Vec<(TypeId, String)>,
    seen: &mut HashSet<TypeId>,
    order: &mut Vec<Type>,
) -> FlowResult<()> {
    let ty = lookup(id)?;
    if let Some(start) = path.iter().position(|(p, _)| *p == id) {
        let mut cycle: Vec<String> = path[start..].iter().map(|(_, n)| n.clone()).collect();
        cycle.push(ty.name);
        return Err(SchemaError::CyclicInheritance { path: cycle }.into());
    }
    if !seen.insert(id) {
        return Ok(());
    }
    path.push((id, ty.name.clone()));
    let parents = ty.parents.clone();
    order.push(ty);
    for parent in parents {
        visit(parent, lookup, path, seen, order)?;
    }
    path.pop();
    Ok(())
}

fn merge(
    into: &mut BTreeMap<String, (PropertySchema, String)>,
    own: &PropertyMap,
    owner: &str,
) -> Result<(), SchemaError> {
    for (property, schema) in own {
        match into.get(property) {
            Some((existing, first_owner)) if existing != schema => {
                return Err(SchemaError::SchemaConflict {
                    property: property.clone(),
                    first: format!("{existing} ({first_owner})"),
                    second: format!("{schema} ({owner})"),
                });
            }
            Some(_) => {}
            None => {
                into.insert(property.clone(), (schema.clone(), owner.to_string()));
            }
        }
    }
    Ok(())
}

fn diff_added(previous: &ResolvedType, current: &ResolvedType) -> Backfill {
    Backfill {
        type_id: current.type_id,
        static_defaults: current
            .static_properties
            .iter()
            .filter(|(k, _)| !previous.static_properties.contains_key(*k))
            .filter_map(|(k, schema)| schema.default_value().map(|v| (k.clone(), v)))
            .collect(),
        dynamic_properties: current
            .dynamic_properties
            .keys()
            .filter(|k| !previous.dynamic_properties.contains_key(*k))
            .cloned()
            .collect(),
    }
}
