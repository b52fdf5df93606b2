//! The platform: one process-scoped value owning every component.
//!
//! Writes flow through a single path: validate, append under the item's
//! lock, derive facts, assert them, then run the resulting actions. Actions
//! that write data re-enter the same path one level deeper; external calls
//! are handed to the dispatcher and never block the writer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::PlatformConfig;
use crate::dispatch::{ActionDispatcher, ActionHandler, DispatchStats, ExternalCall};
use crate::error::{ExecutionError, FlowError, FlowResult, ValidationError};
use crate::fact::FactDeriver;
use crate::ids::{DispatchId, ItemId, TypeId};
use crate::item::{validate_dynamic, validate_static, Item, NewItem, ReferenceResolver, Sample};
use crate::rule::{
    compile, parse_rule, Action, Activation, CompiledRule, EngineStats, InstantiationState, RuleDef, RuleEngine,
    SweepReport,
};
use crate::storage::{InMemoryItemStore, InMemoryTypeStore, ItemStore, StorageError, TypeStore};
use crate::time::Timestamp;
use crate::types::{ResolvedType, Type, TypeDef, TypePatch, TypeRef, TypeRegistry};
use crate::value::Value;

/// Counters of the engine and the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformStats {
    pub engine: EngineStats,
    pub dispatch: DispatchStats,
}

/// Looks up the types of stored items for `item`-typed property checks.
struct StoredRefs<'a> {
    registry: &'a TypeRegistry,
    items: &'a dyn ItemStore,
}

impl ReferenceResolver for StoredRefs<'_> {
    fn item_type_of(&self, item: ItemId) -> Option<Arc<ResolvedType>> {
        let type_id = self.items.type_of(item).ok().flatten()?;
        self.registry.resolve(type_id).ok()
    }
}

/// Typed item graph plus the reactive rule engine over it.
///
/// # Examples
///
/// ```
/// use kyroflow::{NewItem, Platform, PlatformConfig, PropertySchema, TypeDef, Value};
///
/// let platform = Platform::new(PlatformConfig::default()).unwrap();
/// let sensor = platform
///     .create_type(TypeDef::new("Thermo").dynamic_property("temp", PropertySchema::real_range(-40.0, 120.0)))
///     .unwrap();
/// let item = platform.create_item(NewItem::new(sensor.id).name("t1")).unwrap();
/// platform.write_dynamic(item.id, "temp", Value::Real(21.5), None).unwrap();
/// assert_eq!(platform.latest_value(item.id, "temp").unwrap().unwrap().value, Value::Real(21.5));
/// ```
pub struct Platform {
    config: PlatformConfig,
    registry: TypeRegistry,
    items: Arc<dyn ItemStore>,
    deriver: FactDeriver,
    engine: RuleEngine,
    dispatcher: ActionDispatcher,
    item_locks: Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// Builds a platform over fresh in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for out-of-range settings, or an internal error
    /// if the dispatcher worker cannot start.
    pub fn new(config: PlatformConfig) -> FlowResult<Self> {
        Self::with_stores(
            config,
            Arc::new(InMemoryTypeStore::new()),
            Arc::new(InMemoryItemStore::new()),
        )
    }

    /// Builds a platform over the given stores.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn with_stores(
        config: PlatformConfig,
        types: Arc<dyn TypeStore>,
        items: Arc<dyn ItemStore>,
    ) -> FlowResult<Self> {
        config.validate()?;
        let dispatcher = ActionDispatcher::new(&config.dispatcher)?;
        Ok(Self {
            registry: TypeRegistry::new(types),
            items,
            deriver: FactDeriver::new(),
            engine: RuleEngine::new(config.rule_engine.clone()),
            dispatcher,
            item_locks: Mutex::new(HashMap::new()),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PlatformConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    // ----- types -----

    /// # Errors
    ///
    /// See [`TypeRegistry::create_type`].
    pub fn create_type(&self, def: TypeDef) -> FlowResult<Type> {
        self.registry.create_type(def)
    }

    /// # Errors
    ///
    /// Returns `UnknownType` if it does not exist.
    pub fn get_type(&self, reference: impl Into<TypeRef>) -> FlowResult<Type> {
        self.registry.get_type(&reference.into())
    }

    /// # Errors
    ///
    /// Returns a storage error only.
    pub fn get_type_by_name(&self, name: &str) -> FlowResult<Option<Type>> {
        self.registry.get_by_name(name)
    }

    /// # Errors
    ///
    /// Returns a storage error only.
    pub fn list_types(&self) -> FlowResult<Vec<Type>> {
        self.registry.list()
    }

    /// The fully inherited schema of a type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if it does not exist.
    pub fn resolved_type(&self, reference: impl Into<TypeRef>) -> FlowResult<Arc<ResolvedType>> {
        let ty = self.registry.get_type(&reference.into())?;
        self.registry.resolve(ty.id)
    }

    /// Updates a type and backfills the properties it gained onto existing
    /// items of the type and its descendants.
    ///
    /// Backfilled static defaults produce their facts like values given at creation.
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::update_type`]. Nothing is written if the update is rejected.
    pub fn update_type(&self, id: TypeId, patch: TypePatch) -> FlowResult<Type> {
        let update = self.registry.update_type(id, patch)?;

        let mut touched = 0usize;
        let mut activations = Vec::new();
        for backfill in &update.backfills {
            let resolved = self.registry.resolve(backfill.type_id)?;
            let items = self.items.find_by_types(&HashSet::from([backfill.type_id]))?;
            for item in items {
                let lock = self.item_lock(item.id)?;
                let _guard = lock.lock().map_err(|_| FlowError::internal("item lock poisoned"))?;
                self.items
                    .backfill(item.id, &backfill.static_defaults, &backfill.dynamic_properties)?;

                let mut added = item.clone();
                added.static_values = backfill
                    .static_defaults
                    .iter()
                    .filter(|(property, _)| !item.static_values.contains_key(property))
                    .cloned()
                    .collect();
                if !added.static_values.is_empty() {
                    let facts = self.deriver.derive_static(&resolved, &added);
                    activations.extend(self.engine.assert_facts(facts)?);
                }
                touched += 1;
            }
        }
        if touched > 0 {
            info!(type_id = %id, items = touched, "existing items backfilled");
        }
        self.run_agenda(activations, 0);
        Ok(update.ty)
    }

    // ----- items -----

    /// Creates an item after validating its static values against the
    /// resolved schema. Missing values with a default are filled in, and
    /// every dynamic property starts with an empty series.
    ///
    /// # Errors
    ///
    /// - `UnknownType` if the item type does not exist
    /// - `EmptyName` / `DuplicateName` for a bad name
    /// - any `ValidationError` raised by the static schema
    pub fn create_item(&self, new: NewItem) -> FlowResult<Item> {
        let resolved = self.registry.resolve(new.item_type)?;

        let name = match new.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ValidationError::EmptyName.into());
                }
                if self.items.find_by_name(&name)?.is_some() {
                    return Err(ValidationError::DuplicateName { name }.into());
                }
                Some(name)
            }
            None => None,
        };

        let mut static_values = new.static_values;
        validate_static(&resolved, &mut static_values, &self.refs())?;

        let item = Item {
            id: ItemId::new(),
            item_type: new.item_type,
            name,
            static_values,
            dynamic_series: resolved
                .dynamic_properties
                .keys()
                .map(|p| (p.clone(), Vec::new()))
                .collect(),
            properties: new.properties,
            created_at: Utc::now(),
        };
        self.items.insert(item.clone()).map_err(|e| match e {
            StorageError::DuplicateKey(name) => ValidationError::DuplicateName { name }.into(),
            other => FlowError::from(other),
        })?;
        info!(item_id = %item.id, item_type = %resolved.name, name = ?item.name, "item created");

        let facts = self.deriver.derive_static(&resolved, &item);
        let activations = self.engine.assert_facts(facts)?;
        self.run_agenda(activations, 0);
        Ok(item)
    }

    /// # Errors
    ///
    /// Returns `UnknownItem` if it does not exist.
    pub fn get_item(&self, id: ItemId) -> FlowResult<Item> {
        self.items.get(id)?.ok_or_else(|| FlowError::unknown_item(id))
    }

    /// # Errors
    ///
    /// Returns a storage error only.
    pub fn find_item_by_name(&self, name: &str) -> FlowResult<Option<Item>> {
        Ok(self.items.find_by_name(name)?)
    }

    /// Items whose type is `filter` or inherits from it; every item when `None`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the filter names no type.
    pub fn list_items(&self, filter: Option<TypeRef>) -> FlowResult<Vec<Item>> {
        let types: HashSet<TypeId> = match filter {
            Some(reference) => {
                let ty = self.registry.get_type(&reference)?;
                self.registry.descendants(ty.id)?.into_iter().collect()
            }
            None => self.registry.list()?.into_iter().map(|t| t.id).collect(),
        };
        Ok(self.items.find_by_types(&types)?)
    }

    /// Appends one sample to a dynamic property and runs the rules it triggers.
    ///
    /// `timestamp` defaults to the receipt time. Timestamps need not increase.
    ///
    /// # Errors
    ///
    /// - `UnknownItem` if the item does not exist
    /// - `UnknownProperty` if the item's type declares no such dynamic property
    /// - any `ValidationError` raised by the property schema
    pub fn write_dynamic(
        &self,
        item_id: ItemId,
        property: impl Into<String>,
        value: impl Into<Value>,
        timestamp: Option<Timestamp>,
    ) -> FlowResult<()> {
        self.write_dynamic_many(item_id, [(property.into(), value.into())], timestamp)
    }

    /// Appends several samples sharing one timestamp.
    ///
    /// Every value is validated before any is written: one bad value rejects
    /// the whole write.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write_dynamic`].
    pub fn write_dynamic_many(
        &self,
        item_id: ItemId,
        values: impl IntoIterator<Item = (String, Value)>,
        timestamp: Option<Timestamp>,
    ) -> FlowResult<()> {
        let activations = self.apply_write(item_id, values.into_iter().collect(), timestamp)?;
        self.run_agenda(activations, 0);
        Ok(())
    }

    /// Latest sample (by timestamp) of a dynamic property.
    ///
    /// # Errors
    ///
    /// `UnknownItem` or `UnknownProperty`.
    pub fn latest_value(&self, item_id: ItemId, property: &str) -> FlowResult<Option<Sample>> {
        let item = self.get_item(item_id)?;
        self.check_dynamic(&item, property)?;
        Ok(item.latest(property).cloned())
    }

    /// Samples of a dynamic property with `from <= timestamp <= to`, in timestamp order.
    ///
    /// # Errors
    ///
    /// `UnknownItem` or `UnknownProperty`.
    pub fn series_range(
        &self,
        item_id: ItemId,
        property: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> FlowResult<Vec<Sample>> {
        let item = self.get_item(item_id)?;
        self.check_dynamic(&item, property)?;
        Ok(item.series_range(property, from, to))
    }

    // ----- rules -----

    /// Compiles and installs a rule, replacing any rule of the same name.
    ///
    /// The rule reacts to facts asserted from now on; facts already in working
    /// memory still take part in its joins.
    ///
    /// # Errors
    ///
    /// Any `RuleCompileError`, or `ArityMismatch` for a malformed `add_data`.
    pub fn register_rule(&self, def: RuleDef) -> FlowResult<Arc<CompiledRule>> {
        let catalog = self.registry.predicate_catalog()?;
        let actions = self.dispatcher.known_actions()?;
        let compiled = compile(def, &catalog, &actions)?;
        let name = compiled.name().to_string();
        self.engine.register(compiled)?;
        self.engine
            .get(&name)?
            .ok_or_else(|| FlowError::internal(format!("rule '{name}' vanished after registration")))
    }

    /// Parses a `(defrule ...)` form and registers it.
    ///
    /// # Errors
    ///
    /// `Syntax` for malformed text, otherwise as [`Self::register_rule`].
    pub fn register_rule_text(&self, text: &str) -> FlowResult<Arc<CompiledRule>> {
        self.register_rule(parse_rule(text)?)
    }

    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn get_rule(&self, name: &str) -> FlowResult<Option<Arc<CompiledRule>>> {
        self.engine.get(name)
    }

    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn list_rules(&self) -> FlowResult<Vec<Arc<CompiledRule>>> {
        self.engine.list()
    }

    /// Removes a rule. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn remove_rule(&self, name: &str) -> FlowResult<bool> {
        Ok(self.engine.remove(name)?.is_some())
    }

    /// State of a rule's instantiation over the samples of `item` at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn instantiation_state(
        &self,
        rule: &str,
        item: ItemId,
        timestamp: Timestamp,
    ) -> FlowResult<Option<InstantiationState>> {
        self.engine.instantiation_state(rule, item, timestamp)
    }

    /// Expires pending joins older than the retention window, relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn sweep_at(&self, now: Timestamp) -> FlowResult<SweepReport> {
        self.engine.sweep_at(now)
    }

    // ----- external actions -----

    /// Installs the handler for an external action name.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn register_handler(&self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) -> FlowResult<()> {
        let action = action.into();
        if self.dispatcher.register_handler(action.clone(), handler)?.is_some() {
            debug!(action = %action, "action handler replaced");
        }
        Ok(())
    }

    /// Blocks until every external call queued so far has been handled.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or if the dispatcher is gone.
    pub fn wait_for_dispatch(&self, timeout: Duration) -> FlowResult<()> {
        self.dispatcher.wait_idle(timeout)
    }

    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn stats(&self) -> FlowResult<PlatformStats> {
        Ok(PlatformStats {
            engine: self.engine.stats()?,
            dispatch: self.dispatcher.stats(),
        })
    }

    // ----- internals -----

    fn refs(&self) -> StoredRefs<'_> {
        StoredRefs {
            registry: &self.registry,
            items: self.items.as_ref(),
        }
    }

    fn item_lock(&self, id: ItemId) -> FlowResult<Arc<Mutex<()>>> {
        let mut locks = self
            .item_locks
            .lock()
            .map_err(|_| FlowError::internal("item lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }

    fn check_dynamic(&self, item: &Item, property: &str) -> FlowResult<()> {
        let resolved = self.registry.resolve(item.item_type)?;
        if resolved.dynamic_properties.contains_key(property) {
            Ok(())
        } else {
            Err(unknown_property(&resolved, property))
        }
    }

    /// Validates, appends and asserts one write. Returns the activations it fired.
    fn apply_write(
        &self,
        item_id: ItemId,
        values: Vec<(String, Value)>,
        timestamp: Option<Timestamp>,
    ) -> FlowResult<Vec<Activation>> {
        let type_id = self
            .items
            .type_of(item_id)?
            .ok_or_else(|| FlowError::unknown_item(item_id))?;
        let resolved = self.registry.resolve(type_id)?;

        let refs = self.refs();
        for (property, value) in &values {
            let schema = resolved
                .dynamic_properties
                .get(property)
                .ok_or_else(|| unknown_property(&resolved, property))?;
            validate_dynamic(property, schema, value, &refs)?;
        }

        let timestamp = timestamp.unwrap_or_else(Timestamp::now);
        let observed_at = Utc::now();
        let samples: Vec<(String, Sample)> = values
            .into_iter()
            .map(|(property, value)| {
                (
                    property,
                    Sample {
                        value,
                        timestamp,
                        observed_at,
                    },
                )
            })
            .collect();

        let lock = self.item_lock(item_id)?;
        let _guard = lock.lock().map_err(|_| FlowError::internal("item lock poisoned"))?;
        self.items.append_samples(item_id, samples.clone())?;
        debug!(%item_id, samples = samples.len(), %timestamp, "dynamic values appended");

        let facts = samples
            .iter()
            .flat_map(|(property, sample)| self.deriver.derive_dynamic(&resolved, item_id, property, sample));
        self.engine.assert_facts(facts)
    }

    /// Runs activations breadth-first. Writes they cause are applied one
    /// level deeper; failures are logged and never undo the triggering write.
    fn run_agenda(&self, activations: Vec<Activation>, depth: usize) {
        let mut agenda: VecDeque<(Activation, usize)> = activations.into_iter().map(|a| (a, depth)).collect();
        while let Some((activation, depth)) = agenda.pop_front() {
            let rule = activation.rule.name().to_string();
            for action in activation.actions() {
                let action = match action {
                    Ok(action) => action,
                    Err(err) => {
                        warn!(rule = %rule, error = %err, "rule action could not be instantiated");
                        continue;
                    }
                };
                match action {
                    Action::AddData {
                        target,
                        values,
                        timestamp,
                    } => {
                        if depth >= self.config.max_chain_depth {
                            let err = ExecutionError::ChainDepthExceeded {
                                max_depth: self.config.max_chain_depth,
                            };
                            warn!(rule = %rule, item_id = %target, error = %err, "add_data dropped");
                            continue;
                        }
                        match self.apply_write(target, values, timestamp) {
                            Ok(next) => agenda.extend(next.into_iter().map(|a| (a, depth + 1))),
                            Err(err) => warn!(rule = %rule, item_id = %target, error = %err, "add_data failed"),
                        }
                    }
                    Action::External {
                        name,
                        item_id,
                        payload,
                    } => {
                        self.dispatcher.submit(ExternalCall {
                            id: DispatchId::new(),
                            rule: rule.clone(),
                            action: name,
                            item_id,
                            payload,
                            requested_at: Utc::now(),
                        });
                    }
                    Action::Printout { text } => {
                        info!(rule = %rule, "{text}");
                    }
                }
            }
        }
    }
}

fn unknown_property(resolved: &ResolvedType, property: &str) -> FlowError {
    ExecutionError::UnknownProperty {
        type_name: resolved.name.clone(),
        property: property.to_string(),
    }
    .into()
}
