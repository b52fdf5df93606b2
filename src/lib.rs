//! # KyroFlow - typed item graph with a reactive rule engine
//!
//! KyroFlow stores *items* that conform to user-defined *types*. Types form a
//! multiple-inheritance DAG and declare static properties (set at creation)
//! and dynamic properties (timestamped series). Every item mutation is turned
//! into facts tagged with each ancestor type name, and a forward-chaining rule
//! engine joins those facts to fire actions: writing derived data back into
//! the graph, or calling external handlers asynchronously.
//!
//! ## Core Concepts
//!
//! - **Type**: named schema with parents, static and dynamic property schemas
//! - **Item**: typed instance with static values and per-property series
//! - **Fact**: `<Ancestor>_has_<prop>` for samples, `<Ancestor>_<prop>` for static values
//! - **Rule**: conjunction of fact patterns plus an ordered list of actions
//!
//! ## Usage
//!
//! ```rust
//! use kyroflow::{NewItem, Platform, PlatformConfig, PropertySchema, Timestamp, TypeDef, Value};
//!
//! let platform = Platform::new(PlatformConfig::default()).unwrap();
//! let patient = platform
//!     .create_type(
//!         TypeDef::new("Patient")
//!             .dynamic_property("HR", PropertySchema::integer_range(30, 220))
//!             .dynamic_property("alarm", PropertySchema::boolean()),
//!     )
//!     .unwrap();
//! platform
//!     .register_rule_text(
//!         "(defrule tachycardia (Patient_has_HR (item_id ?p) (HR 200) (timestamp ?t)) \
//!          => (add_data ?p (create$ alarm) (create$ TRUE) ?t))",
//!     )
//!     .unwrap();
//!
//! let p = platform.create_item(NewItem::new(patient.id)).unwrap();
//! platform.write_dynamic(p.id, "HR", 200, Some(Timestamp::from_millis(5))).unwrap();
//! assert_eq!(platform.latest_value(p.id, "alarm").unwrap().unwrap().value, Value::Bool(true));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fact;
pub mod geometry;
pub mod ids;
pub mod item;
pub mod platform;
pub mod rule;
pub mod schema;
pub mod storage;
pub mod time;
pub mod types;
pub mod value;

pub use config::{DispatcherConfig, PlatformConfig, RuleEngineConfig};
pub use dispatch::{ActionDispatcher, ActionHandler, DispatchStats, ExternalCall, HandlerError};
pub use error::{ExecutionError, FlowError, FlowResult, RuleCompileError, SchemaError, ValidationError};
pub use fact::{Fact, FactDeriver, FactKind};
pub use ids::{DispatchId, ItemId, RuleId, TypeId};
pub use item::{Item, NewItem, Sample};
pub use platform::{Platform, PlatformStats};
pub use rule::{
    parse_rule, Action, ActionTemplate, Activation, CompiledRule, EngineStats, FactPattern, FieldConstraint,
    InstantiationState, RuleDef, RuleEngine, SweepReport, Term,
};
pub use schema::PropertySchema;
pub use storage::{InMemoryItemStore, InMemoryStores, InMemoryTypeStore, ItemStore, StorageError, TypeStore};
pub use time::Timestamp;
pub use types::{ResolvedType, Type, TypeDef, TypePatch, TypeRef, TypeRegistry};
pub use value::Value;
