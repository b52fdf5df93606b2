//! Working-memory facts derived from item mutations.
//!
//! Every fact is tagged with one ancestor type name, so a rule written against
//! `Sensor_kit` sees the `kit` relation of an `rPPG` item as well.

mod deriver;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ItemId;
use crate::time::Timestamp;
use crate::value::Value;

pub use deriver::FactDeriver;

/// What produced a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// A dynamic sample: `<Ancestor>_has_<property>`.
    Property,
    /// A static value that is not an item reference: `<Ancestor>_<property>`.
    Attribute,
    /// An item reference, static or dynamic.
    Relation,
}

/// An immutable proposition in working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub kind: FactKind,
    pub item_id: ItemId,
    /// Name of the value field.
    pub property: String,
    pub value: Value,
    /// Present for dynamic samples only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl Fact {
    /// Value of a pattern field: `item_id`, the property name, or `timestamp`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "item_id" => Some(Value::Item(self.item_id)),
            "timestamp" => self.timestamp.map(|t| Value::Int(t.as_millis())),
            _ if name == self.property => Some(self.value.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} (item_id {}) ({} {})",
            self.predicate, self.item_id, self.property, self.value
        )?;
        if let Some(ts) = self.timestamp {
            write!(f, " (timestamp {ts})")?;
        }
        write!(f, ")")
    }
}
