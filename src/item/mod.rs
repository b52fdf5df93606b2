//! Items: typed instances holding static values and dynamic time series.

mod validate;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, TypeId};
use crate::time::Timestamp;
use crate::value::Value;

pub(crate) use validate::{validate_dynamic, validate_static, ReferenceResolver};

/// One sample of a dynamic property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: Value,
    /// Producer timestamp; the join key for temporal rules.
    pub timestamp: Timestamp,
    /// Wall-clock time the sample was accepted.
    pub observed_at: DateTime<Utc>,
}

/// A stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,

    /// Fixed at creation.
    pub item_type: TypeId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub static_values: BTreeMap<String, Value>,

    /// Samples per dynamic property, ordered by timestamp.
    pub dynamic_series: BTreeMap<String, Vec<Sample>>,

    /// Free-form presentation metadata.
    #[serde(default)]
    pub properties: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Latest sample (by timestamp) of a dynamic property.
    #[must_use]
    pub fn latest(&self, property: &str) -> Option<&Sample> {
        self.dynamic_series.get(property).and_then(|s| s.last())
    }

    /// Samples of `property` with `from <= timestamp <= to`.
    #[must_use]
    pub fn series_range(&self, property: &str, from: Timestamp, to: Timestamp) -> Vec<Sample> {
        self.dynamic_series
            .get(property)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp >= from && s.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inserts a sample, keeping the series ordered by timestamp.
    ///
    /// Samples with equal timestamps keep arrival order.
    pub(crate) fn push_sample(&mut self, property: &str, sample: Sample) {
        let series = self.dynamic_series.entry(property.to_string()).or_default();
        let at = series.partition_point(|s| s.timestamp <= sample.timestamp);
        series.insert(at, sample);
    }
}

/// Payload for creating an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub item_type: TypeId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub static_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl NewItem {
    /// Starts an item of `item_type`.
    #[must_use]
    pub fn new(item_type: TypeId) -> Self {
        Self {
            item_type,
            name: None,
            static_values: BTreeMap::new(),
            properties: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn value(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.static_values.insert(property.into(), value.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}
