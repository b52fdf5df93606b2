use tracing::debug;

use crate::fact::{Fact, FactKind};
use crate::ids::ItemId;
use crate::item::{Item, Sample};
use crate::types::ResolvedType;
use crate::value::Value;

/// Turns item mutations into facts, one per ancestor type name.
///
/// Stateless: the ancestor list comes precomputed with the resolved type.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactDeriver;

impl FactDeriver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Facts for a freshly created item: one per static value and ancestor.
    #[must_use]
    pub fn derive_static(&self, resolved: &ResolvedType, item: &Item) -> Vec<Fact> {
        let mut facts = Vec::with_capacity(item.static_values.len() * resolved.ancestor_names.len());
        for (property, value) in &item.static_values {
            let kind = if is_relation(resolved, property, value, false) {
                FactKind::Relation
            } else {
                FactKind::Attribute
            };
            for ancestor in &resolved.ancestor_names {
                facts.push(Fact {
                    predicate: format!("{ancestor}_{property}"),
                    kind,
                    item_id: item.id,
                    property: property.clone(),
                    value: value.clone(),
                    timestamp: None,
                });
            }
        }
        debug!(item_id = %item.id, facts = facts.len(), "static facts derived");
        facts
    }

    /// Facts for one dynamic sample.
    #[must_use]
    pub fn derive_dynamic(
        &self,
        resolved: &ResolvedType,
        item_id: ItemId,
        property: &str,
        sample: &Sample,
    ) -> Vec<Fact> {
        let kind = if is_relation(resolved, property, &sample.value, true) {
            FactKind::Relation
        } else {
            FactKind::Property
        };
        let facts: Vec<Fact> = resolved
            .ancestor_names
            .iter()
            .map(|ancestor| Fact {
                predicate: format!("{ancestor}_has_{property}"),
                kind,
                item_id,
                property: property.to_string(),
                value: sample.value.clone(),
                timestamp: Some(sample.timestamp),
            })
            .collect();
        debug!(%item_id, property, timestamp = %sample.timestamp, facts = facts.len(), "dynamic facts derived");
        facts
    }
}

fn is_relation(resolved: &ResolvedType, property: &str, value: &Value, dynamic: bool) -> bool {
    let schemas = if dynamic {
        &resolved.dynamic_properties
    } else {
        &resolved.static_properties
    };
    value.is_item() && schemas.get(property).is_some_and(|s| s.is_relation())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::ids::TypeId;
    use crate::schema::PropertySchema;
    use crate::time::Timestamp;
    use crate::types::PropertyMap;

    fn rppg() -> ResolvedType {
        let kit_type = TypeId::new();
        ResolvedType {
            type_id: TypeId::new(),
            name: "rPPG".to_string(),
            ancestors: vec![TypeId::new(), TypeId::new()],
            ancestor_names: vec!["rPPG".to_string(), "Sensor".to_string()],
            static_properties: PropertyMap::from([
                ("kit".to_string(), PropertySchema::item(kit_type)),
                ("model".to_string(), PropertySchema::string()),
            ]),
            dynamic_properties: PropertyMap::from([("HR".to_string(), PropertySchema::integer_range(48, 180))]),
        }
    }

    #[test]
    fn dynamic_write_emits_one_fact_per_ancestor() {
        let resolved = rppg();
        let sample = Sample {
            value: Value::Int(72),
            timestamp: Timestamp::from_millis(100),
            observed_at: Utc::now(),
        };
        let facts = FactDeriver::new().derive_dynamic(&resolved, ItemId::new(), "HR", &sample);

        let names: Vec<&str> = facts.iter().map(|f| f.predicate.as_str()).collect();
        assert_eq!(names, vec!["rPPG_has_HR", "Sensor_has_HR"]);
        assert!(facts.iter().all(|f| f.kind == FactKind::Property));
        assert!(facts.iter().all(|f| f.timestamp == Some(Timestamp::from_millis(100))));
    }

    #[test]
    fn static_item_references_become_relations() {
        let resolved = rppg();
        let kit = ItemId::new();
        let item = Item {
            id: ItemId::new(),
            item_type: resolved.type_id,
            name: Some("rppg1".to_string()),
            static_values: BTreeMap::from([
                ("kit".to_string(), Value::Item(kit)),
                ("model".to_string(), Value::from("v2")),
            ]),
            dynamic_series: BTreeMap::new(),
            properties: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        let facts = FactDeriver::new().derive_static(&resolved, &item);

        assert_eq!(facts.len(), 4);
        let sensor_kit = facts.iter().find(|f| f.predicate == "Sensor_kit").unwrap();
        assert_eq!(sensor_kit.kind, FactKind::Relation);
        assert_eq!(sensor_kit.value, Value::Item(kit));
        assert_eq!(sensor_kit.timestamp, None);
        let model = facts.iter().find(|f| f.predicate == "rPPG_model").unwrap();
        assert_eq!(model.kind, FactKind::Attribute);
    }
}
