//! Property-based tests for validation, schema resolution and firing.

use std::collections::HashSet;

use proptest::prelude::*;

use kyroflow::{NewItem, Platform, PlatformConfig, PropertySchema, Timestamp, TypeDef, Value};

fn platform() -> Platform {
    Platform::new(PlatformConfig::default()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Out-of-range writes fail and never touch the series.
    #[test]
    fn prop_rejected_writes_leave_series_unchanged(values in prop::collection::vec(-500i64..500, 1..40)) {
        let p = platform();
        let rppg = p
            .create_type(TypeDef::new("rPPG").dynamic_property("HR", PropertySchema::integer_range(48, 180)))
            .unwrap();
        let item = p.create_item(NewItem::new(rppg.id)).unwrap();

        let mut accepted = Vec::new();
        for (t, v) in values.iter().enumerate() {
            let t = i64::try_from(t).unwrap();
            let result = p.write_dynamic(item.id, "HR", *v, Some(Timestamp::from_millis(t)));
            if (48..=180).contains(v) {
                prop_assert!(result.is_ok());
                accepted.push(Value::Int(*v));
            } else {
                prop_assert!(result.unwrap_err().is_validation());
            }
        }

        let stored: Vec<Value> = p.get_item(item.id).unwrap().dynamic_series["HR"]
            .iter()
            .map(|s| s.value.clone())
            .collect();
        prop_assert_eq!(stored, accepted);
    }

    /// Resolving a type is stable across repeated calls and unrelated registrations.
    #[test]
    fn prop_resolution_is_idempotent(extra in 0usize..6) {
        let p = platform();
        let base = p
            .create_type(TypeDef::new("Base").static_property("serial", PropertySchema::string()))
            .unwrap();
        let child = p
            .create_type(
                TypeDef::new("Child")
                    .parent(base.id)
                    .dynamic_property("x", PropertySchema::integer()),
            )
            .unwrap();

        let first = p.resolved_type(child.id).unwrap();
        for i in 0..extra {
            p.create_type(TypeDef::new(format!("Other{i}"))).unwrap();
        }
        let second = p.resolved_type(child.id).unwrap();
        prop_assert_eq!(&*first, &*second);
    }

    /// A three-way join fires once when all parts arrive, however often they are delivered.
    #[test]
    fn prop_join_fires_at_most_once(deliveries in prop::collection::vec(0usize..3, 1..12)) {
        let p = platform();
        let node = p
            .create_type(
                TypeDef::new("Node")
                    .dynamic_property("a", PropertySchema::integer())
                    .dynamic_property("b", PropertySchema::integer())
                    .dynamic_property("c", PropertySchema::integer())
                    .dynamic_property("sum", PropertySchema::boolean()),
            )
            .unwrap();
        let n = p.create_item(NewItem::new(node.id)).unwrap();
        p.register_rule_text(
            "(defrule abc \
               (Node_has_a (item_id ?n) (a ?a) (timestamp ?t)) \
               (Node_has_b (item_id ?n) (b ?b) (timestamp ?t)) \
               (Node_has_c (item_id ?n) (c ?c) (timestamp ?t)) \
               => (add_data ?n (create$ sum) (create$ TRUE) ?t))",
        )
        .unwrap();

        let names = ["a", "b", "c"];
        for d in &deliveries {
            p.write_dynamic(n.id, names[*d], 1, Some(Timestamp::from_millis(10))).unwrap();
        }

        let complete = deliveries.iter().collect::<HashSet<_>>().len() == 3;
        let fired = p.stats().unwrap().engine.fired;
        prop_assert_eq!(fired, u64::from(complete));
        prop_assert_eq!(p.get_item(n.id).unwrap().dynamic_series["sum"].len(), usize::from(complete));
    }
}
