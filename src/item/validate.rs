use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::ids::ItemId;
use crate::schema::PropertySchema;
use crate::types::ResolvedType;
use crate::value::Value;

/// Resolves the type of an already stored item, for `item` property checks.
pub(crate) trait ReferenceResolver {
    fn item_type_of(&self, item: ItemId) -> Option<Arc<ResolvedType>>;
}

/// Validates static values against the fully inherited static schema.
///
/// Missing properties with a default are filled in. Every declared property
/// without a default is required.
pub(crate) fn validate_static(
    resolved: &ResolvedType,
    values: &mut BTreeMap<String, Value>,
    refs: &dyn ReferenceResolver,
) -> Result<(), ValidationError> {
    if let Some(unexpected) = values.keys().find(|k| !resolved.static_properties.contains_key(*k)) {
        return Err(ValidationError::UnexpectedStaticProperty {
            property: unexpected.clone(),
        });
    }

    for (property, schema) in &resolved.static_properties {
        match values.get(property) {
            Some(value) => check_value(property, schema, value, refs)?,
            None => match schema.default_value() {
                Some(default) => {
                    values.insert(property.clone(), default);
                }
                None => {
                    return Err(ValidationError::MissingStaticProperty {
                        property: property.clone(),
                    })
                }
            },
        }
    }
    Ok(())
}

/// Validates one dynamic value. The caller has already checked that the
/// property is declared.
pub(crate) fn validate_dynamic(
    property: &str,
    schema: &PropertySchema,
    value: &Value,
    refs: &dyn ReferenceResolver,
) -> Result<(), ValidationError> {
    check_value(property, schema, value, refs)
}

fn check_value(
    property: &str,
    schema: &PropertySchema,
    value: &Value,
    refs: &dyn ReferenceResolver,
) -> Result<(), ValidationError> {
    schema.validate(property, value)?;

    let (Some(expected), Some(target)) = (schema.referenced_type(), value.as_item()) else {
        return Ok(());
    };
    let Some(actual) = refs.item_type_of(target) else {
        return Err(ValidationError::DanglingItemReference {
            property: property.to_string(),
            item: target,
        });
    };
    if actual.descends_from(expected) {
        Ok(())
    } else {
        Err(ValidationError::WrongItemType {
            property: property.to_string(),
            item: target,
            expected,
            actual: actual.type_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ids::TypeId;
    use crate::types::PropertyMap;

    struct Refs(HashMap<ItemId, Arc<ResolvedType>>);

    impl ReferenceResolver for Refs {
        fn item_type_of(&self, item: ItemId) -> Option<Arc<ResolvedType>> {
            self.0.get(&item).cloned()
        }
    }

    fn resolved(name: &str, ancestors: Vec<TypeId>, statics: PropertyMap) -> ResolvedType {
        ResolvedType {
            type_id: ancestors[0],
            name: name.to_string(),
            ancestor_names: vec![name.to_string()],
            ancestors,
            static_properties: statics,
            dynamic_properties: PropertyMap::new(),
        }
    }

    #[test]
    fn fills_defaults_and_requires_the_rest() {
        let mut statics = PropertyMap::new();
        statics.insert(
            "role".to_string(),
            PropertySchema::integer_range(0, 2).with_default("role", Value::Int(2)).unwrap(),
        );
        statics.insert("name".to_string(), PropertySchema::string());
        let user = resolved("User", vec![TypeId::new()], statics);
        let refs = Refs(HashMap::new());

        let mut values = BTreeMap::from([("name".to_string(), Value::from("Alice"))]);
        validate_static(&user, &mut values, &refs).unwrap();
        assert_eq!(values["role"], Value::Int(2));

        let mut missing = BTreeMap::new();
        assert_eq!(
            validate_static(&user, &mut missing, &refs).unwrap_err(),
            ValidationError::MissingStaticProperty {
                property: "name".to_string()
            }
        );
    }

    #[test]
    fn rejects_undeclared_properties() {
        let user = resolved("User", vec![TypeId::new()], PropertyMap::new());
        let mut values = BTreeMap::from([("icon".to_string(), Value::from("x.png"))]);
        assert!(matches!(
            validate_static(&user, &mut values, &Refs(HashMap::new())).unwrap_err(),
            ValidationError::UnexpectedStaticProperty { .. }
        ));
    }

    #[test]
    fn item_references_must_exist_and_descend_from_the_target_type() {
        let kit_type = TypeId::new();
        let user_type = TypeId::new();
        let kit = ItemId::new();
        let user = ItemId::new();
        let refs = Refs(HashMap::from([
            (kit, Arc::new(resolved("Kit", vec![kit_type], PropertyMap::new()))),
            (user, Arc::new(resolved("User", vec![user_type], PropertyMap::new()))),
        ]));
        let schema = PropertySchema::item(kit_type);

        assert!(validate_dynamic("kit", &schema, &Value::Item(kit), &refs).is_ok());
        assert!(matches!(
            validate_dynamic("kit", &schema, &Value::Item(user), &refs).unwrap_err(),
            ValidationError::WrongItemType { .. }
        ));
        assert!(matches!(
            validate_dynamic("kit", &schema, &Value::Item(ItemId::new()), &refs).unwrap_err(),
            ValidationError::DanglingItemReference { .. }
        ));
    }
}
