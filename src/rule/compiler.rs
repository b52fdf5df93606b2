//! Checks a [`RuleDef`] against the known predicates and produces a [`CompiledRule`].

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{FlowResult, RuleCompileError, ValidationError};
use crate::ids::RuleId;
use crate::rule::ast::{ActionTemplate, RuleDef};
use crate::types::PredicateCatalog;

/// A rule ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub id: RuleId,
    pub def: RuleDef,
    pub registered_at: DateTime<Utc>,
    temporal: Vec<bool>,
}

impl CompiledRule {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Whether pattern `index` joins on `timestamp`.
    #[must_use]
    pub fn is_temporal(&self, index: usize) -> bool {
        self.temporal.get(index).copied().unwrap_or(false)
    }

    /// True if any pattern joins on `timestamp`.
    #[must_use]
    pub fn has_temporal_patterns(&self) -> bool {
        self.temporal.iter().any(|t| *t)
    }

    /// Distinct predicates on the left-hand side.
    #[must_use]
    pub fn predicates(&self) -> BTreeSet<&str> {
        self.def.patterns.iter().map(|p| p.predicate.as_str()).collect()
    }
}

/// Compiles `def`.
///
/// `external_actions` lists the action names a rule may hand to the dispatcher.
///
/// # Errors
///
/// - `EmptyName` if the rule has no name
/// - `EmptyRule` if it has no patterns
/// - `UnknownPredicate` / `UnknownField` for patterns no type can produce
/// - `UnboundVariable` if an action reads a variable no pattern binds
/// - `UnknownAction` for an external action nobody handles
/// - `ArityMismatch` if `add_data` names a different number of properties and values
pub fn compile(
    def: RuleDef,
    catalog: &PredicateCatalog,
    external_actions: &HashSet<String>,
) -> FlowResult<CompiledRule> {
    let name = def.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    let rule = name.to_string();
    if def.patterns.is_empty() {
        return Err(RuleCompileError::EmptyRule { rule }.into());
    }

    for pattern in &def.patterns {
        let info = catalog
            .get(&pattern.predicate)
            .ok_or_else(|| RuleCompileError::UnknownPredicate {
                rule: rule.clone(),
                predicate: pattern.predicate.clone(),
            })?;
        if let Some(bad) = pattern.fields.iter().find(|f| !info.allows_field(&f.field)) {
            return Err(RuleCompileError::UnknownField {
                rule,
                predicate: pattern.predicate.clone(),
                field: bad.field.clone(),
            }
            .into());
        }
    }

    let bound = def.bound_variables();
    for action in &def.actions {
        if let Some(unbound) = action.variables().into_iter().find(|v| !bound.contains(v)) {
            return Err(RuleCompileError::UnboundVariable {
                rule,
                variable: unbound.to_string(),
            }
            .into());
        }
        match action {
            ActionTemplate::AddData { properties, values, .. } if properties.len() != values.len() => {
                return Err(ValidationError::ArityMismatch {
                    action: "add_data".to_string(),
                    expected: properties.len(),
                    actual: values.len(),
                }
                .into());
            }
            ActionTemplate::External { name, .. } if !external_actions.contains(name) => {
                return Err(RuleCompileError::UnknownAction { action: name.clone() }.into());
            }
            _ => {}
        }
    }

    let temporal = def.patterns.iter().map(|p| p.is_temporal()).collect();
    Ok(CompiledRule {
        id: RuleId::new(),
        def: RuleDef {
            name: rule,
            ..def
        },
        registered_at: Utc::now(),
        temporal,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::FlowError;
    use crate::rule::parse_rule;
    use crate::schema::PropertySchema;
    use crate::storage::InMemoryTypeStore;
    use crate::types::{TypeDef, TypeRegistry};

    fn catalog() -> PredicateCatalog {
        let reg = TypeRegistry::new(Arc::new(InMemoryTypeStore::new()));
        reg.create_type(
            TypeDef::new("User")
                .static_property("name", PropertySchema::string())
                .dynamic_property("text", PropertySchema::string())
                .dynamic_property("me", PropertySchema::boolean()),
        )
        .unwrap();
        reg.predicate_catalog().unwrap()
    }

    fn actions() -> HashSet<String> {
        HashSet::from(["compute_response".to_string(), "trigger_intent".to_string()])
    }

    fn compile_text(text: &str) -> FlowResult<CompiledRule> {
        compile(parse_rule(text)?, &catalog(), &actions())
    }

    #[test]
    fn compiles_and_flags_temporal_patterns() {
        let rule = compile_text(
            "(defrule user_dialogue (User_has_me (item_id ?u) (me TRUE) (timestamp ?t)) \
             (User_name (item_id ?u) (name ?n)) => (compute_response ?u ?n))",
        )
        .unwrap();
        assert!(rule.is_temporal(0));
        assert!(!rule.is_temporal(1));
        assert!(rule.has_temporal_patterns());
        assert_eq!(rule.predicates().len(), 2);
    }

    #[test]
    fn rejects_undefined_predicates() {
        let err = compile_text("(defrule r (Bus_has_speed (item_id ?b)) =>)").unwrap_err();
        assert!(matches!(
            err,
            FlowError::RuleCompile(RuleCompileError::UnknownPredicate { ref predicate, .. }) if predicate == "Bus_has_speed"
        ));
    }

    #[test]
    fn rejects_fields_the_predicate_does_not_carry() {
        let err = compile_text("(defrule r (User_name (item_id ?u) (timestamp ?t)) =>)").unwrap_err();
        assert!(matches!(err, FlowError::RuleCompile(RuleCompileError::UnknownField { .. })));
    }

    #[test]
    fn rejects_unbound_action_variables() {
        let err = compile_text("(defrule r (User_name (item_id ?u)) => (compute_response ?u ?text))").unwrap_err();
        assert!(matches!(
            err,
            FlowError::RuleCompile(RuleCompileError::UnboundVariable { ref variable, .. }) if variable == "text"
        ));
    }

    #[test]
    fn rejects_unknown_actions_and_arity_mismatches() {
        let err = compile_text("(defrule r (User_name (item_id ?u)) => (launch_rocket ?u))").unwrap_err();
        assert!(matches!(err, FlowError::RuleCompile(RuleCompileError::UnknownAction { .. })));

        let err = compile_text("(defrule r (User_name (item_id ?u) (name ?n)) => (add_data ?u (create$ text me) (create$ ?n)))")
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn rejects_empty_rules() {
        let err = compile(RuleDef::new("nothing"), &catalog(), &actions()).unwrap_err();
        assert!(matches!(err, FlowError::RuleCompile(RuleCompileError::EmptyRule { .. })));
        assert!(compile(RuleDef::new(" "), &catalog(), &actions()).unwrap_err().is_validation());
    }
}
