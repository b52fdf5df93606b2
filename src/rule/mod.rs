//! Reactive rules: AST, textual form, compilation and the matching engine.

mod ast;
mod compiler;
mod engine;
mod parser;
mod pending;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult, ValidationError};
use crate::ids::ItemId;
use crate::time::Timestamp;
use crate::value::Value;

pub use ast::{ActionTemplate, FactPattern, FieldConstraint, RuleDef, Term};
pub use compiler::{compile, CompiledRule};
pub use engine::{EngineStats, RuleEngine};
pub use parser::parse_rule;
pub use pending::{InstantiationState, SweepReport};

/// Variable name (without `?`) to bound value.
pub type Bindings = BTreeMap<String, Value>;

/// A concrete action, with every variable substituted.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddData {
        target: ItemId,
        values: Vec<(String, Value)>,
        timestamp: Option<Timestamp>,
    },
    External {
        name: String,
        item_id: ItemId,
        payload: Vec<Value>,
    },
    Printout {
        text: String,
    },
}

/// A rule instantiation that has fired.
#[derive(Debug, Clone)]
pub struct Activation {
    pub rule: Arc<CompiledRule>,
    pub bindings: Bindings,
}

impl Activation {
    /// Instantiates the rule's actions in order.
    ///
    /// An action whose arguments have the wrong shape (a target that is not an
    /// item, a non-integer timestamp) yields an error without affecting the others.
    #[must_use]
    pub fn actions(&self) -> Vec<FlowResult<Action>> {
        self.rule
            .def
            .actions
            .iter()
            .map(|template| self.instantiate(template))
            .collect()
    }

    fn instantiate(&self, template: &ActionTemplate) -> FlowResult<Action> {
        match template {
            ActionTemplate::AddData {
                target,
                properties,
                values,
                timestamp,
            } => {
                let target = self.item("add_data", target)?;
                let values = properties
                    .iter()
                    .zip(values)
                    .map(|(p, v)| self.eval(v).map(|v| (p.clone(), v)))
                    .collect::<FlowResult<Vec<_>>>()?;
                let timestamp = match timestamp {
                    Some(term) => match self.eval(term)? {
                        Value::Int(ms) => Some(Timestamp::from_millis(ms)),
                        other => return Err(mismatch("timestamp", "integer", &other)),
                    },
                    None => None,
                };
                Ok(Action::AddData {
                    target,
                    values,
                    timestamp,
                })
            }
            ActionTemplate::External { name, item, arguments } => Ok(Action::External {
                name: name.clone(),
                item_id: self.item(name, item)?,
                payload: arguments.iter().map(|a| self.eval(a)).collect::<FlowResult<_>>()?,
            }),
            ActionTemplate::Printout { parts } => {
                let mut text = String::new();
                for part in parts {
                    match self.eval(part)? {
                        Value::String(s) => text.push_str(&s),
                        other => text.push_str(&other.to_string()),
                    }
                }
                Ok(Action::Printout { text })
            }
        }
    }

    fn eval(&self, term: &Term) -> FlowResult<Value> {
        match term {
            Term::Var(name) => self.bindings.get(name).cloned().ok_or_else(|| {
                FlowError::internal(format!("rule '{}' fired without binding ?{name}", self.rule.name()))
            }),
            Term::Const(value) => Ok(value.clone()),
            Term::List(items) => items
                .iter()
                .map(|t| self.eval(t))
                .collect::<FlowResult<Vec<_>>>()
                .map(Value::List),
        }
    }

    fn item(&self, what: &str, term: &Term) -> FlowResult<ItemId> {
        match self.eval(term)? {
            Value::Item(id) => Ok(id),
            other => Err(mismatch(what, "item", &other)),
        }
    }
}

fn mismatch(property: &str, expected: &str, actual: &Value) -> FlowError {
    ValidationError::TypeMismatch {
        property: property.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
    .into()
}
