//! Rule AST and its textual form.
//!
//! The textual form is CLIPS-like:
//!
//! ```text
//! (defrule rppg_rule
//!     (rPPG_has_HR (item_id ?x) (HR ?hr) (timestamp ?t))
//!     (Sensor_kit (item_id ?x) (kit ?kit))
//!     (Kit_has_user (item_id ?kit) (user ?user))
//!     =>
//!     (add_data ?user (create$ HR) (create$ ?hr) ?t))
//! ```
//!
//! `Display` on [`RuleDef`] prints this form; [`crate::rule::parse_rule`]
//! reads it back into an equal AST.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Right-hand side of a pattern field or an action argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Term {
    /// `?name`; stored without the `?`.
    Var(String),
    Const(Value),
    /// `(create$ ...)`
    List(Vec<Term>),
}

impl Term {
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    /// Variables mentioned by this term, in order of appearance.
    pub fn variables(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Self::Var(name) => Box::new(std::iter::once(name.as_str())),
            Self::Const(_) => Box::new(std::iter::empty()),
            Self::List(items) => Box::new(items.iter().flat_map(Term::variables)),
        }
    }
}

/// `(field term)` inside a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
    pub field: String,
    pub term: Term,
}

/// `(Predicate (field term)...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactPattern {
    pub predicate: String,
    pub fields: Vec<FieldConstraint>,
}

impl FactPattern {
    #[must_use]
    pub fn new(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>, term: Term) -> Self {
        self.fields.push(FieldConstraint {
            field: field.into(),
            term,
        });
        self
    }

    /// Term constraining `field`, if the pattern mentions it.
    #[must_use]
    pub fn term(&self, field: &str) -> Option<&Term> {
        self.fields.iter().find(|f| f.field == field).map(|f| &f.term)
    }

    /// Patterns that constrain `timestamp` join on co-occurring samples.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        self.term("timestamp").is_some()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().flat_map(|f| f.term.variables())
    }
}

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionTemplate {
    /// Writes `values[i]` to dynamic property `properties[i]` of `target`.
    AddData {
        target: Term,
        properties: Vec<String>,
        values: Vec<Term>,
        /// Defaults to the time the action runs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Term>,
    },

    /// Hands `(item, arguments)` to the named external handler.
    External {
        name: String,
        item: Term,
        #[serde(default)]
        arguments: Vec<Term>,
    },

    /// Logs the concatenated parts.
    Printout { parts: Vec<Term> },
}

impl ActionTemplate {
    /// Variables the action reads.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::AddData {
                target,
                values,
                timestamp,
                ..
            } => target
                .variables()
                .chain(values.iter().flat_map(Term::variables))
                .chain(timestamp.iter().flat_map(Term::variables))
                .collect(),
            Self::External { item, arguments, .. } => item
                .variables()
                .chain(arguments.iter().flat_map(Term::variables))
                .collect(),
            Self::Printout { parts } => parts.iter().flat_map(Term::variables).collect(),
        }
    }
}

/// A rule as written: an ordered conjunction of patterns and an ordered list
/// of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    pub patterns: Vec<FactPattern>,
    pub actions: Vec<ActionTemplate>,
}

impl RuleDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn pattern(mut self, pattern: FactPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    #[must_use]
    pub fn action(mut self, action: ActionTemplate) -> Self {
        self.actions.push(action);
        self
    }

    /// Every variable bound by the left-hand side.
    #[must_use]
    pub fn bound_variables(&self) -> BTreeSet<&str> {
        self.patterns.iter().flat_map(FactPattern::variables).collect()
    }
}

/// Words with a fixed meaning in the textual form; constants spelled like them are quoted.
pub(crate) const RESERVED_WORDS: [&str; 7] = ["TRUE", "FALSE", "nil", "create$", "=>", "crlf", "defrule"];

pub(crate) fn is_bare_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '$'))
        && !RESERVED_WORDS.contains(&s)
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) if is_bare_symbol(s) => write!(f, "{s}"),
        Value::String(s) => write!(f, "{s:?}"),
        Value::Item(id) => write!(f, "\"{id}\""),
        Value::Json(json) => write!(f, "{:?}", json.to_string()),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "?{name}"),
            Self::Const(value) => write_value(f, value),
            Self::List(items) => {
                write!(f, "(create$")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for FactPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.predicate)?;
        for c in &self.fields {
            write!(f, " ({} {})", c.field, c.term)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for ActionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddData {
                target,
                properties,
                values,
                timestamp,
            } => {
                write!(f, "(add_data {target} (create$")?;
                for p in properties {
                    write!(f, " {p}")?;
                }
                write!(f, ") (create$")?;
                for v in values {
                    write!(f, " {v}")?;
                }
                write!(f, ")")?;
                if let Some(ts) = timestamp {
                    write!(f, " {ts}")?;
                }
                write!(f, ")")
            }
            Self::External { name, item, arguments } => {
                write!(f, "({name} {item}")?;
                for a in arguments {
                    write!(f, " {a}")?;
                }
                write!(f, ")")
            }
            Self::Printout { parts } => {
                write!(f, "(printout t")?;
                for p in parts {
                    match p {
                        // Printout strings are always quoted so bare words stay literal.
                        Term::Const(Value::String(s)) => write!(f, " {s:?}")?,
                        other => write!(f, " {other}")?,
                    }
                }
                write!(f, " crlf)")
            }
        }
    }
}

impl fmt::Display for RuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(defrule {}", self.name)?;
        for p in &self.patterns {
            write!(f, " {p}")?;
        }
        write!(f, " =>")?;
        for a in &self.actions {
            write!(f, " {a}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_patterns_constrain_timestamp() {
        let hr = FactPattern::new("rPPG_has_HR")
            .field("item_id", Term::var("x"))
            .field("HR", Term::var("hr"))
            .field("timestamp", Term::var("t"));
        let kit = FactPattern::new("Sensor_kit")
            .field("item_id", Term::var("x"))
            .field("kit", Term::var("kit"));
        assert!(hr.is_temporal());
        assert!(!kit.is_temporal());
        assert_eq!(hr.variables().collect::<Vec<_>>(), vec!["x", "hr", "t"]);
    }

    #[test]
    fn prints_textual_form() {
        let rule = RuleDef::new("user_name")
            .pattern(
                FactPattern::new("User_name")
                    .field("item_id", Term::var("user"))
                    .field("name", Term::var("name")),
            )
            .action(ActionTemplate::Printout {
                parts: vec![Term::constant("User: "), Term::var("user")],
            })
            .action(ActionTemplate::External {
                name: "trigger_intent".to_string(),
                item: Term::var("user"),
                arguments: vec![
                    Term::constant("set_name"),
                    Term::List(vec![Term::constant("name")]),
                    Term::List(vec![Term::var("name")]),
                ],
            });

        assert_eq!(
            rule.to_string(),
            "(defrule user_name (User_name (item_id ?user) (name ?name)) => \
             (printout t \"User: \" ?user crlf) \
             (trigger_intent ?user set_name (create$ name) (create$ ?name)))"
        );
    }

    #[test]
    fn constants_that_look_like_keywords_are_quoted() {
        assert_eq!(Term::constant("TRUE").to_string(), "\"TRUE\"");
        assert_eq!(Term::constant(true).to_string(), "TRUE");
        assert_eq!(Term::constant("two words").to_string(), "\"two words\"");
        assert_eq!(Term::Const(Value::Null).to_string(), "nil");
    }

    #[test]
    fn action_variables_cover_every_argument() {
        let action = ActionTemplate::AddData {
            target: Term::var("user"),
            properties: vec!["HR".to_string()],
            values: vec![Term::var("hr")],
            timestamp: Some(Term::var("t")),
        };
        assert_eq!(action.variables(), vec!["user", "hr", "t"]);
    }
}
