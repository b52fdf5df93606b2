//! Values held by item properties and facts.
//!
//! Values cover the primitive property kinds, references to other items,
//! structured JSON (geometry) and lists (multi-valued symbols, action payloads).

use serde::{Deserialize, Serialize};

use crate::ids::ItemId;

/// A property or fact value.
///
/// # Examples
///
/// ```
/// use kyroflow::Value;
///
/// let hr = Value::Int(72);
/// let name = Value::from("kit1");
///
/// assert!(hr.is_int());
/// assert_eq!(name.as_str(), Some("kit1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    String(String),
    Item(ItemId),
    Json(serde_json::Value),
    List(Vec<Value>),
    Null,
}

impl Value {
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_item(&self) -> bool {
        matches!(self, Self::Item(_))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_item(&self) -> Option<ItemId> {
        match self {
            Self::Item(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Real(_) => "real",
            Self::String(_) => "string",
            Self::Item(_) => "item",
            Self::Json(_) => "json",
            Self::List(_) => "list",
            Self::Null => "null",
        }
    }

    /// Stable textual encoding, used to key bindings.
    ///
    /// Two values have the same key exactly when they are equal.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        match self {
            Self::Bool(v) => format!("b:{v}"),
            Self::Int(v) => format!("i:{v}"),
            Self::Real(v) => format!("r:{}", v.to_bits()),
            Self::String(v) => format!("s:{}:{v}", v.len()),
            Self::Item(v) => format!("t:{v}"),
            Self::Json(v) => format!("j:{v}"),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::canonical_key).collect();
                format!("l:{}[{}]", items.len(), inner.join(","))
            }
            Self::Null => "n".to_string(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(true) => write!(f, "TRUE"),
            Self::Bool(false) => write!(f, "FALSE"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v:?}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Item(v) => write!(f, "item:{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::List(items) => {
                write!(f, "(create$")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
            Self::Null => write!(f, "nil"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<ItemId> for Value {
    fn from(v: ItemId) -> Self {
        Self::Item(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}
