//! Property schemas.
//!
//! A [`PropertySchema`] constrains the values a static or dynamic property may
//! hold. Two schemas are the same definition only if they are equal in every
//! field, defaults included; the type registry relies on this when it checks
//! that ancestors agree on a property.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geometry::{validate_geometry, GEOMETRY_SCHEMA_REF};
use crate::ids::TypeId;
use crate::value::Value;

/// Constraint attached to a property name.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertySchema {
    /// Whole number, optionally bounded (inclusive).
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<i64>,
    },

    /// Floating point number, optionally bounded (inclusive).
    Real {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
    },

    /// Free text.
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },

    /// One (or, with `multiple`, several) of a closed set of symbols.
    Symbol {
        values: BTreeSet<String>,
        #[serde(default)]
        multiple: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },

    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<bool>,
    },

    /// Structured JSON. A geometry `schema_ref` enables GeoJSON checks.
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<serde_json::Value>,
    },

    /// Reference to an item whose type is `item_type` or one of its descendants.
    Item {
        item_type: TypeId,
    },
}

impl PropertySchema {
    /// Unbounded integer.
    #[must_use]
    pub const fn integer() -> Self {
        Self::Integer {
            min: None,
            max: None,
            default: None,
        }
    }

    /// Integer bounded to `[min, max]`.
    #[must_use]
    pub const fn integer_range(min: i64, max: i64) -> Self {
        Self::Integer {
            min: Some(min),
            max: Some(max),
            default: None,
        }
    }

    /// Real bounded to `[min, max]`.
    #[must_use]
    pub const fn real_range(min: f64, max: f64) -> Self {
        Self::Real {
            min: Some(min),
            max: Some(max),
            default: None,
        }
    }

    #[must_use]
    pub const fn string() -> Self {
        Self::String { default: None }
    }

    #[must_use]
    pub const fn boolean() -> Self {
        Self::Boolean { default: None }
    }

    /// Single-valued symbol over `values`.
    #[must_use]
    pub fn symbol<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Symbol {
            values: values.into_iter().map(Into::into).collect(),
            multiple: false,
            default: None,
        }
    }

    /// JSON holding a GeoJSON geometry.
    #[must_use]
    pub fn geometry() -> Self {
        Self::Json {
            schema_ref: Some(GEOMETRY_SCHEMA_REF.to_string()),
            default: None,
        }
    }

    /// Reference to an item of `item_type`.
    #[must_use]
    pub const fn item(item_type: TypeId) -> Self {
        Self::Item { item_type }
    }

    /// Returns the schema with `default` set.
    ///
    /// # Errors
    ///
    /// Fails if the schema kind has no default (item references) or if the
    /// default has the wrong shape.
    pub fn with_default(self, property: &str, default: Value) -> Result<Self, ValidationError> {
        let mismatch = |expected: &str, actual: &Value| ValidationError::TypeMismatch {
            property: property.to_string(),
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        };
        let schema = match (self, default) {
            (Self::Integer { min, max, .. }, Value::Int(v)) => Self::Integer { min, max, default: Some(v) },
            (Self::Real { min, max, .. }, v @ (Value::Real(_) | Value::Int(_))) => Self::Real {
                min,
                max,
                default: v.as_real(),
            },
            (Self::String { .. }, Value::String(v)) => Self::String { default: Some(v) },
            (Self::Boolean { .. }, Value::Bool(v)) => Self::Boolean { default: Some(v) },
            (Self::Symbol { values, multiple, .. }, v) => Self::Symbol {
                values,
                multiple,
                default: Some(v),
            },
            (Self::Json { schema_ref, .. }, Value::Json(v)) => Self::Json {
                schema_ref,
                default: Some(v),
            },
            (schema, v) => return Err(mismatch(schema.kind(), &v)),
        };
        schema.check_definition(property)?;
        Ok(schema)
    }

    /// Short kind name: `integer`, `real`, `string`, `symbol`, `boolean`, `json`, `item`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Integer { .. } => "integer",
            Self::Real { .. } => "real",
            Self::String { .. } => "string",
            Self::Symbol { .. } => "symbol",
            Self::Boolean { .. } => "boolean",
            Self::Json { .. } => "json",
            Self::Item { .. } => "item",
        }
    }

    /// The referenced type, for `item` properties.
    #[must_use]
    pub const fn referenced_type(&self) -> Option<TypeId> {
        match self {
            Self::Item { item_type } => Some(*item_type),
            _ => None,
        }
    }

    /// True for `item` properties, which produce relation facts.
    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self, Self::Item { .. })
    }

    /// The declared default, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<Value> {
        match self {
            Self::Integer { default, .. } => default.map(Value::Int),
            Self::Real { default, .. } => default.map(Value::Real),
            Self::String { default } => default.clone().map(Value::String),
            Self::Symbol { default, .. } => default.clone(),
            Self::Boolean { default } => default.map(Value::Bool),
            Self::Json { default, .. } => default.clone().map(Value::Json),
            Self::Item { .. } => None,
        }
    }

    /// Checks that the definition itself is coherent (bounds ordered, symbol
    /// set non-empty, default valid).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSchema` or the default's validation error.
    pub fn check_definition(&self, property: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidSchema {
            property: property.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Integer { min: Some(lo), max: Some(hi), .. } if lo > hi => {
                return Err(invalid("min is greater than max"));
            }
            Self::Real { min, max, .. } => {
                if min.is_some_and(f64::is_nan) || max.is_some_and(f64::is_nan) {
                    return Err(invalid("bounds must not be NaN"));
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(invalid("min is greater than max"));
                    }
                }
            }
            Self::Symbol { values, .. } if values.is_empty() => {
                return Err(invalid("symbol set is empty"));
            }
            _ => {}
        }
        match self.default_value() {
            Some(default) => self.validate(property, &default),
            None => Ok(()),
        }
    }

    /// Validates `value` against this schema.
    ///
    /// For `item` properties only the shape is checked here; whether the
    /// referenced item exists and has a compatible type is checked by the
    /// caller, which owns the item store.
    ///
    /// # Errors
    ///
    /// Returns the first constraint the value violates.
    pub fn validate(&self, property: &str, value: &Value) -> Result<(), ValidationError> {
        let mismatch = || ValidationError::TypeMismatch {
            property: property.to_string(),
            expected: self.kind().to_string(),
            actual: value.type_name().to_string(),
        };

        match (self, value) {
            (Self::Integer { min, max, .. }, Value::Int(v)) => {
                let lo = min.unwrap_or(i64::MIN);
                let hi = max.unwrap_or(i64::MAX);
                if (lo..=hi).contains(v) {
                    Ok(())
                } else {
                    Err(ValidationError::IntegerOutOfRange {
                        property: property.to_string(),
                        value: *v,
                        min: lo,
                        max: hi,
                    })
                }
            }
            (Self::Real { min, max, .. }, Value::Real(_) | Value::Int(_)) => {
                let v = value.as_real().unwrap_or(f64::NAN);
                let lo = min.unwrap_or(f64::NEG_INFINITY);
                let hi = max.unwrap_or(f64::INFINITY);
                if v >= lo && v <= hi {
                    Ok(())
                } else {
                    Err(ValidationError::RealOutOfRange {
                        property: property.to_string(),
                        value: v,
                        min: lo,
                        max: hi,
                    })
                }
            }
            (Self::String { .. }, Value::String(_)) | (Self::Boolean { .. }, Value::Bool(_)) => Ok(()),
            (Self::Symbol { values, multiple: false, .. }, Value::String(s)) => check_symbol(property, values, s),
            (Self::Symbol { values, multiple: true, .. }, Value::List(items)) => items.iter().try_for_each(|item| {
                item.as_str()
                    .ok_or_else(mismatch)
                    .and_then(|s| check_symbol(property, values, s))
            }),
            (Self::Json { schema_ref, .. }, Value::Json(v)) => {
                if schema_ref.as_deref() == Some(GEOMETRY_SCHEMA_REF) {
                    validate_geometry(v).map_err(|reason| ValidationError::InvalidGeometry {
                        property: property.to_string(),
                        reason,
                    })
                } else {
                    Ok(())
                }
            }
            (Self::Item { .. }, Value::Item(_)) => Ok(()),
            _ => Err(mismatch()),
        }
    }
}

fn check_symbol(property: &str, values: &BTreeSet<String>, symbol: &str) -> Result<(), ValidationError> {
    if values.contains(symbol) {
        Ok(())
    } else {
        Err(ValidationError::SymbolNotAllowed {
            property: property.to_string(),
            value: symbol.to_string(),
            allowed: values.iter().cloned().collect(),
        })
    }
}

impl fmt::Display for PropertySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bound<T: fmt::Display>(b: Option<&T>, open: &str) -> String {
            b.map_or_else(|| open.to_string(), ToString::to_string)
        }
        match self {
            Self::Integer { min, max, .. } => {
                write!(f, "integer[{}, {}]", bound(min.as_ref(), "-inf"), bound(max.as_ref(), "inf"))
            }
            Self::Real { min, max, .. } => {
                write!(f, "real[{}, {}]", bound(min.as_ref(), "-inf"), bound(max.as_ref(), "inf"))
            }
            Self::String { .. } => write!(f, "string"),
            Self::Symbol { values, multiple, .. } => {
                let set: Vec<&str> = values.iter().map(String::as_str).collect();
                let suffix = if *multiple { "*" } else { "" };
                write!(f, "symbol{{{}}}{suffix}", set.join(", "))
            }
            Self::Boolean { .. } => write!(f, "boolean"),
            Self::Json { schema_ref, .. } => match schema_ref {
                Some(r) => write!(f, "json<{r}>"),
                None => write!(f, "json"),
            },
            Self::Item { item_type } => write!(f, "item<{item_type}>"),
        }
    }
}
