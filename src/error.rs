//! Error types for KyroFlow.
//!
//! All errors in KyroFlow are strongly typed using thiserror.
//! Callers can match on the exact failure (a schema conflict, an unknown item,
//! a rule that does not compile) instead of parsing messages.

use thiserror::Error;

use crate::ids::{ItemId, TypeId};
use crate::storage::StorageError;

/// Validation errors raised when a value or payload violates a schema.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Property '{property}': integer {value} is out of range [{min}, {max}]")]
    IntegerOutOfRange {
        property: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Property '{property}': real {value} is out of range [{min}, {max}]")]
    RealOutOfRange {
        property: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Property '{property}': symbol '{value}' is not one of {allowed:?}")]
    SymbolNotAllowed {
        property: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Property '{property}': expected {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Required static property '{property}' is missing")]
    MissingStaticProperty {
        property: String,
    },

    #[error("Static property '{property}' is not declared by the type")]
    UnexpectedStaticProperty {
        property: String,
    },

    #[error("Property '{property}': invalid geometry: {reason}")]
    InvalidGeometry {
        property: String,
        reason: String,
    },

    #[error("Property '{property}': item {item} has type {actual}, which does not descend from {expected}")]
    WrongItemType {
        property: String,
        item: ItemId,
        expected: TypeId,
        actual: TypeId,
    },

    #[error("Property '{property}': referenced item {item} does not exist")]
    DanglingItemReference {
        property: String,
        item: ItemId,
    },

    #[error("Name '{name}' is already in use")]
    DuplicateName {
        name: String,
    },

    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Action '{action}' expects {expected} values, got {actual}")]
    ArityMismatch {
        action: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid property schema for '{property}': {reason}")]
    InvalidSchema {
        property: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors produced while resolving the inheritance DAG.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Schema conflict on property '{property}': {first} vs {second}")]
    SchemaConflict {
        property: String,
        first: String,
        second: String,
    },

    #[error("Cyclic inheritance: {}", path.join(" -> "))]
    CyclicInheritance {
        path: Vec<String>,
    },

    #[error("Type name '{name}' is already registered")]
    DuplicateTypeName {
        name: String,
    },
}

/// Execution errors: references to things that do not exist, or runtime failures.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Type not found: {reference}")]
    UnknownType {
        reference: String,
    },

    #[error("Item not found: {reference}")]
    UnknownItem {
        reference: String,
    },

    #[error("Property '{property}' is not a dynamic property of type '{type_name}'")]
    UnknownProperty {
        type_name: String,
        property: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Rule chaining exceeded the maximum depth of {max_depth}")]
    ChainDepthExceeded {
        max_depth: usize,
    },
}

/// Errors raised when a rule cannot be compiled into a join plan.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleCompileError {
    #[error("Rule '{rule}' references undefined predicate '{predicate}'")]
    UnknownPredicate {
        rule: String,
        predicate: String,
    },

    #[error("Rule '{rule}': variable ?{variable} is used by an action but never bound")]
    UnboundVariable {
        rule: String,
        variable: String,
    },

    #[error("Rule '{rule}' has no patterns")]
    EmptyRule {
        rule: String,
    },

    #[error("Rule '{rule}': field '{field}' is not valid for predicate '{predicate}'")]
    UnknownField {
        rule: String,
        predicate: String,
        field: String,
    },

    #[error("Unknown action '{action}'")]
    UnknownAction {
        action: String,
    },

    #[error("Syntax error at {position}: {message}")]
    Syntax {
        position: usize,
        message: String,
    },
}

/// Top-level error type for KyroFlow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Rule compile error: {0}")]
    RuleCompile(#[from] RuleCompileError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FlowError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_type(reference: impl ToString) -> Self {
        Self::Execution(ExecutionError::UnknownType {
            reference: reference.to_string(),
        })
    }

    pub(crate) fn unknown_item(reference: impl ToString) -> Self {
        Self::Execution(ExecutionError::UnknownItem {
            reference: reference.to_string(),
        })
    }

    pub(crate) fn storage(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: err.to_string(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a schema conflict.
    #[must_use]
    pub const fn is_schema_conflict(&self) -> bool {
        matches!(self, Self::Schema(SchemaError::SchemaConflict { .. }))
    }

    /// Returns true if the parents of a type form a cycle.
    #[must_use]
    pub const fn is_cyclic_inheritance(&self) -> bool {
        matches!(self, Self::Schema(SchemaError::CyclicInheritance { .. }))
    }

    /// Returns true if the error refers to a type, item or property that does not exist.
    #[must_use]
    pub const fn is_unknown_reference(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::UnknownType { .. }
                    | ExecutionError::UnknownItem { .. }
                    | ExecutionError::UnknownProperty { .. }
            )
        )
    }

    /// Returns true if this is a rule compilation error.
    #[must_use]
    pub const fn is_rule_compile(&self) -> bool {
        matches!(self, Self::RuleCompile(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<StorageError> for FlowError {
    fn from(err: StorageError) -> Self {
        Self::storage(err)
    }
}

/// Result type alias for KyroFlow operations.
pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_out_of_range_message() {
        let err = ValidationError::IntegerOutOfRange {
            property: "HR".to_string(),
            value: 300,
            min: 48,
            max: 180,
        };
        let msg = format!("{err}");
        assert!(msg.contains("HR"));
        assert!(msg.contains("300"));
        assert!(msg.contains("[48, 180]"));
    }

    #[test]
    fn test_cyclic_inheritance_renders_path() {
        let err = SchemaError::CyclicInheritance {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(format!("{err}"), "Cyclic inheritance: A -> B -> A");
    }

    #[test]
    fn test_flow_error_classifiers() {
        let err: FlowError = SchemaError::SchemaConflict {
            property: "HR".to_string(),
            first: "integer[48, 180]".to_string(),
            second: "integer[40, 220]".to_string(),
        }
        .into();
        assert!(err.is_schema_conflict());
        assert!(!err.is_validation());

        let err: FlowError = ValidationError::EmptyName.into();
        assert!(err.is_validation());

        let err = FlowError::unknown_item("kit1");
        assert!(err.is_unknown_reference());

        let err: FlowError = RuleCompileError::EmptyRule {
            rule: "r".to_string(),
        }
        .into();
        assert!(err.is_rule_compile());
    }

    #[test]
    fn test_storage_error_converts_to_execution() {
        let err: FlowError = StorageError::BackendError("poisoned".to_string()).into();
        let msg = format!("{err}");
        assert!(msg.contains("Storage error"));
        assert!(msg.contains("poisoned"));
    }

    #[test]
    fn test_internal_error() {
        let err = FlowError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
