use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{DispatchId, ItemId};
use crate::value::Value;

/// One external action requested by a fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCall {
    pub id: DispatchId,
    /// Name of the rule that fired.
    pub rule: String,
    /// Handler name, e.g. `compute_response`.
    pub action: String,
    pub item_id: ItemId,
    pub payload: Vec<Value>,
    pub requested_at: DateTime<Utc>,
}

/// Failure reported by a handler. Logged and counted, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes external calls of one action name.
///
/// Handlers run on the dispatcher's worker thread, one call at a time.
pub trait ActionHandler: Send + Sync {
    /// Handles one call.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher and counted as a failure.
    fn handle(&self, call: &ExternalCall) -> Result<(), HandlerError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ExternalCall) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, call: &ExternalCall) -> Result<(), HandlerError> {
        self(call)
    }
}
