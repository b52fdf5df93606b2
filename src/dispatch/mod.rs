//! Asynchronous execution of external rule actions.

mod dispatcher;
mod handler;

pub use dispatcher::{ActionDispatcher, DispatchStats, BUILTIN_ACTIONS};
pub use handler::{ActionHandler, ExternalCall, HandlerError};
