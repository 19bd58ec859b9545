//! Action surface for the lens code-intelligence bridge.
//!
//! [`ActionRequest`] is the uniform "action name plus flat parameter bag"
//! shape callers send; [`Router`] validates it against the catalog, drives
//! the language server connection, and always answers with a
//! [`ResultEnvelope`](lens_types::ResultEnvelope).

mod catalog;
mod router;

pub use catalog::{Action, ActionRequest, Invocation, ValidationError};
pub use router::Router;
