//! Validation errors for clusterdrive.
//!
//! Validation failures are always fatal: they are surfaced immediately and
//! never retried.

use crate::retry::Classify;
use thiserror::Error;

/// Errors raised when a request is malformed before anything runs remotely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Service action outside the supported set.
    #[error("unsupported service action '{0}' (expected one of: stop, start, restart, status, enable, rotate)")]
    UnknownAction(String),

    /// Node type other than `server` or `agent`.
    #[error("unsupported node type '{0}' (expected 'server' or 'agent')")]
    UnknownNodeType(String),

    /// No unit is registered for the product/node type pair.
    #[error("no service unit registered for product '{product}' with node type '{node_type}'")]
    UnknownUnit {
        /// Product name as requested.
        product: String,
        /// Node type as requested.
        node_type: String,
    },

    /// A required argument was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Host address could not be parsed.
    #[error("invalid host address '{address}': {reason}")]
    InvalidHost {
        /// The address as given.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl Classify for ValidationError {
    fn is_fatal(&self) -> bool {
        true
    }
}

/// Result type alias for validation.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
