//! # clusterdrive-core
//!
//! Pure logic for clusterdrive. No I/O, no async, instant tests.
//!
//! ## Modules
//!
//! - `retry`: retry configuration, backoff schedule, failure classification
//! - `service`: service actions, unit-name table, systemd command builder
//! - `process`: process snapshot queries and parsing
//! - `readiness`: node/pod readiness state machine
//! - `host`: host addressing and shell quoting
//!
//! The async drivers that execute these decisions live in
//! `clusterdrive-remote` and `clusterdrive-cluster`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod host;
pub mod process;
pub mod readiness;
pub mod retry;
pub mod service;

pub use error::{ValidationError, ValidationResult};
pub use host::{shell_quote, HostAddr, DEFAULT_SSH_PORT};
pub use process::{snapshot_command, ProcessSnapshot, PGREP_NO_MATCH};
pub use readiness::{
    CniRule, Directive, Entity, ReadinessInput, ReadinessPhase, ReadinessSummary,
    ReadinessTracker, Threshold, DEFAULT_CNI_OPERATOR_PREFIX,
};
pub use retry::{Classification, Classify, Delays, RetryConfig};
pub use service::{Action, NodeType, ServiceAction, ServiceCommand, UnitTable};

