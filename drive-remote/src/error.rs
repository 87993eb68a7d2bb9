//! Error types for clusterdrive-remote.

use crate::retry::RetryError;
use clusterdrive_core::{Classify, ValidationError};
use std::path::PathBuf;

/// Failures establishing or using a connection.
///
/// Key and credential errors are fatal. The pool never retries any of them;
/// retrying is left to callers.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Private key could not be read.
    #[error("failed to read private key {path}: {source}")]
    KeyRead {
        /// Key path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Private key file does not contain a private key.
    #[error("{path} does not contain a private key")]
    KeyParse {
        /// Key path.
        path: PathBuf,
    },

    /// A required credential was not configured.
    #[error("missing ssh credential: {0}")]
    MissingCredentials(&'static str),

    /// Dial or authentication failed.
    #[error("failed to connect to {host}: {reason}")]
    Dial {
        /// Target host.
        host: String,
        /// Reason reported by the SSH client.
        reason: String,
    },

    /// The session broke while running a command.
    #[error("session to {host} failed: {reason}")]
    Session {
        /// Target host.
        host: String,
        /// Reason reported by the SSH client.
        reason: String,
    },

    /// The connection was already closed.
    #[error("connection to {host} is closed")]
    Closed {
        /// Target host.
        host: String,
    },
}

impl Classify for ConnectionError {
    fn error_text(&self) -> String {
        match self {
            ConnectionError::Dial { reason, .. } | ConnectionError::Session { reason, .. } => {
                reason.clone()
            }
            _ => self.to_string(),
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::KeyRead { .. }
                | ConnectionError::KeyParse { .. }
                | ConnectionError::MissingCredentials(_)
        )
    }
}

/// Main error type for remote operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Request rejected before anything ran.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Connection could not be acquired or broke.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Command ran and exited non-zero.
    #[error("command `{command}` failed on {host} (exit status {}): {}", exit_label(.exit_status), .stderr.trim())]
    CommandFailed {
        /// The command as sent.
        command: String,
        /// Target host.
        host: String,
        /// Exit status, `None` if the remote process was killed by a signal.
        exit_status: Option<i32>,
        /// Standard error output.
        stderr: String,
    },

    /// Snapshotted processes have not exited yet.
    #[error("processes still running on {host}: {pids:?}")]
    StillRunning {
        /// Target host.
        host: String,
        /// Ids still alive.
        pids: Vec<u32>,
    },

    /// A retry sequence ended without success.
    #[error(transparent)]
    Retry(Box<RetryError<RemoteError>>),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl From<RetryError<RemoteError>> for RemoteError {
    fn from(err: RetryError<RemoteError>) -> Self {
        RemoteError::Retry(Box::new(err))
    }
}

impl RemoteError {
    /// Whether this is (or wraps) a retry deadline being exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Retry(inner) if inner.is_timeout())
    }
}

impl Classify for RemoteError {
    /// Only what the failure reported: stderr or the transport reason, never
    /// the command line or host.
    fn error_text(&self) -> String {
        match self {
            RemoteError::Connection(e) => e.error_text(),
            RemoteError::CommandFailed { stderr, .. } => stderr.clone(),
            RemoteError::Retry(inner) => match inner.last() {
                Some(last) => last.error_text(),
                None => inner.to_string(),
            },
            _ => self.to_string(),
        }
    }

    fn exit_status(&self) -> Option<i32> {
        match self {
            RemoteError::CommandFailed { exit_status, .. } => *exit_status,
            RemoteError::Retry(inner) => inner.last().and_then(Classify::exit_status),
            _ => None,
        }
    }

    fn is_fatal(&self) -> bool {
        match self {
            RemoteError::Validation(_) => true,
            RemoteError::Connection(e) => e.is_fatal(),
            RemoteError::Retry(inner) => inner.last().is_some_and(Classify::is_fatal),
            _ => false,
        }
    }
}

/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;
    use clusterdrive_core::{Classification, RetryConfig};

    #[test]
    fn command_text_does_not_drive_classification() {
        let err = RemoteError::CommandFailed {
            command: "grep -c 'not found' /var/log/k3s.log".into(),
            host: "10.0.0.1:22".into(),
            exit_status: Some(255),
            stderr: "Connection reset by peer".into(),
        };
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.error_text(), "Connection reset by peer");
        assert_eq!(
            RetryConfig::default().classify(&err),
            Classification::RetryableText("connection reset".into())
        );
    }

    #[test]
    fn host_name_does_not_drive_classification() {
        let err = RemoteError::from(ConnectionError::Dial {
            host: "timed-out-lab.example:22".into(),
            reason: "Permission denied (publickey)".into(),
        });
        assert_eq!(
            RetryConfig::default().classify(&err),
            Classification::NonRetryableText("permission denied".into())
        );
    }

    #[test]
    fn silent_stderr_falls_back_to_exit_status() {
        let err = RemoteError::CommandFailed {
            command: "cat /etc/not-found-marker".into(),
            host: "10.0.0.1:22".into(),
            exit_status: Some(255),
            stderr: String::new(),
        };
        assert_eq!(
            RetryConfig::default().classify(&err),
            Classification::RetryableExit(255)
        );
    }
}
