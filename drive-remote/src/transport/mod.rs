//! Remote-shell transport abstraction.
//!
//! The pool only sees two traits:
//! - [`Dialer`] opens an authenticated connection to a host
//! - [`Connection`] runs opaque shell commands over it and can be closed
//!
//! [`SshDialer`] delegates to the system OpenSSH client with multiplexed
//! control sessions; [`MockDialer`] scripts replies for tests.
//!
//! # Example
//!
//! ```ignore
//! let dialer = MockDialer::new();
//! dialer.respond("hostname", MockReply::ok("node-1"));
//! let pool = ConnectionPool::new(Arc::new(dialer));
//! ```

mod mock;
mod ssh;

pub use self::mock::{MockDialer, MockReply};
pub use self::ssh::{SshCredentials, SshDialer, DEFAULT_CONNECT_TIMEOUT};

use crate::error::ConnectionError;
use async_trait::async_trait;
use clusterdrive_core::HostAddr;
use std::fmt;
use std::sync::Arc;

/// Raw result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit status, `None` if the process was killed by a signal.
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// A live, authenticated remote-shell connection.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// The `host:port` this connection belongs to.
    fn host(&self) -> &str;

    /// Run a shell command, capturing stdout, stderr and exit status.
    ///
    /// A non-zero exit is not an error here; only transport failures are.
    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError>;

    /// Close the connection. Later `exec` calls fail with `Closed`.
    async fn close(&self) -> Result<(), ConnectionError>;
}

/// Opens connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial and authenticate against `host`.
    async fn dial(&self, host: &HostAddr) -> Result<Arc<dyn Connection>, ConnectionError>;
}
