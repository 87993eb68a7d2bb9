//! # clusterdrive-remote
//!
//! Remote execution for clusterdrive test harnesses.
//!
//! ## Features
//!
//! - **Connection Pool**: one SSH connection per host, probed before reuse
//! - **Command Runner**: exit status decides success, stderr never does
//! - **Retry Engine**: bounded attempts, backoff, one overall deadline
//! - **Service Actions**: systemd verbs and certificate rotation per node
//! - **Process Watcher**: wait for a snapshot of processes to exit
//!
//! ## Example
//!
//! ```ignore
//! use clusterdrive_remote::{CommandRunner, ConnectionPool, SshCredentials, SshDialer};
//!
//! let dialer = SshDialer::new(SshCredentials::new("ubuntu", "/home/ci/.ssh/id_ed25519"));
//! let pool = Arc::new(ConnectionPool::new(Arc::new(dialer)));
//! let runner = CommandRunner::new(pool);
//!
//! let uptime = runner.run("uptime", "10.0.0.4").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pool;
pub mod process;
pub mod retry;
pub mod runner;
pub mod service;
pub mod transport;

pub use error::{ConnectionError, RemoteError, Result};
pub use pool::{ConnectionPool, PROBE_TIMEOUT};
pub use process::ProcessWatcher;
pub use retry::{with_retry, RetryError};
pub use runner::{Capture, CommandRunner, RemoteCommand};
pub use service::{ServiceExecutor, DEFAULT_SERVICE_ATTEMPTS, DEFAULT_SERVICE_DELAY};
pub use transport::{
    CommandOutput, Connection, Dialer, MockDialer, MockReply, SshCredentials, SshDialer,
};
