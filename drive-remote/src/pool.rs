//! Connection pool: one cached remote-shell connection per host.
//!
//! `acquire` returns the cached connection after a trivial probe, or dials
//! a fresh one when there is none or the probe fails. The cache lock covers
//! only map reads and writes, never a dial or a command, so callers for
//! different hosts never wait on each other.
//!
//! The probe and the close of a stale connection are each bounded by
//! [`PROBE_TIMEOUT`]; a session that stops answering counts as dead.
//!
//! Two callers racing to dial the same host may both succeed; the last one
//! to finish wins the cache slot. The displaced connection stays usable by
//! whoever holds it and is closed when its last handle is dropped.

use crate::error::ConnectionError;
use crate::transport::{Connection, Dialer};
use clusterdrive_core::HostAddr;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Health probe sent to a cached connection before reuse.
pub const PROBE_COMMAND: &str = "echo clusterdrive-probe";

/// Expected probe output.
pub const PROBE_TOKEN: &str = "clusterdrive-probe";

/// Default bound on the health probe and on closing a stale connection.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Caches one live connection per `host:port`.
pub struct ConnectionPool {
    dialer: Arc<dyn Dialer>,
    connections: Mutex<HashMap<String, Arc<dyn Connection>>>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("cached", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create an empty pool over `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            connections: Mutex::new(HashMap::new()),
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Builder: bound the health probe by `timeout` instead of [`PROBE_TIMEOUT`].
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a healthy connection to `host`, dialing if needed.
    ///
    /// Dial and authentication failures are returned as-is; the pool never
    /// retries them.
    pub async fn acquire(&self, host: &HostAddr) -> Result<Arc<dyn Connection>, ConnectionError> {
        let key = host.to_string();
        let cached = self.cache().get(&key).cloned();

        if let Some(conn) = cached {
            let outcome = tokio::time::timeout(self.probe_timeout, probe(conn.as_ref()))
                .await
                .unwrap_or_else(|_| {
                    Err(format!("no probe reply within {:?}", self.probe_timeout))
                });
            match outcome {
                Ok(()) => return Ok(conn),
                Err(reason) => {
                    tracing::info!("Evicting stale connection to {}: {}", key, reason);
                    self.remove_if_same(&key, &conn);
                    if tokio::time::timeout(self.probe_timeout, shutdown(conn))
                        .await
                        .is_err()
                    {
                        tracing::debug!("Gave up closing stale connection to {}", key);
                    }
                }
            }
        }

        tracing::debug!("Dialing {}", key);
        let conn = self.dialer.dial(host).await?;
        let displaced = self.cache().insert(key.clone(), Arc::clone(&conn));
        if displaced.is_some() {
            tracing::debug!("Replaced concurrently dialed connection to {}", key);
        }
        Ok(conn)
    }

    /// Drop `host` from the cache and close its connection.
    ///
    /// Returns whether a connection was cached.
    pub async fn evict(&self, host: &HostAddr) -> bool {
        let removed = self.cache().remove(&host.to_string());
        match removed {
            Some(conn) => {
                shutdown(conn).await;
                true
            }
            None => false,
        }
    }

    /// Close every cached connection and empty the cache.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.cache().drain().map(|(_, c)| c).collect();
        if !drained.is_empty() {
            tracing::debug!("Closing {} pooled connections", drained.len());
        }
        for conn in drained {
            shutdown(conn).await;
        }
    }

    /// Whether a connection to `host` is cached.
    pub fn contains(&self, host: &HostAddr) -> bool {
        self.cache().contains_key(&host.to_string())
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.cache().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `key` only if it still maps to `conn`, so a connection
    /// another caller just cached is left alone.
    fn remove_if_same(&self, key: &str, conn: &Arc<dyn Connection>) {
        let mut cache = self.cache();
        if cache
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, conn))
        {
            cache.remove(key);
        }
    }
}

async fn probe(conn: &dyn Connection) -> Result<(), String> {
    match conn.exec(PROBE_COMMAND).await {
        Ok(out) if out.success() && out.stdout.trim() == PROBE_TOKEN => Ok(()),
        Ok(out) => Err(format!(
            "probe returned exit status {:?}: {}",
            out.exit_status,
            out.stdout.trim()
        )),
        Err(e) => Err(e.to_string()),
    }
}

async fn shutdown(conn: Arc<dyn Connection>) {
    if let Err(e) = conn.close().await {
        tracing::debug!("Error closing connection to {}: {}", conn.host(), e);
    }
}
