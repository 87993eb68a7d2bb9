//! Mock transport for testing.
//!
//! Allows scripting replies per command fragment, failing dials and
//! probes, and inspecting which commands were executed on which host.

use super::{CommandOutput, Connection, Dialer};
use crate::error::ConnectionError;
use crate::pool::{PROBE_COMMAND, PROBE_TOKEN};
use async_trait::async_trait;
use clusterdrive_core::HostAddr;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted reply for a mock command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// The command ran and produced this output.
    Output(CommandOutput),
    /// The session broke while running the command.
    Disconnect(String),
}

impl MockReply {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        MockReply::Output(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        })
    }

    /// Exit 0 with output on both streams.
    pub fn ok_with_stderr(stdout: &str, stderr: &str) -> Self {
        MockReply::Output(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status: Some(0),
        })
    }

    /// Non-zero exit with the given stderr.
    pub fn fail(exit_status: i32, stderr: &str) -> Self {
        MockReply::Output(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_status: Some(exit_status),
        })
    }

    /// Transport failure.
    pub fn disconnect(reason: &str) -> Self {
        MockReply::Disconnect(reason.to_string())
    }
}

/// Mock dialer for testing.
///
/// Replies are matched by substring against the command, first script
/// wins. Each script is a queue; its last reply repeats forever. Commands
/// without a script exit 0 with empty output.
#[derive(Debug, Default, Clone)]
pub struct MockDialer {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    dials: usize,
    closes: usize,
    fail_next_dial: Option<String>,
    failing_probes: usize,
    executed: Vec<(String, String)>,
    scripts: Vec<(String, VecDeque<MockReply>)>,
}

impl MockDialer {
    /// Create a new mock dialer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for commands containing `fragment`.
    pub fn respond(&self, fragment: &str, reply: MockReply) {
        let mut inner = self.inner.lock().unwrap();
        match inner.scripts.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, queue)) => queue.push_back(reply),
            None => inner
                .scripts
                .push((fragment.to_string(), VecDeque::from([reply]))),
        }
    }

    /// Cause the next `dial()` to fail with the given reason.
    pub fn fail_next_dial(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_dial = Some(reason.to_string());
    }

    /// Cause the next health probe to fail.
    pub fn fail_next_probe(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_probes += 1;
    }

    /// Number of successful dials.
    pub fn dial_count(&self) -> usize {
        self.inner.lock().unwrap().dials
    }

    /// Number of connections closed.
    pub fn close_count(&self) -> usize {
        self.inner.lock().unwrap().closes
    }

    /// Commands executed, probes excluded, in order.
    pub fn commands(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.executed.iter().map(|(_, c)| c.clone()).collect()
    }

    /// Commands executed on `host` (as `host:port`), probes excluded.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .executed
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, host: &HostAddr) -> Result<Arc<dyn Connection>, ConnectionError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(reason) = inner.fail_next_dial.take() {
            return Err(ConnectionError::Dial {
                host: host.to_string(),
                reason,
            });
        }

        inner.dials += 1;
        Ok(Arc::new(MockConnection {
            host: host.to_string(),
            state: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct MockConnection {
    host: String,
    state: Arc<Mutex<MockState>>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed {
                host: self.host.clone(),
            });
        }

        let mut inner = self.state.lock().unwrap();

        if command == PROBE_COMMAND {
            if inner.failing_probes > 0 {
                inner.failing_probes -= 1;
                return Err(ConnectionError::Session {
                    host: self.host.clone(),
                    reason: "mock probe failure".to_string(),
                });
            }
            return Ok(CommandOutput {
                stdout: format!("{}\n", PROBE_TOKEN),
                stderr: String::new(),
                exit_status: Some(0),
            });
        }

        inner
            .executed
            .push((self.host.clone(), command.to_string()));

        let reply = inner
            .scripts
            .iter_mut()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });

        match reply {
            Some(MockReply::Output(output)) => Ok(output),
            Some(MockReply::Disconnect(reason)) => Err(ConnectionError::Session {
                host: self.host.clone(),
                reason,
            }),
            None => Ok(CommandOutput {
                exit_status: Some(0),
                ..CommandOutput::default()
            }),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}
