//! Service actions against a node's cluster unit.

use crate::error::{RemoteError, Result};
use crate::retry::with_retry;
use crate::runner::{Capture, CommandRunner, RemoteCommand};
use clusterdrive_core::{HostAddr, RetryConfig, ServiceAction, ServiceCommand, UnitTable};
use std::sync::Arc;
use std::time::Duration;

/// Attempts for retried service actions.
pub const DEFAULT_SERVICE_ATTEMPTS: u32 = 5;

/// Fixed delay between retried service actions.
pub const DEFAULT_SERVICE_DELAY: Duration = Duration::from_secs(5);

/// Issues service commands on nodes.
///
/// `stop`, `status` and `enable` go through the retry engine; `start`,
/// `restart` and `rotate` run exactly once.
#[derive(Debug, Clone)]
pub struct ServiceExecutor {
    runner: Arc<CommandRunner>,
    units: UnitTable,
    retry: RetryConfig,
}

impl ServiceExecutor {
    /// Create an executor with the built-in unit table and default policy.
    pub fn new(runner: Arc<CommandRunner>) -> Self {
        Self {
            runner,
            units: UnitTable::default(),
            retry: service_policy(DEFAULT_SERVICE_ATTEMPTS, DEFAULT_SERVICE_DELAY),
        }
    }

    /// Builder: replace the unit table.
    pub fn with_units(mut self, units: UnitTable) -> Self {
        self.units = units;
        self
    }

    /// Builder: attempts and fixed delay for retried actions.
    pub fn with_retry_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = service_policy(attempts, delay);
        self
    }

    /// Policy applied to retried actions.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `action` on `host` and return the command's output.
    ///
    /// The unit is resolved before anything is sent, so an unknown product
    /// or node type issues no remote command at all.
    pub async fn execute(&self, action: &ServiceAction, host: &str) -> Result<String> {
        let plan = ServiceCommand::plan(action, &self.units)?;
        let addr: HostAddr = host.parse()?;

        if !action.explicit_delay.is_zero() {
            tracing::debug!(
                "Waiting {:?} before {} on {}",
                action.explicit_delay,
                action.action,
                addr
            );
            tokio::time::sleep(action.explicit_delay).await;
        }

        let capture = match plan {
            ServiceCommand::RotateCertificates { .. } => Capture::Combined,
            _ => Capture::Stdout,
        };
        let command = RemoteCommand::new(plan.render()).capture(capture);
        tracing::info!(
            "{} {} ({}) on {}",
            action.action,
            action.service,
            action.node_type,
            addr
        );

        if !action.action.is_retried() {
            return self.runner.run_command(&command, host).await;
        }

        let runner: &CommandRunner = &self.runner;
        let command = &command;
        with_retry(&self.retry, move || runner.run_command(command, host))
            .await
            .map_err(RemoteError::from)
    }

    /// Parse untyped values and run the action.
    ///
    /// Unknown action or node type strings fail before any remote command.
    pub async fn execute_named(
        &self,
        service: &str,
        action: &str,
        node_type: &str,
        host: &str,
    ) -> Result<String> {
        let action = ServiceAction::parse(service, action, node_type)?;
        self.execute(&action, host).await
    }
}

fn service_policy(attempts: u32, delay: Duration) -> RetryConfig {
    RetryConfig {
        attempts,
        delay,
        delay_multiplier: 1.0,
        ..RetryConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;
    use crate::transport::{MockDialer, MockReply};
    use clusterdrive_core::{Action, NodeType, ValidationError};

    fn executor() -> (MockDialer, ServiceExecutor) {
        let dialer = MockDialer::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(dialer.clone())));
        let runner = Arc::new(CommandRunner::new(pool));
        let executor = ServiceExecutor::new(runner).with_retry_policy(3, Duration::from_secs(1));
        (dialer, executor)
    }

    #[tokio::test]
    async fn unknown_action_issues_no_command() {
        let (dialer, executor) = executor();
        let err = executor
            .execute_named("k3s", "reload", "server", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Validation(ValidationError::UnknownAction(_))
        ));
        assert_eq!(dialer.dial_count(), 0);
        assert!(dialer.commands().is_empty());
    }

    #[tokio::test]
    async fn unknown_product_issues_no_command() {
        let (dialer, executor) = executor();
        let action = ServiceAction::new("microk8s", Action::Stop, NodeType::Agent);
        let err = executor.execute(&action, "10.0.0.1").await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Validation(ValidationError::UnknownUnit { .. })
        ));
        assert!(dialer.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_once_even_when_it_fails() {
        let (dialer, executor) = executor();
        dialer.respond("systemctl", MockReply::fail(255, "connection reset"));
        let action = ServiceAction::new("k3s", Action::Start, NodeType::Agent);
        assert!(executor.execute(&action, "10.0.0.1").await.is_err());
        assert_eq!(
            dialer.commands(),
            vec!["sudo systemctl --no-block start k3s-agent"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_retries_retryable_failures() {
        let (dialer, executor) = executor();
        dialer.respond("systemctl", MockReply::fail(255, "connection reset"));
        dialer.respond("systemctl", MockReply::ok(""));
        let action = ServiceAction::new("rke2", Action::Stop, NodeType::Server);
        executor.execute(&action, "10.0.0.1").await.unwrap();
        assert_eq!(dialer.commands().len(), 2);
        assert!(dialer.commands()[0].ends_with("stop rke2-server"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_stop_reports_attempts() {
        let (dialer, executor) = executor();
        dialer.respond("systemctl", MockReply::fail(255, "broken pipe"));
        let action = ServiceAction::new("k3s", Action::Stop, NodeType::Server);
        let err = executor.execute(&action, "10.0.0.1").await.unwrap_err();
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(dialer.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_not_found_is_not_retried() {
        let (dialer, executor) = executor();
        dialer.respond("systemctl", MockReply::fail(5, "Unit k3s.service not found."));
        let action = ServiceAction::new("k3s", Action::Status, NodeType::Server);
        executor.execute(&action, "10.0.0.1").await.unwrap_err();
        assert_eq!(dialer.commands().len(), 1);
    }

    #[tokio::test]
    async fn status_returns_first_success() {
        let (dialer, executor) = executor();
        dialer.respond("status", MockReply::ok("Active: active (running)\n"));
        let action = ServiceAction::new("k3s", Action::Status, NodeType::Server);
        let out = executor.execute(&action, "10.0.0.1").await.unwrap();
        assert_eq!(out, "Active: active (running)");
        assert_eq!(dialer.commands(), vec!["sudo systemctl --no-block status k3s"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rotate_runs_once_without_systemctl() {
        let (dialer, executor) = executor();
        dialer.respond("certificate", MockReply::fail(255, "connection reset"));
        let action = ServiceAction::new("rke2", Action::Rotate, NodeType::Server);
        executor.execute(&action, "10.0.0.1").await.unwrap_err();

        let commands = dialer.commands();
        assert_eq!(commands, vec!["sudo rke2 certificate rotate"]);
        assert!(!commands[0].contains("systemctl"));
    }

    #[tokio::test]
    async fn rotate_returns_stderr_report() {
        let (dialer, executor) = executor();
        dialer.respond(
            "certificate",
            MockReply::ok_with_stderr("", "Certificates rotated"),
        );
        let action = ServiceAction::new("k3s", Action::Rotate, NodeType::Server);
        let out = executor.execute(&action, "10.0.0.1").await.unwrap();
        assert_eq!(out, "Certificates rotated");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_delay_is_waited_first() {
        let (dialer, executor) = executor();
        let start = tokio::time::Instant::now();
        let action = ServiceAction::new("k3s", Action::Restart, NodeType::Server)
            .with_delay(Duration::from_secs(10));
        executor.execute(&action, "10.0.0.1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(dialer.commands().len(), 1);
    }

    #[tokio::test]
    async fn custom_unit_table() {
        let dialer = MockDialer::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(dialer.clone())));
        let mut units = UnitTable::empty();
        units.insert("k3s", NodeType::Server, "k3s-server");
        let executor =
            ServiceExecutor::new(Arc::new(CommandRunner::new(pool))).with_units(units);

        let action = ServiceAction::new("k3s", Action::Enable, NodeType::Server);
        executor.execute(&action, "10.0.0.1").await.unwrap();
        assert_eq!(
            dialer.commands(),
            vec!["sudo systemctl --no-block enable k3s-server"]
        );
    }
}
