//! Service actions, unit-name resolution and the systemd command builder.
//!
//! Each action maps to exactly one [`ServiceCommand`] variant, so an invalid
//! action/command combination cannot be built.

use crate::error::{ValidationError, ValidationResult};
use crate::host::shell_quote;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Declarative operation on a managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Stop the unit.
    Stop,
    /// Start the unit.
    Start,
    /// Restart the unit.
    Restart,
    /// Query the unit's status.
    Status,
    /// Enable the unit at boot.
    Enable,
    /// Rotate the product's certificates (does not touch systemd).
    Rotate,
}

impl Action {
    /// Every supported action.
    pub const ALL: [Action; 6] = [
        Action::Stop,
        Action::Start,
        Action::Restart,
        Action::Status,
        Action::Enable,
        Action::Rotate,
    ];

    /// Lowercase name as used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Stop => "stop",
            Action::Start => "start",
            Action::Restart => "restart",
            Action::Status => "status",
            Action::Enable => "enable",
            Action::Rotate => "rotate",
        }
    }

    /// Whether the action runs through the retry engine.
    ///
    /// `start` and `restart` run exactly once; callers check `status`
    /// separately. `rotate` is never retried.
    pub fn is_retried(&self) -> bool {
        !matches!(self, Action::Start | Action::Restart | Action::Rotate)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}

/// Role of the node a unit runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Control-plane node.
    Server,
    /// Worker node.
    Agent,
}

impl NodeType {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Server => "server",
            NodeType::Agent => "agent",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(NodeType::Server),
            "agent" => Ok(NodeType::Agent),
            _ => Err(ValidationError::UnknownNodeType(s.to_string())),
        }
    }
}

/// Fixed lookup from `(product, node type)` to a systemd unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTable {
    units: HashMap<(String, NodeType), String>,
}

impl Default for UnitTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert("k3s", NodeType::Server, "k3s");
        table.insert("k3s", NodeType::Agent, "k3s-agent");
        table.insert("rke2", NodeType::Server, "rke2-server");
        table.insert("rke2", NodeType::Agent, "rke2-agent");
        table
    }
}

impl UnitTable {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Register (or replace) a unit name.
    pub fn insert(&mut self, product: &str, node_type: NodeType, unit: &str) {
        self.units
            .insert((product.to_string(), node_type), unit.to_string());
    }

    /// Whether any unit is registered for `product`.
    pub fn knows_product(&self, product: &str) -> bool {
        self.units.keys().any(|(p, _)| p == product)
    }

    /// Resolve the unit for a typed pair.
    pub fn resolve(&self, product: &str, node_type: NodeType) -> ValidationResult<&str> {
        if product.trim().is_empty() {
            return Err(ValidationError::Empty("product"));
        }
        self.units
            .get(&(product.to_string(), node_type))
            .map(String::as_str)
            .ok_or_else(|| ValidationError::UnknownUnit {
                product: product.to_string(),
                node_type: node_type.to_string(),
            })
    }

    /// Resolve the unit for an untyped pair, as given on a command line.
    pub fn resolve_named(&self, product: &str, node_type: &str) -> ValidationResult<&str> {
        let typed = node_type
            .parse::<NodeType>()
            .map_err(|_| ValidationError::UnknownUnit {
                product: product.to_string(),
                node_type: node_type.to_string(),
            })?;
        self.resolve(product, typed)
    }
}

/// A declarative request against one node's managed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAction {
    /// Product whose unit is targeted (e.g. `k3s`).
    pub service: String,
    /// What to do.
    pub action: Action,
    /// Role of the target node.
    pub node_type: NodeType,
    /// Wait before issuing the command, to let a prior change settle.
    pub explicit_delay: Duration,
}

impl ServiceAction {
    /// Create an action with no explicit delay.
    pub fn new(service: impl Into<String>, action: Action, node_type: NodeType) -> Self {
        Self {
            service: service.into(),
            action,
            node_type,
            explicit_delay: Duration::ZERO,
        }
    }

    /// Parse an action from untyped command-line values.
    pub fn parse(service: &str, action: &str, node_type: &str) -> ValidationResult<Self> {
        if service.trim().is_empty() {
            return Err(ValidationError::Empty("service"));
        }
        let action = action.parse()?;
        let node_type = node_type.parse()?;
        Ok(Self::new(service.trim(), action, node_type))
    }

    /// Builder: wait `delay` before issuing the command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.explicit_delay = delay;
        self
    }
}

/// Remote command for one service action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// `systemctl stop`.
    Stop {
        /// Unit name.
        unit: String,
    },
    /// `systemctl start`.
    Start {
        /// Unit name.
        unit: String,
    },
    /// `systemctl restart`.
    Restart {
        /// Unit name.
        unit: String,
    },
    /// `systemctl status`.
    Status {
        /// Unit name.
        unit: String,
    },
    /// `systemctl enable`.
    Enable {
        /// Unit name.
        unit: String,
    },
    /// `<product> certificate rotate`.
    RotateCertificates {
        /// Product binary.
        product: String,
    },
}

impl ServiceCommand {
    /// Resolve the unit and pick the command variant for `action`.
    pub fn plan(action: &ServiceAction, units: &UnitTable) -> ValidationResult<Self> {
        let unit = || {
            units
                .resolve(&action.service, action.node_type)
                .map(str::to_string)
        };
        Ok(match action.action {
            Action::Stop => ServiceCommand::Stop { unit: unit()? },
            Action::Start => ServiceCommand::Start { unit: unit()? },
            Action::Restart => ServiceCommand::Restart { unit: unit()? },
            Action::Status => ServiceCommand::Status { unit: unit()? },
            Action::Enable => ServiceCommand::Enable { unit: unit()? },
            Action::Rotate => {
                if !units.knows_product(&action.service) {
                    return Err(ValidationError::UnknownUnit {
                        product: action.service.clone(),
                        node_type: action.node_type.to_string(),
                    });
                }
                ServiceCommand::RotateCertificates {
                    product: action.service.clone(),
                }
            }
        })
    }

    /// Shell text to run on the node.
    pub fn render(&self) -> String {
        let systemctl = |verb: &str, unit: &str| {
            format!("sudo systemctl --no-block {} {}", verb, shell_quote(unit))
        };
        match self {
            ServiceCommand::Stop { unit } => systemctl("stop", unit),
            ServiceCommand::Start { unit } => systemctl("start", unit),
            ServiceCommand::Restart { unit } => systemctl("restart", unit),
            ServiceCommand::Status { unit } => systemctl("status", unit),
            ServiceCommand::Enable { unit } => systemctl("enable", unit),
            ServiceCommand::RotateCertificates { product } => {
                format!("sudo {} certificate rotate", shell_quote(product))
            }
        }
    }
}
