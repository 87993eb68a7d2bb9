//! Host addressing and shell quoting.

use crate::error::{ValidationError, ValidationResult};
use std::fmt;
use std::str::FromStr;

/// Port used when a host is given without one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A remote machine, normalized to `host:port`.
///
/// The `Display` form is the connection-pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    host: String,
    port: u16,
}

impl HostAddr {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> ValidationResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ValidationError::Empty("host"));
        }
        Ok(Self { host, port })
    }

    /// Host name or IP, without the port.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostAddr {
    type Err = ValidationError;

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default_port(s, DEFAULT_SSH_PORT)
    }
}

impl HostAddr {
    /// Parse an address, using `default_port` when none is given.
    pub fn parse_with_default_port(s: &str, default_port: u16) -> ValidationResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::Empty("host"));
        }

        let invalid = |reason: &str| ValidationError::InvalidHost {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid("bad port"))?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid("unexpected text after ']'")),
            };
            return Self::new(host, port);
        }

        match s.rsplit_once(':') {
            // Bare IPv6 without brackets: treat the whole thing as the host.
            Some((host, _)) if host.contains(':') => Self::new(s, default_port),
            Some((host, port)) => {
                let port = port.parse().map_err(|_| invalid("bad port"))?;
                Self::new(host, port)
            }
            None => Self::new(s, default_port),
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Quote a string for a POSIX shell as a single word.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port() {
        let addr: HostAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(addr.host(), "10.0.0.5");
        assert_eq!(addr.port(), 22);
        assert_eq!(addr.to_string(), "10.0.0.5:22");
    }

    #[test]
    fn explicit_port_is_kept() {
        let addr: HostAddr = "node-1.example:2222".parse().unwrap();
        assert_eq!(addr.to_string(), "node-1.example:2222");
    }

    #[test]
    fn configured_default_port_applies_only_when_missing() {
        let a = HostAddr::parse_with_default_port("node-1", 2222).unwrap();
        assert_eq!(a.to_string(), "node-1:2222");
        let b = HostAddr::parse_with_default_port("node-1:22", 2222).unwrap();
        assert_eq!(b.port(), 22);
        let c = HostAddr::parse_with_default_port("[fd00::1]", 2222).unwrap();
        assert_eq!(c.to_string(), "[fd00::1]:2222");
    }

    #[test]
    fn ipv6_forms() {
        let addr: HostAddr = "[fd00::1]:2200".parse().unwrap();
        assert_eq!(addr.host(), "fd00::1");
        assert_eq!(addr.port(), 2200);
        assert_eq!(addr.to_string(), "[fd00::1]:2200");

        let bare: HostAddr = "fd00::1".parse().unwrap();
        assert_eq!(bare.port(), 22);
    }

    #[test]
    fn rejects_empty_and_bad_port() {
        assert_eq!("  ".parse::<HostAddr>(), Err(ValidationError::Empty("host")));
        assert!(matches!(
            "host:ssh".parse::<HostAddr>(),
            Err(ValidationError::InvalidHost { .. })
        ));
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("k3s-agent"), "k3s-agent");
        assert_eq!(shell_quote("k3s server"), "'k3s server'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
