//! Domain primitive types used across the bravekit workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_REMOTE;
use crate::error::{BraveError, Result};

/// Splits `remote:name` into its parts; a bare name belongs to the local remote.
///
/// Only the first colon separates the remote, so `"prod:web"` yields
/// `("prod", "web")` and `"web"` yields `("local", "web")`.
#[must_use]
pub fn parse_remote_name(input: &str) -> (&str, &str) {
    match input.split_once(':') {
        Some((remote, name)) if !remote.is_empty() => (remote, name),
        Some((_, name)) => (LOCAL_REMOTE, name),
        None => (LOCAL_REMOTE, input),
    }
}

/// A port forwarding rule `UNIT_PORT:HOST_PORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRule {
    /// Port the unit listens on.
    pub unit_port: u16,
    /// Port exposed on the runtime host.
    pub host_port: u16,
}

impl PortRule {
    /// Parses `UNIT_PORT:HOST_PORT`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] unless the rule has exactly two
    /// colon-separated port numbers.
    pub fn parse(rule: &str) -> Result<Self> {
        let invalid = || {
            BraveError::validation(format!(
                "invalid port forwarding definition {rule:?}, expected UNIT_PORT:HOST_PORT"
            ))
        };
        let mut parts = rule.split(':');
        let (Some(unit), Some(host), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        Ok(Self {
            unit_port: unit.trim().parse().map_err(|_| invalid())?,
            host_port: host.trim().parse().map_err(|_| invalid())?,
        })
    }

    /// Runtime device name for this rule.
    #[must_use]
    pub fn device_name(&self) -> String {
        format!("proxy_{}", self.host_port)
    }
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit_port, self.host_port)
    }
}

/// Resource snapshot persisted with each unit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitData {
    /// CPU count.
    pub cpu: u32,
    /// RAM quantity exactly as requested.
    pub ram: String,
    /// Static IP, empty when assigned by DHCP.
    pub ip: String,
    /// Image reference the unit was launched from.
    pub image: String,
}

/// Lifecycle state of a unit as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Unit is running.
    Running,
    /// Unit exists but is stopped.
    Stopped,
    /// Any other runtime status.
    Other,
}

impl UnitState {
    /// Maps a runtime status string.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Other => write!(f, "Unknown"),
        }
    }
}
