//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the client talks to a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Persistent TCP stream carrying responses and pushed notifications
    #[default]
    Push,
    /// HTTP request/response only; notifications are emulated by polling
    Polling,
}

impl TransportMode {
    /// Whether the host pushes notifications in this mode
    pub fn supports_push(&self) -> bool {
        matches!(self, TransportMode::Push)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Push => write!(f, "push"),
            TransportMode::Polling => write!(f, "polling"),
        }
    }
}

/// Connection status for the active host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Connected and ready
    Connected,
    /// First connection attempt in progress
    Connecting,
    /// No connection
    Disconnected,
    /// Reconnecting after a disconnect
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_display() {
        assert_eq!(format!("{}", ConnectionStatus::Connected), "connected");
        assert_eq!(
            format!("{}", ConnectionStatus::Reconnecting),
            "reconnecting"
        );
    }

    #[test]
    fn test_transport_mode_serde() {
        let json = serde_json::to_string(&TransportMode::Polling).unwrap();
        assert_eq!(json, "\"polling\"");
        assert!(TransportMode::Push.supports_push());
        assert!(!TransportMode::Polling.supports_push());
    }
}
