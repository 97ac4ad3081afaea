//! Host descriptors

use serde::{Deserialize, Serialize};

use crate::types::TransportMode;

/// A media-center host the client can talk to.
///
/// Immutable once built; switching hosts replaces the descriptor wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// User-facing name, unique within the configuration
    pub name: String,

    /// Hostname or IP address
    pub address: String,

    /// HTTP JSON-RPC port (polling mode)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Raw TCP JSON-RPC port (push mode)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// UDP event-server port for control packets
    #[serde(default = "default_event_server_port")]
    pub event_server_port: u16,

    /// Transport selection
    #[serde(default)]
    pub mode: TransportMode,

    /// HTTP basic auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// HTTP basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_tcp_port() -> u16 {
    9090
}

fn default_event_server_port() -> u16 {
    9777
}

impl HostDescriptor {
    /// Create a push-mode host with the standard ports
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            http_port: default_http_port(),
            tcp_port: default_tcp_port(),
            event_server_port: default_event_server_port(),
            mode: TransportMode::Push,
            username: None,
            password: None,
        }
    }

    /// Same host with a different transport mode
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Same host with basic auth credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// `address:tcp_port` for the push transport
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.address, self.tcp_port)
    }

    /// JSON-RPC endpoint for the polling transport
    pub fn http_endpoint(&self) -> String {
        format!("http://{}:{}/jsonrpc", self.address, self.http_port)
    }

    /// `address:event_server_port` for control packets
    pub fn event_server_address(&self) -> String {
        format!("{}:{}", self.address, self.event_server_port)
    }
}
