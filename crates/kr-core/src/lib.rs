//! kr-core: Configuration and error types for Kore Remote
//!
//! This crate provides the host descriptors, client configuration and error
//! taxonomy shared by the client runtime and the CLI.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{BackoffConfig, ClientConfig, EventServerConfig, HostDescriptor};
pub use error::{BestEffortSendFailure, CallError, ConfigError, ConnectionError};
pub use types::{ConnectionStatus, TransportMode};
