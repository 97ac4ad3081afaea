//! Client configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::host::HostDescriptor;
use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the remote-control client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host used when none is named explicitly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_host: Option<String>,

    /// Default per-call timeout
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,

    /// How often pending calls are checked for expiry
    #[serde(with = "duration_millis")]
    pub timeout_sweep_interval: Duration,

    /// State query interval for polling-only hosts
    #[serde(with = "duration_millis")]
    pub polling_interval: Duration,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long the app may stay backgrounded before the connection is dropped
    #[serde(with = "duration_secs")]
    pub background_grace_period: Duration,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// Control-packet channel settings
    pub event_server: EventServerConfig,

    /// Known hosts
    pub hosts: Vec<HostDescriptor>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_host: None,
            call_timeout: Duration::from_secs(5),
            timeout_sweep_interval: Duration::from_millis(100),
            polling_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            background_grace_period: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            event_server: EventServerConfig::default(),
            hosts: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Resolve a host by name, falling back to the default host, then to the first one
    pub fn host(&self, name: Option<&str>) -> Result<HostDescriptor, ConfigError> {
        if let Some(name) = name.or(self.default_host.as_deref()) {
            return self
                .hosts
                .iter()
                .find(|h| h.name == name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownHost(name.to_string()));
        }
        self.hosts.first().cloned().ok_or(ConfigError::NoHosts)
    }

    /// Check invariants the runtime relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("call_timeout must be positive".into()));
        }
        if self.timeout_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "timeout_sweep_interval must be positive".into(),
            ));
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::Invalid("polling_interval must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff needs multiplier >= 1 and jitter in [0, 1]".into(),
            ));
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate host name: {}",
                    host.name
                )));
            }
        }
        if let Some(default) = &self.default_host {
            if !seen.contains(default.as_str()) {
                return Err(ConfigError::UnknownHost(default.clone()));
            }
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Event-server (control packet) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventServerConfig {
    /// Name announced to the host in the Helo packet
    pub device_name: String,

    /// Interval between keepalive pings
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
}

impl Default for EventServerConfig {
    fn default() -> Self {
        Self {
            device_name: gethostname::gethostname().to_string_lossy().into_owned(),
            keepalive_interval: Duration::from_secs(45),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_hosts() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.hosts.push(HostDescriptor::new("den", "10.0.0.5"));
        config.hosts.push(HostDescriptor::new("bedroom", "10.0.0.6"));
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_host_resolution() {
        let mut config = config_with_hosts();
        assert_eq!(config.host(None).unwrap().name, "den");
        assert_eq!(config.host(Some("bedroom")).unwrap().address, "10.0.0.6");

        config.default_host = Some("bedroom".to_string());
        assert_eq!(config.host(None).unwrap().name, "bedroom");

        assert!(matches!(
            config.host(Some("garage")),
            Err(ConfigError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_no_hosts() {
        assert!(matches!(
            ClientConfig::default().host(None),
            Err(ConfigError::NoHosts)
        ));
    }

    #[test]
    fn test_duplicate_host_names_rejected() {
        let mut config = config_with_hosts();
        config.hosts.push(HostDescriptor::new("den", "10.0.0.7"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_polling_interval_rejected() {
        let mut config = ClientConfig::default();
        config.polling_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            call_timeout = 2500

            [[hosts]]
            name = "den"
            address = "kodi.local"
            "#,
        )
        .unwrap();

        assert_eq!(config.call_timeout, Duration::from_millis(2500));
        assert_eq!(config.polling_interval, Duration::from_secs(1));
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].tcp_port, 9090);
    }
}
