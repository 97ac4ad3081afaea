//! CLI command implementations

mod call;
mod config;
mod input;
mod remote;
mod status;
mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};

use kr_client::{Connection, ConnectionManager, DefaultConnector, DeliveryExecutor};
use kr_core::{ClientConfig, HostDescriptor};

pub use call::call_command;
pub use config::{
    config_edit, config_get, config_hosts, config_init, config_set, config_show,
    load_client_config,
};
pub use input::{button_command, text_command};
pub use remote::{key_command, remote_command, RemoteKey};
pub use status::status_command;
pub use watch::{parse_roles, watch_command};

/// A connection manager bound to one host for the duration of a command
pub struct Session {
    pub manager: ConnectionManager,
    pub host: HostDescriptor,
    pub config: ClientConfig,
}

impl Session {
    /// Resolve `host` (or the default host) and build a manager for it.
    ///
    /// Nothing connects until [`Session::connect`] is called, so observers
    /// registered in between see the first state refresh.
    pub fn new(
        mut config: ClientConfig,
        host: Option<&str>,
        executor: Arc<dyn DeliveryExecutor>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let host = config
            .host(host)
            .context("No host to talk to (add one with 'kore config init')")?;
        config.default_host = Some(host.name.clone());

        let connector = Arc::new(DefaultConnector::new(config.connect_timeout));
        let manager = ConnectionManager::new(config.clone(), connector, executor);

        Ok(Self {
            manager,
            host,
            config,
        })
    }

    /// Connect to the selected host
    pub async fn connect(&self) -> Result<Arc<Connection>> {
        tracing::debug!("Connecting to {} ({})", self.host.name, self.host.mode);
        self.manager
            .connection()
            .await
            .with_context(|| format!("Failed to connect to {}", self.host.name))
    }

    /// Tear everything down
    pub async fn close(self) {
        self.manager.shutdown().await;
    }
}
