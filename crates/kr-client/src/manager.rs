//! Connection lifecycle
//!
//! The manager holds at most one [`Connection`] and the dispatcher that
//! outlives it. Collaborators get the connection from the manager instead
//! of a global, and the manager alone decides when it is replaced:
//! - lazily on first use ([`ConnectionManager::connection`])
//! - on host switch, after the old one is fully torn down
//! - by the supervisor after a transport failure, with exponential backoff
//! - never while the application sits in the background past its grace period

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kr_core::{CallError, ClientConfig, ConnectionError, ConnectionStatus, HostDescriptor};
use kr_protocol::ObserverRole;

use crate::connection::{Connection, ConnectionSettings};
use crate::dispatch::{NotificationDispatcher, Observer};
use crate::executor::DeliveryExecutor;
use crate::reconnect::ExponentialBackoff;
use crate::transport::Connector;

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    executor: Arc<dyn DeliveryExecutor>,
    dispatcher: Arc<NotificationDispatcher>,
    host: Mutex<Option<Arc<HostDescriptor>>>,
    active: tokio::sync::Mutex<Option<Arc<Connection>>>,
    supervisor: Mutex<Option<CancellationToken>>,
    background: Mutex<Option<CancellationToken>>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: CancellationToken,
}

/// Owns the single active connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. The initial host is the configuration's default, if any.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        executor: Arc<dyn DeliveryExecutor>,
    ) -> Self {
        let host = config.host(None).ok().map(Arc::new);
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            inner: Arc::new(Inner {
                dispatcher: Arc::new(NotificationDispatcher::new(executor.clone())),
                config,
                connector,
                executor,
                host: Mutex::new(host),
                active: tokio::sync::Mutex::new(None),
                supervisor: Mutex::new(None),
                background: Mutex::new(None),
                status,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Dispatcher shared by every connection this manager creates
    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.inner.dispatcher
    }

    pub fn register_observer(&self, role: ObserverRole, observer: Arc<dyn Observer>) {
        self.inner.dispatcher.register_observer(role, observer);
    }

    pub fn unregister_observer(&self, role: ObserverRole, observer: &Arc<dyn Observer>) -> bool {
        self.inner.dispatcher.unregister_observer(role, observer)
    }

    /// Currently selected host
    pub fn host(&self) -> Option<Arc<HostDescriptor>> {
        self.inner.host.lock().ok().and_then(|h| h.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Watch status transitions
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// The active connection, connecting first if there is none
    pub async fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        let mut active = self.inner.active.lock().await;

        if let Some(conn) = active.as_ref().filter(|c| !c.is_closed()) {
            return Ok(conn.clone());
        }

        let conn = self.inner.open(ConnectionStatus::Connecting).await?;
        self.inner.start_supervisor(conn.clone());
        *active = Some(conn.clone());
        Ok(conn)
    }

    /// The active connection without connecting
    pub async fn current(&self) -> Option<Arc<Connection>> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    /// Tear down the current connection completely, then connect to `host`
    pub async fn switch_host(&self, host: HostDescriptor) -> Result<Arc<Connection>, ConnectionError> {
        let mut active = self.inner.active.lock().await;
        tracing::info!("Switching host to {}", host.name);

        self.inner.stop_supervisor();
        if let Some(old) = active.take() {
            old.teardown(CallError::Cancelled).await;
            self.inner.dispatcher.connection_lost("host changed");
        }

        if let Ok(mut current) = self.inner.host.lock() {
            *current = Some(Arc::new(host));
        }

        let conn = self.inner.open(ConnectionStatus::Connecting).await?;
        self.inner.start_supervisor(conn.clone());
        *active = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the current connection; the next `connection()` reconnects
    pub async fn disconnect(&self, reason: &str) {
        self.inner.teardown_active(reason).await;
    }

    /// The application went to the background; drop the connection once
    /// the grace period runs out
    pub fn enter_background(&self) {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.inner.background.lock() {
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let inner = self.inner.clone();
        let grace = inner.config.background_grace_period;
        tracing::debug!("Entered background, grace period {:?}", grace);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    tracing::info!("Background grace period expired");
                    inner.teardown_active("application in background").await;
                }
            }
        });
    }

    /// The application is visible again. Reconnection happens lazily.
    pub fn enter_foreground(&self) {
        if let Ok(mut slot) = self.inner.background.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
                tracing::debug!("Entered foreground");
            }
        }
    }

    /// Tear everything down and stop reconnecting
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.enter_foreground();
        self.inner.teardown_active("shutdown").await;
    }
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn current_host(&self) -> Option<Arc<HostDescriptor>> {
        self.host.lock().ok().and_then(|h| h.clone())
    }

    fn stop_supervisor(&self) {
        if let Ok(mut slot) = self.supervisor.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    /// Open a connection to the current host.
    ///
    /// Callers hold the `active` lock.
    async fn open(&self, status: ConnectionStatus) -> Result<Arc<Connection>, ConnectionError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        let host = self
            .current_host()
            .ok_or_else(|| ConnectionError::Unreachable("no host selected".to_string()))?;

        self.set_status(status);
        let transport = match self.connector.connect(&host).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", host.name, e);
                if status == ConnectionStatus::Connecting {
                    self.set_status(ConnectionStatus::Disconnected);
                }
                return Err(e);
            }
        };

        let conn = Connection::start(
            host,
            transport,
            self.dispatcher.clone(),
            self.executor.clone(),
            ConnectionSettings::from(&self.config),
        );

        self.set_status(ConnectionStatus::Connected);
        Ok(conn)
    }

    /// Replace the supervisor with one watching `conn`
    fn start_supervisor(self: &Arc<Self>, conn: Arc<Connection>) {
        self.stop_supervisor();
        let token = self.shutdown.child_token();
        if let Ok(mut slot) = self.supervisor.lock() {
            *slot = Some(token.clone());
        }
        tokio::spawn(supervise(self.clone(), conn, token));
    }

    async fn teardown_active(&self, reason: &str) {
        let mut active = self.active.lock().await;
        self.stop_supervisor();

        if let Some(conn) = active.take() {
            conn.teardown(CallError::Cancelled).await;
            self.dispatcher.connection_lost(reason);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }
}

/// Watch the active connection; on transport loss tear it down, reconnect
/// with backoff and keep watching the replacement
async fn supervise(inner: Arc<Inner>, mut conn: Arc<Connection>, cancel: CancellationToken) {
    let mut backoff = ExponentialBackoff::from_config(&inner.config.backoff);

    loop {
        let err = tokio::select! {
            _ = cancel.cancelled() => return,
            err = conn.lost() => err,
        };

        {
            let mut active = inner.active.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            if matches!(active.as_ref(), Some(current) if Arc::ptr_eq(current, &conn)) {
                active.take();
            }
        }

        tracing::warn!("Connection to {} lost: {}", conn.host().name, err);
        conn.teardown(CallError::Connection(err.clone())).await;
        inner.dispatcher.connection_lost(&err.to_string());
        inner.set_status(ConnectionStatus::Reconnecting);

        conn = match reconnect(&inner, &mut backoff, &cancel).await {
            Some(conn) => conn,
            None => return,
        };
        // The next loss starts from the initial delay again
        backoff.reset();
    }
}

async fn reconnect(
    inner: &Inner,
    backoff: &mut ExponentialBackoff,
    cancel: &CancellationToken,
) -> Option<Arc<Connection>> {
    loop {
        let delay = backoff.next_delay();
        tracing::info!("Reconnecting in {:?} (attempt {})", delay, backoff.attempts());

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let mut active = inner.active.lock().await;
        if cancel.is_cancelled() {
            return None;
        }
        if active.as_ref().is_some_and(|c| !c.is_closed()) {
            // Someone connected in the meantime and supervises it
            return None;
        }

        match inner.open(ConnectionStatus::Reconnecting).await {
            Ok(conn) => {
                tracing::info!("Reconnected to {}", conn.host().name);
                *active = Some(conn.clone());
                return Some(conn);
            }
            Err(e) => {
                tracing::warn!("Reconnect attempt failed: {}", e);
            }
        }
    }
}
