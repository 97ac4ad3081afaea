//! A live connection to one host
//!
//! A [`Connection`] owns the transport, the pending-call table and the
//! background tasks feeding them:
//! - the outbound pump (ordered writes, or one task per HTTP request)
//! - the timeout sweep
//! - the inbound read loop (push hosts) or the poll loop (polling hosts)
//!
//! It shares the notification dispatcher with the manager that created it,
//! so observers survive reconnects and host switches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kr_core::{CallError, ClientConfig, ConnectionError, HostDescriptor, TransportMode};
use kr_protocol::{InboundMessage, RequestId};

use crate::dispatch::{query_snapshot, run_poller, HostSnapshot, NotificationDispatcher};
use crate::executor::{DeliveryExecutor, Handoff};
use crate::rpc::{run_outbound_pump, run_timeout_sweep, ApiMethod, CallCorrelator};
use crate::transport::{InboundStream, Transport};

/// First transport failure seen by any background task
struct LossSignal {
    token: CancellationToken,
    reason: Mutex<Option<ConnectionError>>,
}

impl LossSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    fn report(&self, err: ConnectionError) {
        if let Ok(mut reason) = self.reason.lock() {
            if reason.is_none() {
                *reason = Some(err);
            }
        }
        self.token.cancel();
    }

    async fn wait(&self) -> ConnectionError {
        self.token.cancelled().await;
        self.reason
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .unwrap_or(ConnectionError::Closed)
    }
}

/// Route one inbound frame to the correlator or the dispatcher
fn route_frame(frame: &str, correlator: &CallCorrelator, dispatcher: &NotificationDispatcher) {
    match InboundMessage::parse(frame) {
        Ok(InboundMessage::Response { id, outcome }) => correlator.handle_response(id, outcome),
        Ok(InboundMessage::Notification { method, params }) => {
            dispatcher.dispatch_notification(&method, &params)
        }
        Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
    }
}

/// Timing knobs taken from [`ClientConfig`]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub call_timeout: Duration,
    pub sweep_interval: Duration,
    pub polling_interval: Duration,
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            sweep_interval: config.timeout_sweep_interval,
            polling_interval: config.polling_interval,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Live connection to a single host
pub struct Connection {
    host: Arc<HostDescriptor>,
    transport: Arc<dyn Transport>,
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<NotificationDispatcher>,
    executor: Arc<dyn DeliveryExecutor>,
    cancel: CancellationToken,
    loss: Arc<LossSignal>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Connection {
    /// Start the background tasks for an open transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        host: Arc<HostDescriptor>,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<NotificationDispatcher>,
        executor: Arc<dyn DeliveryExecutor>,
        settings: ConnectionSettings,
    ) -> Arc<Self> {
        let (correlator, queue) = CallCorrelator::new(settings.call_timeout);
        let cancel = CancellationToken::new();
        let loss = Arc::new(LossSignal::new());
        let mut tasks = Vec::new();

        let on_reply = {
            let correlator = correlator.clone();
            let dispatcher = dispatcher.clone();
            move |reply: String| route_frame(&reply, &correlator, &dispatcher)
        };
        tasks.push(tokio::spawn(run_outbound_pump(
            correlator.clone(),
            queue,
            transport.clone(),
            on_reply,
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(run_timeout_sweep(
            correlator.clone(),
            settings.sweep_interval,
            cancel.clone(),
        )));

        match transport.take_inbound() {
            Some(inbound) => {
                tasks.push(tokio::spawn(read_loop(
                    inbound,
                    correlator.clone(),
                    dispatcher.clone(),
                    loss.clone(),
                    cancel.clone(),
                )));
                tasks.push(tokio::spawn(refresh(
                    correlator.clone(),
                    dispatcher.clone(),
                    cancel.clone(),
                )));
            }
            None => {
                let correlator = correlator.clone();
                let dispatcher = dispatcher.clone();
                let loss = loss.clone();
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    let stopped = run_poller(
                        correlator.clone(),
                        dispatcher,
                        settings.polling_interval,
                        cancel,
                    )
                    .await;
                    if let Some(err) = stopped {
                        correlator.close(CallError::Connection(err.clone()));
                        loss.report(err);
                    }
                }));
            }
        }

        tracing::info!("Connected to {} ({})", host.name, transport.mode());

        Arc::new(Self {
            host,
            transport,
            correlator,
            dispatcher,
            executor,
            cancel,
            loss,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }

    /// Host this connection talks to
    pub fn host(&self) -> &Arc<HostDescriptor> {
        &self.host
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// Executor used when a call names none
    pub fn executor(&self) -> &Arc<dyn DeliveryExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Whether teardown has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Typed call delivered on the connection's executor
    pub fn call<M, F>(&self, params: M::Params, callback: F) -> Option<RequestId>
    where
        M: ApiMethod,
        F: FnOnce(Result<M::Output, CallError>) + Send + 'static,
    {
        self.correlator.call::<M, F>(
            params,
            self.correlator.default_timeout(),
            self.executor.clone(),
            callback,
        )
    }

    /// Typed call with an explicit timeout and executor
    pub fn call_with<M, F>(
        &self,
        params: M::Params,
        timeout: Duration,
        executor: Arc<dyn DeliveryExecutor>,
        callback: F,
    ) -> Option<RequestId>
    where
        M: ApiMethod,
        F: FnOnce(Result<M::Output, CallError>) + Send + 'static,
    {
        self.correlator.call::<M, F>(params, timeout, executor, callback)
    }

    /// Untyped call delivered on the connection's executor
    pub fn call_raw<F>(&self, method: &str, params: Value, callback: F) -> Option<RequestId>
    where
        F: FnOnce(Result<Value, CallError>) + Send + 'static,
    {
        self.correlator.call_raw(
            method,
            params,
            self.correlator.default_timeout(),
            self.executor.clone(),
            callback,
        )
    }

    /// Typed call awaited in place.
    ///
    /// Completes through the connection's executor, so the caller resumes
    /// only after every notification read before the response was delivered.
    /// With a manual executor the queue must be drained while this is awaited.
    pub async fn request<M: ApiMethod>(&self, params: M::Params) -> Result<M::Output, CallError> {
        self.correlator
            .request::<M>(params, self.correlator.default_timeout(), self.executor.clone())
            .await
    }

    /// Untyped call awaited in place, ordered like [`Connection::request`]
    pub async fn request_raw(&self, method: &str, params: Value) -> Result<Value, CallError> {
        self.correlator
            .request_raw(
                method,
                params,
                self.correlator.default_timeout(),
                self.executor.clone(),
            )
            .await
    }

    /// Query the host's current player and application state
    pub async fn snapshot(&self) -> Result<HostSnapshot, CallError> {
        query_snapshot(
            &self.correlator,
            self.correlator.default_timeout(),
            self.executor.clone(),
        )
        .await
    }

    /// Cancel a call in flight; its callback receives `Cancelled`
    pub fn cancel(&self, id: RequestId) -> bool {
        self.correlator.cancel(id)
    }

    /// Resolves with the transport failure that ended this connection
    pub async fn lost(&self) -> ConnectionError {
        self.loss.wait().await
    }

    /// Stop everything: fail pending calls with `reason`, stop background
    /// tasks, close the transport. Idempotent.
    pub async fn teardown(&self, reason: CallError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Tearing down connection to {}: {}", self.host.name, reason);

        self.correlator.close(reason);
        self.cancel.cancel();

        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Connection task ended abnormally: {}", e);
            }
        }

        self.transport.close().await;
        tracing::info!("Disconnected from {}", self.host.name);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    mut inbound: InboundStream,
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<NotificationDispatcher>,
    loss: Arc<LossSignal>,
    cancel: CancellationToken,
) {
    let err = loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = inbound.next() => item,
        };

        match item {
            Some(Ok(frame)) => route_frame(&frame, &correlator, &dispatcher),
            Some(Err(e)) => break e,
            None => break ConnectionError::Lost("stream ended".to_string()),
        }
    };

    tracing::warn!("Inbound stream failed: {}", err);
    correlator.close(CallError::Connection(err.clone()));
    loss.report(err);
}

/// Publish the host's full state once after connecting.
///
/// Roles that received a notification while the query was in flight keep
/// that newer state.
async fn refresh(
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<NotificationDispatcher>,
    cancel: CancellationToken,
) {
    let mark = dispatcher.mark();
    let query = query_snapshot(&correlator, correlator.default_timeout(), Arc::new(Handoff));
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = query => result,
    };

    match result {
        Ok(snapshot) => {
            let published = dispatcher.publish_snapshot(&snapshot, &mark);
            tracing::debug!("State refresh published {} events", published);
        }
        Err(e) => tracing::warn!("State refresh failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SerialExecutor;
    use crate::rpc::methods::Ping;
    use crate::transport::memory::pair;

    #[tokio::test]
    async fn test_request_over_memory_push_transport() {
        let (transport, mut host) = pair(TransportMode::Push);
        let executor = SerialExecutor::spawn();
        let dispatcher = Arc::new(NotificationDispatcher::new(executor.clone()));

        let conn = Connection::start(
            Arc::new(HostDescriptor::new("mem", "127.0.0.1")),
            Arc::new(transport),
            dispatcher,
            executor,
            ConnectionSettings::default(),
        );

        let server = tokio::spawn(async move {
            loop {
                let request = host.recv().await.unwrap().json();
                if request["method"] == "JSONRPC.Ping" {
                    let reply = serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": "pong"});
                    host.push(reply.to_string());
                    return host;
                }
            }
        });

        assert_eq!(conn.request::<Ping>(()).await.unwrap(), "pong");
        let host = server.await.unwrap();

        conn.teardown(CallError::Cancelled).await;
        assert!(host.is_closed());
        assert!(conn.is_closed());
        assert_eq!(conn.request::<Ping>(()).await, Err(CallError::Cancelled));
    }

    /// Push transport whose writes never complete
    struct StalledTransport;

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        fn mode(&self) -> TransportMode {
            TransportMode::Push
        }

        async fn send(&self, _frame: String) -> Result<Option<String>, ConnectionError> {
            std::future::pending().await
        }

        fn take_inbound(&self) -> Option<InboundStream> {
            Some(futures::stream::pending().boxed())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_teardown_does_not_wait_for_stalled_write() {
        let executor = SerialExecutor::spawn();
        let dispatcher = Arc::new(NotificationDispatcher::new(executor.clone()));

        let conn = Connection::start(
            Arc::new(HostDescriptor::new("mem", "127.0.0.1")),
            Arc::new(StalledTransport),
            dispatcher,
            executor,
            ConnectionSettings::default(),
        );

        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.request::<Ping>(()).await })
        };

        // The refresh query is already stuck in `send`
        tokio::time::timeout(Duration::from_secs(3), conn.teardown(CallError::Cancelled))
            .await
            .expect("teardown waited for the write");
        assert_eq!(pending.await.unwrap(), Err(CallError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending_and_reports_loss() {
        let (transport, mut host) = pair(TransportMode::Push);
        let executor = SerialExecutor::spawn();
        let dispatcher = Arc::new(NotificationDispatcher::new(executor.clone()));

        let conn = Connection::start(
            Arc::new(HostDescriptor::new("mem", "127.0.0.1")),
            Arc::new(transport),
            dispatcher,
            executor,
            ConnectionSettings::default(),
        );

        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.request_raw("Player.Stop", Value::Null).await })
        };

        // Wait until the call hits the wire, then hang up
        loop {
            let request = host.recv().await.unwrap().json();
            if request["method"] == "Player.Stop" {
                break;
            }
        }
        host.hang_up();

        assert!(matches!(
            pending.await.unwrap(),
            Err(CallError::Connection(ConnectionError::Lost(_)))
        ));
        assert!(matches!(conn.lost().await, ConnectionError::Lost(_)));
    }
}
