//! In-memory transport for tests and embedding
//!
//! [`pair`] returns a client-side [`MemoryTransport`] and a [`HostEnd`] that
//! plays the host: it receives request frames, answers them, pushes
//! notifications, and can drop the connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use kr_core::{ConnectionError, HostDescriptor, TransportMode};

use super::{Connector, InboundStream, Transport};

type Inbound = mpsc::UnboundedSender<Result<String, ConnectionError>>;

/// A frame the client sent, as seen by the host end
#[derive(Debug)]
pub struct HostRequest {
    pub frame: String,
    reply: Option<oneshot::Sender<Result<String, ConnectionError>>>,
}

impl HostRequest {
    /// Parse the frame as JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.frame).unwrap_or(serde_json::Value::Null)
    }

    /// Answer a request-response send. Push-mode requests ignore this.
    pub fn reply(self, frame: impl Into<String>) {
        if let Some(tx) = self.reply {
            let _ = tx.send(Ok(frame.into()));
        }
    }

    /// Fail a request-response send
    pub fn fail(self, err: ConnectionError) {
        if let Some(tx) = self.reply {
            let _ = tx.send(Err(err));
        }
    }
}

/// Client side of an in-memory connection
pub struct MemoryTransport {
    mode: TransportMode,
    requests: mpsc::UnboundedSender<HostRequest>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Result<String, ConnectionError>>>>,
    closed: Arc<AtomicBool>,
}

/// Host side of an in-memory connection
pub struct HostEnd {
    requests: mpsc::UnboundedReceiver<HostRequest>,
    inbound: Option<Inbound>,
    closed: Arc<AtomicBool>,
}

/// Create a connected transport and host end
pub fn pair(mode: TransportMode) -> (MemoryTransport, HostEnd) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let transport = MemoryTransport {
        mode,
        requests: req_tx,
        inbound: Mutex::new(mode.supports_push().then_some(in_rx)),
        closed: closed.clone(),
    };

    let host = HostEnd {
        requests: req_rx,
        inbound: mode.supports_push().then_some(in_tx),
        closed,
    };

    (transport, host)
}

impl MemoryTransport {
    /// Whether the client closed this transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    async fn send(&self, frame: String) -> Result<Option<String>, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let gone = || ConnectionError::Lost("host end dropped".to_string());

        if self.mode.supports_push() {
            self.requests
                .send(HostRequest { frame, reply: None })
                .map_err(|_| gone())?;
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        self.requests
            .send(HostRequest {
                frame,
                reply: Some(tx),
            })
            .map_err(|_| gone())?;

        match rx.await {
            Ok(reply) => reply.map(Some),
            Err(_) => Err(gone()),
        }
    }

    fn take_inbound(&self) -> Option<InboundStream> {
        let rx = self.inbound.lock().ok()?.take()?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Some(stream.boxed())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl HostEnd {
    /// Next frame sent by the client
    pub async fn recv(&mut self) -> Option<HostRequest> {
        self.requests.recv().await
    }

    /// A frame already queued, if any
    pub fn try_recv(&mut self) -> Option<HostRequest> {
        self.requests.try_recv().ok()
    }

    /// Push a frame to the client. Returns `false` if nobody is reading.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(frame.into())).is_ok(),
            None => false,
        }
    }

    /// End the inbound stream, as if the host hung up
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }

    /// Fail the inbound stream with `err` and end it
    pub fn fail(&mut self, err: ConnectionError) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Whether the client closed the transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Connector handing out pre-built in-memory transports in order
#[derive(Default)]
pub struct MemoryConnector {
    transports: Mutex<VecDeque<Arc<MemoryTransport>>>,
    attempts: AtomicUsize,
    hosts: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next successful connect
    pub fn enqueue(&self, transport: MemoryTransport) -> Arc<MemoryTransport> {
        let transport = Arc::new(transport);
        if let Ok(mut queue) = self.transports.lock() {
            queue.push_back(transport.clone());
        }
        transport
    }

    /// Create a pair, queue the transport and return the host end
    pub fn expect_connection(&self, mode: TransportMode) -> (Arc<MemoryTransport>, HostEnd) {
        let (transport, host) = pair(mode);
        (self.enqueue(transport), host)
    }

    /// Connect attempts so far, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Names of hosts successfully connected, in order
    pub fn connected_hosts(&self) -> Vec<String> {
        self.hosts.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<Arc<dyn Transport>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let next = self.transports.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(transport) => {
                if let Ok(mut hosts) = self.hosts.lock() {
                    hosts.push(host.name.clone());
                }
                Ok(transport as Arc<dyn Transport>)
            }
            None => Err(ConnectionError::Refused(format!(
                "no in-memory transport for {}",
                host.name
            ))),
        }
    }
}
