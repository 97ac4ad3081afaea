//! Transports carrying JSON-RPC frames to and from a host
//!
//! A transport moves opaque text frames. Push transports deliver replies and
//! notifications on a single inbound stream; request-response transports hand
//! the reply straight back from [`Transport::send`] and have no stream.

pub mod http;
pub mod memory;
pub mod tcp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use kr_core::{ConnectionError, HostDescriptor, TransportMode};

pub use http::HttpTransport;
pub use memory::{MemoryConnector, MemoryTransport};
pub use tcp::TcpTransport;

/// Stream of inbound frames; exhaustion means the connection is gone
pub type InboundStream = BoxStream<'static, Result<String, ConnectionError>>;

/// An open connection to a host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which delivery model this transport implements
    fn mode(&self) -> TransportMode;

    /// Send one frame.
    ///
    /// Request-response transports return the reply frame.
    async fn send(&self, frame: String) -> Result<Option<String>, ConnectionError>;

    /// Take the inbound frame stream. Yields `Some` at most once, and never
    /// for request-response transports.
    fn take_inbound(&self) -> Option<InboundStream>;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Opens transports to hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostDescriptor) -> Result<Arc<dyn Transport>, ConnectionError>;
}

/// Picks TCP or HTTP from the host's transport mode
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    connect_timeout: Duration,
}

impl DefaultConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<Arc<dyn Transport>, ConnectionError> {
        match host.mode {
            TransportMode::Push => {
                let transport = TcpTransport::connect(host, self.connect_timeout).await?;
                Ok(Arc::new(transport))
            }
            TransportMode::Polling => {
                let transport = HttpTransport::connect(host, self.connect_timeout).await?;
                Ok(Arc::new(transport))
            }
        }
    }
}
