//! Push transport over a raw TCP stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use kr_core::{ConnectionError, HostDescriptor, TransportMode};
use kr_protocol::{CodecError, JsonObjectCodec};

use super::{InboundStream, Transport};

/// TCP connection carrying back-to-back JSON objects in both directions
pub struct TcpTransport {
    peer: String,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, JsonObjectCodec>>,
    reader: Mutex<Option<FramedRead<OwnedReadHalf, JsonObjectCodec>>>,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Connect to the host's TCP JSON-RPC port
    pub async fn connect(host: &HostDescriptor, timeout: Duration) -> Result<Self, ConnectionError> {
        let addr = host.tcp_address();
        tracing::debug!("Connecting to {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
            .map_err(|e| ConnectionError::from_io(&e))?;

        Self::from_stream(stream, addr)
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, peer: impl Into<String>) -> Result<Self, ConnectionError> {
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::from_io(&e))?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            peer: peer.into(),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, JsonObjectCodec::new())),
            reader: Mutex::new(Some(FramedRead::new(read_half, JsonObjectCodec::new()))),
            closed: AtomicBool::new(false),
        })
    }

    /// Remote address this transport talks to
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

fn codec_to_connection_error(err: CodecError) -> ConnectionError {
    match err {
        CodecError::Io(e) => ConnectionError::from_io(&e),
        other => ConnectionError::Lost(other.to_string()),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }

    async fn send(&self, frame: String) -> Result<Option<String>, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }

        tracing::trace!(peer = %self.peer, "-> {}", frame);
        let mut writer = self.writer.lock().await;
        writer
            .send(frame)
            .await
            .map_err(codec_to_connection_error)?;
        Ok(None)
    }

    fn take_inbound(&self) -> Option<InboundStream> {
        let reader = self.reader.lock().ok()?.take()?;
        let peer = self.peer.clone();

        let stream = reader.map(move |item| {
            item.map(|frame| {
                tracing::trace!(peer = %peer, "<- {}", frame);
                frame
            })
            .map_err(codec_to_connection_error)
        });

        Some(stream.boxed())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(mut reader) = self.reader.lock() {
            reader.take();
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!("Error shutting down stream to {}: {}", self.peer, e);
        }
        tracing::debug!("Closed TCP transport to {}", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = HostDescriptor {
            tcp_port: addr.port(),
            ..HostDescriptor::new("test", "127.0.0.1")
        };

        let (client, server) = tokio::join!(
            TcpTransport::connect(&host, Duration::from_secs(5)),
            listener.accept()
        );
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn test_frames_split_across_writes() {
        let (transport, mut server) = connected_pair().await;
        let mut inbound = transport.take_inbound().unwrap();
        assert!(transport.take_inbound().is_none());

        server.write_all(br#"{"id":1,"resu"#).await.unwrap();
        server.write_all(br#"lt":"OK"}{"method":"System.OnWake","params":{}}"#).await.unwrap();

        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            r#"{"id":1,"result":"OK"}"#
        );
        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            r#"{"method":"System.OnWake","params":{}}"#
        );
    }

    #[tokio::test]
    async fn test_send_writes_raw_frame() {
        let (transport, mut server) = connected_pair().await;

        let reply = transport.send(r#"{"id":7}"#.to_string()).await.unwrap();
        assert!(reply.is_none());

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, br#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_stream_ends_when_peer_closes() {
        let (transport, server) = connected_pair().await;
        let mut inbound = transport.take_inbound().unwrap();

        drop(server);
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _server) = connected_pair().await;
        transport.close().await;
        transport.close().await;

        assert_eq!(
            transport.send("{}".to_string()).await,
            Err(ConnectionError::Closed)
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let host = HostDescriptor {
            tcp_port: port,
            ..HostDescriptor::new("test", "127.0.0.1")
        };
        let err = TcpTransport::connect(&host, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Refused(_)));
    }
}
