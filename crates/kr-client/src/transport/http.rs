//! Polling transport over HTTP POST
//!
//! Each frame is POSTed to the host's `/jsonrpc` endpoint and the response
//! body is the reply frame. Hosts never push over this transport, so
//! notifications are emulated by the dispatcher's poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use kr_core::{ConnectionError, HostDescriptor, TransportMode};

use super::{InboundStream, Transport};

const PING_FRAME: &str = r#"{"jsonrpc":"2.0","id":0,"method":"JSONRPC.Ping"}"#;

/// HTTP JSON-RPC transport
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, Option<String>)>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Build the client and probe the endpoint so unreachable hosts fail here
    pub async fn connect(host: &HostDescriptor, timeout: Duration) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        let transport = Self {
            client,
            endpoint: host.http_endpoint(),
            credentials: host
                .username
                .clone()
                .map(|user| (user, host.password.clone())),
            closed: AtomicBool::new(false),
        };

        tracing::debug!("Probing {}", transport.endpoint);
        tokio::time::timeout(timeout, transport.post(PING_FRAME.to_string()))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))??;

        tracing::info!("HTTP endpoint {} is reachable", transport.endpoint);
        Ok(transport)
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, frame: String) -> Result<String, ConnectionError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(frame);

        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.map_err(classify)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ConnectionError::AuthenticationFailed)
            }
            status if status.is_success() => response.text().await.map_err(classify),
            status => Err(ConnectionError::Lost(format!(
                "{} answered HTTP {}",
                self.endpoint, status
            ))),
        }
    }
}

fn classify(err: reqwest::Error) -> ConnectionError {
    if err.is_connect() {
        ConnectionError::Unreachable(err.to_string())
    } else if err.is_timeout() {
        ConnectionError::Lost(format!("request timed out: {}", err))
    } else {
        ConnectionError::Lost(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    async fn send(&self, frame: String) -> Result<Option<String>, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }

        tracing::trace!(endpoint = %self.endpoint, "-> {}", frame);
        let reply = self.post(frame).await?;
        tracing::trace!(endpoint = %self.endpoint, "<- {}", reply);
        Ok(Some(reply))
    }

    fn take_inbound(&self) -> Option<InboundStream> {
        None
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closed HTTP transport to {}", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP responder answering every request with `reply`
    async fn serve(status_line: &'static str, reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        reply.len(),
                        reply
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        port
    }

    fn host_on(port: u16) -> HostDescriptor {
        HostDescriptor {
            http_port: port,
            ..HostDescriptor::new("test", "127.0.0.1").with_mode(TransportMode::Polling)
        }
    }

    #[tokio::test]
    async fn test_send_returns_reply_body() {
        let port = serve("HTTP/1.1 200 OK", r#"{"id":0,"jsonrpc":"2.0","result":"pong"}"#).await;
        let transport = HttpTransport::connect(&host_on(port), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(transport.take_inbound().is_none());
        let reply = transport.send(PING_FRAME.to_string()).await.unwrap();
        assert_eq!(reply.as_deref(), Some(r#"{"id":0,"jsonrpc":"2.0","result":"pong"}"#));
    }

    #[tokio::test]
    async fn test_unauthorized_is_connection_error() {
        let port = serve("HTTP/1.1 401 Unauthorized", "").await;
        let err = HttpTransport::connect(&host_on(port), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert_eq!(err, ConnectionError::AuthenticationFailed);
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = HttpTransport::connect(&host_on(port), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Unreachable(_)));
    }
}
