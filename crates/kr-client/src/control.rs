//! Best-effort control channel to the host's event server
//!
//! Input events (button presses, mouse moves, text) travel as UDP datagrams
//! next to the JSON-RPC connection. Sends never block and never fail the
//! caller hard: a failed send disables the channel until
//! [`ControlChannel::reestablish`] is called.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kr_core::{BestEffortSendFailure, ConnectionError, HostDescriptor};
use kr_protocol::ControlMessage;

/// Keymap used for keyboard-style buttons
pub const KEYBOARD_MAP: &str = "KB";

/// UDP channel carrying control packets
pub struct ControlChannel {
    target: SocketAddr,
    device_name: String,
    uid: u32,
    sequence: AtomicU32,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

async fn bind_to(target: SocketAddr) -> Result<UdpSocket, ConnectionError> {
    let local: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| ConnectionError::from_io(&e))?;
    socket
        .connect(target)
        .await
        .map_err(|e| ConnectionError::from_io(&e))?;
    // `try_send` reports WouldBlock until write readiness has been observed once
    socket
        .writable()
        .await
        .map_err(|e| ConnectionError::from_io(&e))?;
    Ok(socket)
}

impl ControlChannel {
    /// Open a channel to the host's event-server port and announce the device
    pub async fn open(host: &HostDescriptor, device_name: &str) -> Result<Self, ConnectionError> {
        let addr = host.event_server_address();
        let target = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| ConnectionError::from_io(&e))?
            .next()
            .ok_or_else(|| ConnectionError::Unreachable(format!("{} did not resolve", addr)))?;

        Self::open_addr(target, device_name).await
    }

    /// Open a channel to an explicit address
    pub async fn open_addr(target: SocketAddr, device_name: &str) -> Result<Self, ConnectionError> {
        let socket = bind_to(target).await?;

        let channel = Self {
            target,
            device_name: device_name.to_string(),
            uid: rand::random(),
            sequence: AtomicU32::new(1),
            socket: Mutex::new(Some(Arc::new(socket))),
        };

        channel
            .send(&ControlMessage::Helo {
                device_name: channel.device_name.clone(),
            })
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        tracing::info!("Control channel open to {}", target);
        Ok(channel)
    }

    /// Address packets are sent to
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Client uid stamped on every packet
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Whether sends are currently attempted
    pub fn is_enabled(&self) -> bool {
        self.socket.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn disable(&self) {
        if let Ok(mut socket) = self.socket.lock() {
            socket.take();
        }
    }

    /// Send a message, fragmenting it if needed
    pub fn send(&self, message: &ControlMessage) -> Result<(), BestEffortSendFailure> {
        let socket = self
            .socket
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or(BestEffortSendFailure::Disabled)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let packets = message
            .into_packets(sequence, self.uid)
            .map_err(|e| BestEffortSendFailure::Encode(e.to_string()))?;

        for packet in packets {
            if let Err(e) = socket.try_send(&packet.encode()) {
                tracing::warn!(
                    "Control packet {:?} to {} failed, disabling channel: {}",
                    message.packet_type(),
                    self.target,
                    e
                );
                self.disable();
                return Err(BestEffortSendFailure::Io(e.to_string()));
            }
        }

        tracing::trace!(sequence, "Sent {:?}", message.packet_type());
        Ok(())
    }

    /// Replace the socket and announce the device again
    pub async fn reestablish(&self) -> Result<(), ConnectionError> {
        let socket = bind_to(self.target).await?;
        if let Ok(mut slot) = self.socket.lock() {
            *slot = Some(Arc::new(socket));
        }

        self.send(&ControlMessage::Helo {
            device_name: self.device_name.clone(),
        })
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        tracing::info!("Control channel to {} re-established", self.target);
        Ok(())
    }

    /// Say goodbye and disable the channel
    pub fn close(&self) {
        if self.is_enabled() {
            let _ = self.send(&ControlMessage::Bye);
        }
        self.disable();
    }

    /// Press and release a button
    pub fn button_press(&self, map: &str, button: &str) -> Result<(), BestEffortSendFailure> {
        self.send(&ControlMessage::ButtonDown {
            map: map.to_string(),
            button: button.to_string(),
        })?;
        self.send(&ControlMessage::ButtonUp {
            map: map.to_string(),
            button: button.to_string(),
        })
    }

    pub fn mouse_move(&self, x: u16, y: u16) -> Result<(), BestEffortSendFailure> {
        self.send(&ControlMessage::MouseMove { x, y })
    }

    pub fn send_text(&self, text: &str) -> Result<(), BestEffortSendFailure> {
        self.send(&ControlMessage::Text {
            text: text.to_string(),
        })
    }

    pub fn send_action(&self, action: &str) -> Result<(), BestEffortSendFailure> {
        self.send(&ControlMessage::Action {
            action: action.to_string(),
        })
    }

    /// Ping periodically so the host keeps the device registered
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = channel.send(&ControlMessage::Ping) {
                            tracing::debug!("Keepalive skipped: {}", e);
                        }
                    }
                }
            }
        })
    }
}
