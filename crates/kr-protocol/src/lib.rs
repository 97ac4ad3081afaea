//! kr-protocol: Wire formats for Kore Remote
//!
//! This crate defines what travels between the client and a media-center
//! host: JSON-RPC envelopes on the command connection, typed notification
//! events, and the fixed-header datagrams understood by the host's event
//! server. It performs no I/O.

pub mod codec;
pub mod error;
pub mod event;
pub mod packet;
pub mod rpc;

pub use codec::{JsonObjectCodec, MAX_FRAME_SIZE};
pub use error::CodecError;
pub use event::{
    ApplicationEvent, InputEvent, MediaItem, MediaTime, NotificationEvent, ObserverRole,
    PlayerEvent, PlayerRef, PlayerSnapshot, PlaylistEvent, SystemEvent,
};
pub use packet::{
    fragment, reassemble, ControlMessage, ControlPacket, PacketHeader, PacketType, HEADER_SIZE,
    MAX_PACKET_PAYLOAD,
};
pub use rpc::{InboundMessage, Request, RequestId, RpcError, JSONRPC_VERSION};
