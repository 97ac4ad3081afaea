//! Event-server control packets
//!
//! Raw input (buttons, mouse, text) goes to the host's UDP event server,
//! bypassing the JSON-RPC envelope. Every datagram carries a 32-byte header:
//!
//! ```text
//! [signature:4 "XBMC"][major:1][minor:1][type:2][sequence:4][fragment:2]
//! [flags:1][reserved:1][payload_len:2][uid:4][reserved:10]
//! ```
//!
//! All multi-byte integers are big-endian. Payloads larger than
//! [`MAX_PACKET_PAYLOAD`] are split into fragments that share one sequence
//! number; every fragment except the last has [`FLAG_MORE_FRAGMENTS`] set.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Packet signature
pub const SIGNATURE: &[u8; 4] = b"XBMC";

/// Protocol major version
pub const VERSION_MAJOR: u8 = 2;

/// Protocol minor version
pub const VERSION_MINOR: u8 = 0;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 32;

/// Maximum payload carried by one packet
pub const MAX_PACKET_PAYLOAD: usize = 1024;

/// Flag bit: another fragment of the same sequence follows
pub const FLAG_MORE_FRAGMENTS: u8 = 0x01;

/// Control packet type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Client registration, carries the device name
    Helo = 0x01,
    /// Client is going away
    Bye = 0x02,
    /// Button pressed
    ButtonDown = 0x03,
    /// Button released
    ButtonUp = 0x04,
    /// Absolute mouse position
    MouseMove = 0x05,
    /// Keepalive
    Ping = 0x06,
    /// On-screen notification
    Notification = 0x07,
    /// Named built-in action
    Action = 0x0A,
    /// Text for the active input field
    Text = 0x0B,
}

impl PacketType {
    /// Convert from the wire value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::Helo),
            0x02 => Some(PacketType::Bye),
            0x03 => Some(PacketType::ButtonDown),
            0x04 => Some(PacketType::ButtonUp),
            0x05 => Some(PacketType::MouseMove),
            0x06 => Some(PacketType::Ping),
            0x07 => Some(PacketType::Notification),
            0x0A => Some(PacketType::Action),
            0x0B => Some(PacketType::Text),
            _ => None,
        }
    }

    /// Get the wire value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// Fixed-size header preceding every control packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Logical message sequence, shared by all fragments of one message
    pub sequence: u32,
    /// Zero-based fragment index within the sequence
    pub fragment: u16,
    pub flags: u8,
    pub payload_length: u16,
    /// Client token identifying this sender to the host
    pub uid: u32,
}

impl PacketHeader {
    /// Whether another fragment follows this one
    pub fn has_more_fragments(&self) -> bool {
        self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_slice(SIGNATURE);
        dst.put_u8(VERSION_MAJOR);
        dst.put_u8(VERSION_MINOR);
        dst.put_u16(self.packet_type.as_u16());
        dst.put_u32(self.sequence);
        dst.put_u16(self.fragment);
        dst.put_u8(self.flags);
        dst.put_u8(0);
        dst.put_u16(self.payload_length);
        dst.put_u32(self.uid);
        dst.put_bytes(0, 10);
    }

    /// Decode a header from the start of `src`
    pub fn decode(mut src: &[u8]) -> Result<Self, CodecError> {
        if src.len() < HEADER_SIZE {
            return Err(CodecError::IncompletePacket {
                expected: HEADER_SIZE,
                actual: src.len(),
            });
        }
        if &src[..4] != SIGNATURE {
            return Err(CodecError::InvalidHeader("bad signature"));
        }
        src.advance(4);

        let major = src.get_u8();
        let _minor = src.get_u8();
        if major != VERSION_MAJOR {
            return Err(CodecError::InvalidHeader("unsupported version"));
        }

        let type_value = src.get_u16();
        let packet_type =
            PacketType::from_u16(type_value).ok_or(CodecError::UnknownPacketType(type_value))?;
        let sequence = src.get_u32();
        let fragment = src.get_u16();
        let flags = src.get_u8();
        let _reserved = src.get_u8();
        let payload_length = src.get_u16();
        let uid = src.get_u32();

        Ok(Self {
            packet_type,
            sequence,
            fragment,
            flags,
            payload_length,
            uid,
        })
    }
}

/// A complete datagram: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl ControlPacket {
    /// Serialize to datagram bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a datagram
    pub fn decode(datagram: &[u8]) -> Result<Self, CodecError> {
        let header = PacketHeader::decode(datagram)?;
        let len = header.payload_length as usize;
        if len > MAX_PACKET_PAYLOAD {
            return Err(CodecError::PayloadTooLarge {
                size: len,
                max: MAX_PACKET_PAYLOAD,
            });
        }
        let body = &datagram[HEADER_SIZE..];
        if body.len() < len {
            return Err(CodecError::IncompletePacket {
                expected: HEADER_SIZE + len,
                actual: datagram.len(),
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&body[..len]),
        })
    }
}

/// Typed input message before framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Helo { device_name: String },
    Bye,
    /// Button from a keymap (`KB`, `R1`, ...) pressed down
    ButtonDown { map: String, button: String },
    ButtonUp { map: String, button: String },
    MouseMove { x: u16, y: u16 },
    Ping,
    Notification { title: String, message: String },
    Action { action: String },
    Text { text: String },
}

impl ControlMessage {
    /// Packet type this message travels as
    pub fn packet_type(&self) -> PacketType {
        match self {
            ControlMessage::Helo { .. } => PacketType::Helo,
            ControlMessage::Bye => PacketType::Bye,
            ControlMessage::ButtonDown { .. } => PacketType::ButtonDown,
            ControlMessage::ButtonUp { .. } => PacketType::ButtonUp,
            ControlMessage::MouseMove { .. } => PacketType::MouseMove,
            ControlMessage::Ping => PacketType::Ping,
            ControlMessage::Notification { .. } => PacketType::Notification,
            ControlMessage::Action { .. } => PacketType::Action,
            ControlMessage::Text { .. } => PacketType::Text,
        }
    }

    /// Encode the payload (strings are NUL-terminated)
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            ControlMessage::Helo { device_name } => {
                // icon type: none
                buf.put_u8(0);
                put_cstr(&mut buf, device_name);
            }
            ControlMessage::Bye | ControlMessage::Ping => {}
            ControlMessage::ButtonDown { map, button }
            | ControlMessage::ButtonUp { map, button } => {
                put_cstr(&mut buf, map);
                put_cstr(&mut buf, button);
            }
            ControlMessage::MouseMove { x, y } => {
                buf.put_u16(*x);
                buf.put_u16(*y);
            }
            ControlMessage::Notification { title, message } => {
                put_cstr(&mut buf, title);
                put_cstr(&mut buf, message);
            }
            ControlMessage::Action { action } => put_cstr(&mut buf, action),
            ControlMessage::Text { text } => buf.put_slice(text.as_bytes()),
        }
        buf.freeze()
    }

    /// Split into one or more packets sharing `sequence`
    pub fn into_packets(&self, sequence: u32, uid: u32) -> Result<Vec<ControlPacket>, CodecError> {
        fragment(self.packet_type(), &self.payload(), sequence, uid)
    }
}

fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Split a payload into ordered fragments.
///
/// Always yields at least one packet, even for an empty payload.
pub fn fragment(
    packet_type: PacketType,
    payload: &[u8],
    sequence: u32,
    uid: u32,
) -> Result<Vec<ControlPacket>, CodecError> {
    let max = MAX_PACKET_PAYLOAD * u16::MAX as usize;
    if payload.len() > max {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(MAX_PACKET_PAYLOAD).collect()
    };
    let last = chunks.len() - 1;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(idx, chunk)| ControlPacket {
            header: PacketHeader {
                packet_type,
                sequence,
                fragment: idx as u16,
                flags: if idx < last { FLAG_MORE_FRAGMENTS } else { 0 },
                payload_length: chunk.len() as u16,
                uid,
            },
            payload: Bytes::copy_from_slice(chunk),
        })
        .collect())
}

/// Put fragments of one sequence back together.
///
/// Fragments must be supplied in order, start at index 0, share a sequence
/// number, and only the final one may lack the more-fragments flag.
pub fn reassemble(packets: &[ControlPacket]) -> Result<Bytes, CodecError> {
    let first = packets.first().ok_or(CodecError::Reassembly {
        sequence: 0,
        reason: "no fragments",
    })?;
    let sequence = first.header.sequence;
    let mut out = BytesMut::new();

    for (idx, packet) in packets.iter().enumerate() {
        let header = &packet.header;
        if header.sequence != sequence {
            return Err(CodecError::Reassembly {
                sequence,
                reason: "mixed sequence numbers",
            });
        }
        if header.fragment as usize != idx {
            return Err(CodecError::Reassembly {
                sequence,
                reason: "fragment out of order",
            });
        }
        let is_last = idx == packets.len() - 1;
        if header.has_more_fragments() == is_last {
            return Err(CodecError::Reassembly {
                sequence,
                reason: "continuation flag mismatch",
            });
        }
        out.extend_from_slice(&packet.payload);
    }

    Ok(out.freeze())
}
