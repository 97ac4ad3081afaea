//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum CodecError {
    /// Control packet header is malformed
    #[error("Invalid packet header: {0}")]
    InvalidHeader(&'static str),

    /// Unknown control packet type
    #[error("Unknown packet type: {0:#06x}")]
    UnknownPacketType(u16),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Incomplete packet received
    #[error("Incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket { expected: usize, actual: usize },

    /// Fragments could not be put back together
    #[error("Cannot reassemble sequence {sequence}: {reason}")]
    Reassembly { sequence: u32, reason: &'static str },

    /// A JSON frame could not be parsed as an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
