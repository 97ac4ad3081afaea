//! Tokio codec for the push-mode JSON stream
//!
//! The host writes complete JSON objects back to back on the TCP stream with
//! no length prefix or delimiter. The decoder tracks brace depth (ignoring
//! braces inside string literals) to find object boundaries.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Maximum size of a single JSON frame (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec splitting a byte stream into JSON object frames
#[derive(Debug, Default)]
pub struct JsonObjectCodec {
    /// Bytes of the current frame already scanned
    scanned: usize,
    /// Current brace nesting depth
    depth: usize,
    /// Inside a string literal
    in_string: bool,
    /// Previous byte was a backslash inside a string
    escaped: bool,
}

impl JsonObjectCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

impl Decoder for JsonObjectCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Skip whitespace and stray bytes between frames
        if self.scanned == 0 {
            let start = src.iter().position(|b| *b == b'{');
            match start {
                Some(0) => {}
                Some(n) => {
                    if src[..n].iter().any(|b| !b.is_ascii_whitespace()) {
                        tracing::warn!("Discarding {} bytes of non-object data", n);
                    }
                    src.advance(n);
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
        }

        let mut end = None;
        for (offset, byte) in src[self.scanned..].iter().enumerate() {
            let idx = self.scanned + offset;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if *byte == b'\\' {
                    self.escaped = true;
                } else if *byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        end = Some(idx + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(len) => {
                let frame = src.split_to(len);
                self.reset();
                match String::from_utf8(frame.to_vec()) {
                    Ok(text) => Ok(Some(text)),
                    Err(_) => {
                        // Drop the frame, keep the stream
                        tracing::warn!("Skipping {} byte frame that is not valid UTF-8", len);
                        self.decode(src)
                    }
                }
            }
            None => {
                self.scanned = src.len();
                if self.scanned > MAX_FRAME_SIZE {
                    let size = self.scanned;
                    self.reset();
                    src.clear();
                    return Err(CodecError::PayloadTooLarge {
                        size,
                        max: MAX_FRAME_SIZE,
                    });
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for JsonObjectCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}
