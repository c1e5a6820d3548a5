//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────┬───────────┐
//! │ Tag      │ Body len  │
//! │ 4 bytes  │ 4 bytes   │
//! │ uint32 BE│ uint32 BE │
//! └──────────┴───────────┘
//! ```
//!
//! All multi-byte integers on the wire are Big Endian.

use crate::error::{NetError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum body size (16 MiB). A header declaring more than this
/// is rejected as a framing error before any body bytes are read.
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Message tags: the closed set of message kinds this protocol carries.
///
/// The discriminant is the `u32` transmitted in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageTag {
    /// Server → client acknowledgment, empty body.
    Accept = 0,
    /// Client → server, body is an 8-byte token.
    Login = 1,
    /// Client → server, empty body.
    Logout = 2,
    /// Either direction, body is raw text bytes.
    Message = 3,
    /// Client → server request (8-byte token body); server → client
    /// response (serialized profile bytes).
    Profile = 4,
}

impl MessageTag {
    /// Decode a wire tag value. Returns `None` for values outside the
    /// closed set.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MessageTag::Accept),
            1 => Some(MessageTag::Login),
            2 => Some(MessageTag::Logout),
            3 => Some(MessageTag::Message),
            4 => Some(MessageTag::Profile),
            _ => None,
        }
    }

    /// The `u32` transmitted in the header.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message tag.
    pub tag: MessageTag,
    /// Body length in bytes. Zero is a valid "no body" message.
    pub body_len: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(tag: MessageTag, body_len: u32) -> Self {
        Self { tag, body_len }
    }

    /// Encode the header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.tag.as_u32().to_be_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }

    /// Decode a header from bytes (Big Endian).
    ///
    /// Fails if the buffer is shorter than [`HEADER_SIZE`] or the tag is
    /// outside the closed set.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(NetError::Framing(format!(
                "header needs {} bytes, have {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        let raw_tag = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let tag = MessageTag::from_u32(raw_tag)
            .ok_or_else(|| NetError::Framing(format!("unknown message tag {}", raw_tag)))?;
        let body_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { tag, body_len })
    }

    /// Validate the declared body length against a maximum.
    pub fn validate(&self, max_body_size: u32) -> Result<()> {
        if self.body_len > max_body_size {
            return Err(NetError::Framing(format!(
                "body size {} exceeds maximum {}",
                self.body_len, max_body_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(MessageTag::Login, 8);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(MessageTag::Profile, 0x01020304);
        let bytes = header.encode();

        // Tag: 4 in BE
        assert_eq!(&bytes[0..4], &[0, 0, 0, 4]);

        // Body length: 0x01020304 in BE
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        let header = Header::new(MessageTag::Accept, 0);
        assert_eq!(header.encode().len(), 8);
    }

    #[test]
    fn test_empty_body_is_valid() {
        let header = Header::new(MessageTag::Accept, 0);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded.body_len, 0);
        assert!(decoded.validate(DEFAULT_MAX_BODY_SIZE).is_ok());
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        let result = Header::decode(&buf);
        assert!(matches!(result, Err(NetError::Framing(_))));
    }

    #[test]
    fn test_decode_unknown_tag_rejected() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&99u32.to_be_bytes());
        let result = Header::decode(&buf);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unknown message tag 99"));
    }

    #[test]
    fn test_validate_body_too_large() {
        let header = Header::new(MessageTag::Message, 1_000_000);
        let result = header.validate(100);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_tag_roundtrip_all_variants() {
        for tag in [
            MessageTag::Accept,
            MessageTag::Login,
            MessageTag::Logout,
            MessageTag::Message,
            MessageTag::Profile,
        ] {
            assert_eq!(MessageTag::from_u32(tag.as_u32()), Some(tag));
        }
        assert_eq!(MessageTag::from_u32(5), None);
    }
}
