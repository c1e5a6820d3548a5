//! Protocol module - wire format and message framing.
//!
//! This module implements the binary framing for the wire:
//! - 8-byte header encoding/decoding
//! - `Message` with structured body packing/unpacking

mod message;
mod wire_format;

pub use message::{BodyReader, Message, WireValue};
pub use wire_format::{Header, MessageTag, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
