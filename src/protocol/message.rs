//! Message type with structured body packing/unpacking.
//!
//! A [`Message`] is a tag plus a growable byte body. Fixed-width primitive
//! values are appended with [`Message::append`] and read back either at an
//! explicit offset with [`Message::read`] or sequentially through a
//! [`BodyReader`] cursor. The header is derived from the body at
//! transmission time, so the declared size can never disagree with the
//! buffer.
//!
//! Only sealed primitive types implement [`WireValue`]; trying to append a
//! struct or anything with internal pointers is a compile-time error.
//!
//! # Example
//!
//! ```
//! use meownet::protocol::{Message, MessageTag};
//!
//! let mut msg = Message::new(MessageTag::Login);
//! msg.append(123u64);
//!
//! let token: u64 = msg.read(0).unwrap();
//! assert_eq!(token, 123);
//! assert_eq!(msg.body_len(), 8);
//! ```

use bytes::{BufMut, BytesMut};

use super::wire_format::{Header, MessageTag};
use crate::error::{NetError, Result};

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that can be packed into a message body.
///
/// Implemented for the primitive integer and float types only; the trait is
/// sealed so arbitrary types cannot opt in. All values are transmitted in
/// Big Endian.
pub trait WireValue: sealed::Sealed + Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Append the big-endian bytes of `self` to `buf`.
    fn put(self, buf: &mut BytesMut);

    /// Read a value from the first [`Self::WIDTH`] bytes of `buf`.
    ///
    /// Callers must guarantee `buf.len() >= Self::WIDTH`.
    fn get(buf: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl WireValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn put(self, buf: &mut BytesMut) {
                    buf.put_slice(&self.to_be_bytes());
                }

                #[inline]
                fn get(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_wire_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// A complete protocol message: tag plus body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: MessageTag,
    body: BytesMut,
}

impl Message {
    /// Create an empty message with the given tag.
    pub fn new(tag: MessageTag) -> Self {
        Self {
            tag,
            body: BytesMut::new(),
        }
    }

    /// Create a message from a tag and an existing body buffer.
    pub fn with_body(tag: MessageTag, body: BytesMut) -> Self {
        Self { tag, body }
    }

    /// Message tag.
    #[inline]
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    /// Body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Consume the message and return the body buffer.
    pub fn into_body(self) -> BytesMut {
        self.body
    }

    /// Header describing this message at its current body length.
    pub fn header(&self) -> Header {
        Header::new(self.tag, self.body.len() as u32)
    }

    /// Append a fixed-width value to the body.
    pub fn append<T: WireValue>(&mut self, value: T) -> &mut Self {
        value.put(&mut self.body);
        self
    }

    /// Append raw bytes to the body.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.put_slice(bytes);
        self
    }

    /// Read a fixed-width value starting at `offset`.
    ///
    /// Fails with [`NetError::Framing`] if the body is shorter than
    /// `offset + T::WIDTH`; nothing is consumed on failure.
    pub fn read<T: WireValue>(&self, offset: usize) -> Result<T> {
        let end = offset
            .checked_add(T::WIDTH)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| {
                NetError::Framing(format!(
                    "body too short: need {} bytes at offset {}, body is {}",
                    T::WIDTH,
                    offset,
                    self.body.len()
                ))
            })?;
        Ok(T::get(&self.body[offset..end]))
    }

    /// Sequential reader over the body, starting at offset 0.
    pub fn reader(&self) -> BodyReader<'_> {
        BodyReader {
            body: &self.body,
            offset: 0,
        }
    }
}

/// Cursor for reading values sequentially out of a message body.
///
/// Each successful read advances the cursor by the value's width. A read
/// past the end of the body fails without advancing, so a `?` chain stops
/// at the first short read and leaves the remaining values unread.
#[derive(Debug)]
pub struct BodyReader<'a> {
    body: &'a [u8],
    offset: usize,
}

impl BodyReader<'_> {
    /// Read the next fixed-width value and advance.
    pub fn read<T: WireValue>(&mut self) -> Result<T> {
        let end = self
            .offset
            .checked_add(T::WIDTH)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| {
                NetError::Framing(format!(
                    "body too short: need {} bytes at offset {}, body is {}",
                    T::WIDTH,
                    self.offset,
                    self.body.len()
                ))
            })?;
        let value = T::get(&self.body[self.offset..end]);
        self.offset = end;
        Ok(value)
    }

    /// Bytes remaining after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.body.len() - self.offset
    }

    /// Current cursor offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The rest of the body from the cursor to the end, without advancing.
    #[inline]
    pub fn rest(&self) -> &[u8] {
        &self.body[self.offset..]
    }
}
