//! Tagged wire message buffer and sequential reader
//!
//! Every message on the wire is a flat byte buffer that begins with a
//! 4-character ASCII tag followed by fixed-order fields. Integers are
//! little-endian, booleans are a single `0`/`1` byte, and variable-length
//! blocks are prefixed with an `i32` length. A message can be embedded inside
//! another message as a counted block, which is how schema types nest.
//!
//! [`WireMessage`] is the append-only builder; [`WireReader`] is the matching
//! cursor. The reader refuses to run past the end of the buffer and can
//! assert that a schema consumed every byte, so malformed peer input turns
//! into a [`ProtocolError`] instead of garbage state.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::wire::TAG_LEN;
use crate::errors::{ProtocolError, ProtocolResult};

/// A 4-character ASCII message tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag([u8; TAG_LEN]);

impl MessageTag {
    /// Create a tag from a 4-byte string literal
    pub const fn new(tag: &[u8; TAG_LEN]) -> Self {
        MessageTag(*tag)
    }

    /// The raw tag bytes
    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A wire message: a flat byte buffer, usually starting with a tag
///
/// Extra-info blobs are also carried as (possibly empty, possibly untagged)
/// `WireMessage` values, so the type supports both forms. Equality is
/// byte-for-byte, which is what request/reply fingerprint matching relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    buf: BytesMut,
}

impl WireMessage {
    /// Create an empty, untagged message (e.g. an extra-info blob)
    pub fn new() -> Self {
        WireMessage { buf: BytesMut::new() }
    }

    /// Create a message that begins with the given tag
    pub fn tagged(tag: MessageTag) -> Self {
        let mut buf = BytesMut::with_capacity(TAG_LEN);
        buf.put_slice(tag.as_bytes());
        WireMessage { buf }
    }

    /// Reconstruct a message from raw bytes received off the wire
    pub fn from_bytes(bytes: impl Into<BytesMut>) -> Self {
        WireMessage { buf: bytes.into() }
    }

    /// Number of bytes in the message
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the message holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The complete message bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the message into a cheaply cloneable byte handle
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// The tag in the first four bytes, if the message is long enough
    pub fn tag(&self) -> Option<MessageTag> {
        if self.buf.len() < TAG_LEN {
            return None;
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.buf[..TAG_LEN]);
        Some(MessageTag(tag))
    }

    /// True if the message starts with the given tag
    pub fn has_tag(&self, tag: MessageTag) -> bool {
        self.tag() == Some(tag)
    }

    /// Append a single byte
    pub fn append_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Append a bool as one byte (1 = true, 0 = false)
    pub fn append_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Append a little-endian 32-bit integer
    pub fn append_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Append a little-endian 64-bit integer
    pub fn append_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Append a little-endian unsigned 16-bit integer
    pub fn append_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Append raw bytes with no length prefix
    pub fn append_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Append a length-prefixed byte block
    pub fn append_counted_bytes(&mut self, value: &[u8]) {
        self.append_i32(value.len() as i32);
        self.buf.put_slice(value);
    }

    /// Append a length-prefixed UTF-8 string
    pub fn append_str(&mut self, value: &str) {
        self.append_counted_bytes(value.as_bytes());
    }

    /// Embed another message as a length-prefixed block
    pub fn append_message(&mut self, value: &WireMessage) {
        self.append_counted_bytes(value.as_bytes());
    }

    /// Start reading the message body (positions the cursor after the tag)
    pub fn reader(&self) -> ProtocolResult<WireReader<'_>> {
        if self.buf.len() < TAG_LEN {
            return Err(ProtocolError::MissingTag { length: self.buf.len() });
        }
        Ok(WireReader { data: &self.buf[..], position: TAG_LEN })
    }
}

/// Sequential reader over a [`WireMessage`]
///
/// Every read advances the cursor and fails with
/// [`ProtocolError::Truncated`] rather than reading past the end.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// True once every byte has been consumed
    pub fn at_end(&self) -> bool {
        self.position == self.data.len()
    }

    /// Fail with a trailing-data error unless the reader is at the end
    pub fn expect_end(&self, schema: &'static str) -> ProtocolResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingData { schema, remaining: self.remaining() })
        }
    }

    fn take(&mut self, count: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::Truncated {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a bool byte (1 = true, anything else = false)
    pub fn read_bool(&mut self) -> ProtocolResult<bool> {
        Ok(self.read_u8()? == 1)
    }

    /// Read a little-endian 32-bit integer
    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("slice is 4 bytes")))
    }

    /// Read a little-endian 64-bit integer
    pub fn read_i64(&mut self) -> ProtocolResult<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("slice is 8 bytes")))
    }

    /// Read a little-endian unsigned 16-bit integer
    pub fn read_u16(&mut self) -> ProtocolResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("slice is 2 bytes")))
    }

    /// Read exactly `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> ProtocolResult<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read an `i32` length field, rejecting negative values
    pub fn read_len(&mut self, field: &'static str) -> ProtocolResult<usize> {
        let value = self.read_i32()?;
        if value < 0 {
            return Err(ProtocolError::InvalidField { field, value: value as i64 });
        }
        Ok(value as usize)
    }

    /// Read a length-prefixed byte block
    pub fn read_counted_bytes(&mut self, field: &'static str) -> ProtocolResult<Vec<u8>> {
        let len = self.read_len(field)?;
        self.read_bytes(len)
    }

    /// Read an embedded length-prefixed message
    pub fn read_message(&mut self) -> ProtocolResult<WireMessage> {
        let bytes = self.read_counted_bytes("embedded message length")?;
        Ok(WireMessage::from_bytes(&bytes[..]))
    }
}
