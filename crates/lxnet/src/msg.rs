//! The wire unit: a length-prefixed message buffer.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |                    |
//! +-------------------+--------------------+
//! ```
//!
//! Unlike a bare payload prefix, the length counts the **whole** unit,
//! header included. A message whose length does not exceed [`HEADER_SIZE`]
//! carries no payload and is never sent.

/// Size of the length field in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default upper bound on a message unit, header and trailing data included.
pub const DEFAULT_MAX_MSG_LEN: usize = 64 * 1024;

fn read_header(buf: &[u8]) -> usize {
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&buf[..HEADER_SIZE]);
    u32::from_le_bytes(header) as usize
}

fn write_header(buf: &mut [u8], length: usize) {
    buf[..HEADER_SIZE].copy_from_slice(&(length as u32).to_le_bytes());
}

/// A caller-owned, length-prefixed message.
///
/// The buffer always holds at least the header; past that it is exactly
/// `length()` bytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    buf: Vec<u8>,
}

impl Default for Msg {
    fn default() -> Self {
        Self::new()
    }
}

impl Msg {
    /// An empty message (length == [`HEADER_SIZE`]).
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// An empty message with room for `payload` bytes.
    pub fn with_capacity(payload: usize) -> Self {
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload);
        buf.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        Self { buf }
    }

    /// A message carrying `payload`.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut msg = Self::with_capacity(payload.len());
        msg.push(payload);
        msg
    }

    /// Rebuild a message from a complete frame (header included).
    ///
    /// The caller guarantees the header matches `frame.len()`.
    pub(crate) fn from_frame(frame: Vec<u8>) -> Self {
        debug_assert!(frame.len() >= HEADER_SIZE && read_header(&frame) == frame.len());
        Self { buf: frame }
    }

    /// Length of the whole unit as recorded in the header.
    pub fn length(&self) -> usize {
        read_header(&self.buf)
    }

    /// Overwrite the header, resizing the buffer to match.
    ///
    /// Growing pads the payload with zeros. Values below [`HEADER_SIZE`] are
    /// recorded as-is but keep the header bytes in place, which yields a
    /// message every send path rejects.
    pub fn set_length(&mut self, length: usize) {
        self.buf.resize(length.max(HEADER_SIZE), 0);
        write_header(&mut self.buf, length);
    }

    /// Payload bytes (everything after the header).
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }

    /// The full unit, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the message, returning the full unit.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw payload bytes.
    pub fn push(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        let length = self.buf.len();
        write_header(&mut self.buf, length);
        self
    }

    /// Append a byte.
    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.push(&[value])
    }

    /// Append a little-endian `u16`.
    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    /// Append a little-endian `u32`.
    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    /// Append a little-endian `i64`.
    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    /// Append a string as a `u16` byte count followed by its UTF-8 bytes.
    ///
    /// Strings longer than `u16::MAX` bytes are truncated at a char boundary.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.push_u16(end as u16);
        self.push(&value.as_bytes()[..end])
    }

    /// A cursor over the payload.
    pub fn reader(&self) -> MsgReader<'_> {
        MsgReader {
            payload: self.payload(),
            pos: 0,
        }
    }
}

/// Sequential reader over a message payload.
///
/// Every read returns `None` once the payload is exhausted.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> MsgReader<'a> {
    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.payload.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Some(out)
    }

    /// Read a byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|b| b[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a little-endian `i64`.
    pub fn read_i64(&mut self) -> Option<i64> {
        self.read_array().map(i64::from_le_bytes)
    }

    /// Read a string written by [`Msg::push_str`].
    pub fn read_str(&mut self) -> Option<&'a str> {
        let len = self.read_u16()? as usize;
        std::str::from_utf8(self.read_bytes(len)?).ok()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }
}
