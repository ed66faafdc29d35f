//! Fixed-capacity packet buffer with dual-cursor typed I/O.
//!
//! A [`Message`] exclusively owns one packet-sized byte buffer and tracks
//! three offsets into it:
//!
//! ```text
//! 0 ≤ raw_cursor ≤ size ≤ CAPACITY
//! HEADER_SIZE ≤ payload_cursor ≤ size      (after any skip_header)
//! ```
//!
//! - `size` is the high-water mark of bytes occupied (header + payload).
//! - `payload_cursor` is where the *user's* next typed read or write lands.
//! - `raw_cursor` is where the *framer's* next raw byte lands.
//!
//! The two cursors exist because the framer lays a packet down from offset 0
//! (header included) while user code addresses fields starting after the
//! header. Folding them into one cursor would force each side to re-seek
//! around the other's position on every resume.
//!
//! The header size field (bytes 0..2) may disagree with `size` while a
//! packet is being assembled; [`Message::packet`] synthesizes the field from
//! `size` when the packet is sealed for the wire, and
//! [`Message::sync_size_from_header`] adopts the field after assembly.

use crate::{
    codec,
    errors::MessageError,
    header::FrameHeader,
};

/// Origin for [`Message::seek`] and [`Message::raw_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Offset from the start of the region.
    Begin,
    /// Offset from the current cursor position.
    Current,
    /// Offset from the last byte of the region.
    End,
}

/// One protocol packet: a fixed-capacity buffer, the assembled size, and
/// the payload/raw cursors.
///
/// Construction zeroes the buffer and positions the payload cursor just
/// past the header, so a fresh message is immediately writable:
///
/// ```
/// use strake_proto::Message;
///
/// let mut msg = Message::new();
/// msg.set_message_type(3);
/// msg.write_str("Hello").unwrap();
/// let wire = msg.packet();
/// assert_eq!(wire, [0x0B, 0x00, 0x00, 0x03, 0x05, 0x00, b'H', b'e', b'l', b'l', b'o']);
/// ```
pub struct Message {
    buf: Box<[u8]>,
    size: usize,
    payload_cursor: usize,
    raw_cursor: usize,
}

impl Message {
    /// Buffer capacity of every message (equals the wire packet cap).
    pub const CAPACITY: usize = FrameHeader::MAX_PACKET_SIZE;

    /// Length of the fixed packet header.
    pub const HEADER_SIZE: usize = FrameHeader::SIZE;

    /// Allocate a zeroed message with the payload cursor past the header.
    #[must_use]
    pub fn new() -> Self {
        let mut msg = Self {
            buf: vec![0u8; Self::CAPACITY].into_boxed_slice(),
            size: 0,
            payload_cursor: 0,
            raw_cursor: 0,
        };
        msg.skip_header();
        msg
    }

    /// Return the message to its freshly-constructed state.
    ///
    /// Zeroes the used region of the buffer, rewinds both cursors, and
    /// re-applies [`skip_header`](Self::skip_header).
    pub fn reset(&mut self) {
        let used = self.size.max(self.payload_cursor).max(self.raw_cursor);
        self.buf[..used].fill(0);
        self.size = 0;
        self.payload_cursor = 0;
        self.raw_cursor = 0;
        self.skip_header();
    }

    /// Advance the payload cursor and size past the header region.
    ///
    /// Idempotent: neither value ever moves backwards.
    pub fn skip_header(&mut self) {
        self.payload_cursor = self.payload_cursor.max(Self::HEADER_SIZE);
        self.size = self.size.max(Self::HEADER_SIZE);
    }

    /// The message type byte (offset 3).
    #[must_use]
    pub fn message_type(&self) -> u8 {
        self.buf[3]
    }

    /// Set the message type byte (offset 3).
    pub fn set_message_type(&mut self, message_type: u8) {
        self.buf[3] = message_type;
    }

    /// Packet length claimed by the header bytes 0..2 (u24 LE).
    ///
    /// May differ from [`len`](Self::len) while a packet is being
    /// assembled or before [`packet`](Self::packet) has sealed it.
    #[must_use]
    pub fn declared_size(&self) -> u32 {
        codec::decode_u24(&self.buf[..3])
    }

    /// Adopt the header-declared length as the message size.
    ///
    /// Used by the framer once all declared bytes have been laid down. The
    /// value is clamped to the buffer capacity; the framer validates the
    /// declared length before any payload byte is accepted, so the clamp
    /// never engages on a framed packet.
    pub fn sync_size_from_header(&mut self) {
        self.size = (self.declared_size() as usize).min(Self::CAPACITY);
    }

    /// Whether a complete, plausible header is present.
    #[must_use]
    pub fn has_header(&self) -> bool {
        self.size >= Self::HEADER_SIZE && self.declared_size() as usize >= Self::HEADER_SIZE
    }

    /// Total bytes occupied (header + payload).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the message holds nothing beyond the header region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size <= Self::HEADER_SIZE
    }

    /// Payload bytes occupied (excludes the header).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.size.saturating_sub(Self::HEADER_SIZE)
    }

    /// Buffer capacity (constant).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        Self::CAPACITY
    }

    /// Current payload cursor offset, relative to the start of the payload.
    #[must_use]
    pub fn payload_position(&self) -> usize {
        self.payload_cursor - Self::HEADER_SIZE
    }

    /// Current raw cursor offset from the start of the buffer.
    #[must_use]
    pub fn raw_position(&self) -> usize {
        self.raw_cursor
    }

    /// Read-only view of the assembled payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[Self::HEADER_SIZE..self.size]
    }

    /// Move the payload cursor.
    ///
    /// Offsets are relative to the payload region: `(0, Begin)` addresses
    /// the first payload byte, `(0, End)` the last. Seeking to offset 0 of
    /// an empty payload is legal (there is nothing to address, but the
    /// position is coherent); any other target outside `[0, payload_len)`
    /// fails.
    ///
    /// # Errors
    ///
    /// [`MessageError::OutOfRange`] when the resolved target is negative or
    /// past the payload, per the rule above.
    pub fn seek(&mut self, delta: i64, origin: SeekOrigin) -> Result<(), MessageError> {
        let len = self.payload_len();
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.payload_position() as i64,
            SeekOrigin::End => len as i64 - 1,
        };
        let target = base + delta;
        Self::check_seek(target, len)?;
        self.payload_cursor = Self::HEADER_SIZE + target as usize;
        Ok(())
    }

    /// Move the raw cursor.
    ///
    /// Same rules as [`seek`](Self::seek), over the whole occupied region
    /// `[0, len)` instead of the payload.
    ///
    /// # Errors
    ///
    /// [`MessageError::OutOfRange`] on an invalid target.
    pub fn raw_seek(&mut self, delta: i64, origin: SeekOrigin) -> Result<(), MessageError> {
        let len = self.size;
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.raw_cursor as i64,
            SeekOrigin::End => len as i64 - 1,
        };
        let target = base + delta;
        Self::check_seek(target, len)?;
        self.raw_cursor = target as usize;
        Ok(())
    }

    fn check_seek(target: i64, len: usize) -> Result<(), MessageError> {
        let empty_origin = target == 0 && len == 0;
        if target < 0 || (target >= len as i64 && !empty_origin) {
            return Err(MessageError::OutOfRange { target, len });
        }
        Ok(())
    }

    /// Reserve `width` bytes at the payload cursor for writing.
    ///
    /// Advances the cursor and grows `size` to cover the written region.
    /// The overflow check measures from the cursor position, so rewriting
    /// inside an already-assembled payload never trips it.
    fn write_slot(&mut self, width: usize) -> Result<&mut [u8], MessageError> {
        let start = self.payload_cursor;
        let end = start + width;
        if end > Self::CAPACITY {
            return Err(MessageError::Overflow {
                requested: width,
                available: Self::CAPACITY - start,
            });
        }
        self.payload_cursor = end;
        self.size = self.size.max(end);
        Ok(&mut self.buf[start..end])
    }

    /// Expose `width` bytes at the payload cursor for reading.
    fn read_slot(&mut self, width: usize) -> Result<&[u8], MessageError> {
        let start = self.payload_cursor;
        let end = start + width;
        if end > self.size {
            return Err(MessageError::Overflow {
                requested: width,
                available: self.size - start,
            });
        }
        self.payload_cursor = end;
        Ok(&self.buf[start..end])
    }

    /// Append a `u8` at the payload cursor.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when the write would pass the capacity;
    /// the same contract applies to every typed writer below.
    pub fn write_u8(&mut self, value: u8) -> Result<(), MessageError> {
        self.write_slot(1)?[0] = value;
        Ok(())
    }

    /// Append an `i8` at the payload cursor.
    pub fn write_i8(&mut self, value: i8) -> Result<(), MessageError> {
        self.write_slot(1)?[0] = value as u8;
        Ok(())
    }

    /// Append a `u16` (LE) at the payload cursor.
    pub fn write_u16(&mut self, value: u16) -> Result<(), MessageError> {
        codec::encode_u16(self.write_slot(2)?, value);
        Ok(())
    }

    /// Append an `i16` (LE) at the payload cursor.
    pub fn write_i16(&mut self, value: i16) -> Result<(), MessageError> {
        codec::encode_i16(self.write_slot(2)?, value);
        Ok(())
    }

    /// Append the low 24 bits of a `u32` (LE) at the payload cursor.
    pub fn write_u24(&mut self, value: u32) -> Result<(), MessageError> {
        codec::encode_u24(self.write_slot(3)?, value);
        Ok(())
    }

    /// Append the low 24 bits of an `i32` (LE) at the payload cursor.
    pub fn write_i24(&mut self, value: i32) -> Result<(), MessageError> {
        codec::encode_i24(self.write_slot(3)?, value);
        Ok(())
    }

    /// Append a `u32` (LE) at the payload cursor.
    pub fn write_u32(&mut self, value: u32) -> Result<(), MessageError> {
        codec::encode_u32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Append an `i32` (LE) at the payload cursor.
    pub fn write_i32(&mut self, value: i32) -> Result<(), MessageError> {
        codec::encode_i32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Append a `u64` (LE) at the payload cursor.
    pub fn write_u64(&mut self, value: u64) -> Result<(), MessageError> {
        codec::encode_u64(self.write_slot(8)?, value);
        Ok(())
    }

    /// Append an `i64` (LE) at the payload cursor.
    pub fn write_i64(&mut self, value: i64) -> Result<(), MessageError> {
        codec::encode_i64(self.write_slot(8)?, value);
        Ok(())
    }

    /// Append an `f32` (IEEE-754 LE) at the payload cursor.
    pub fn write_f32(&mut self, value: f32) -> Result<(), MessageError> {
        codec::encode_f32(self.write_slot(4)?, value);
        Ok(())
    }

    /// Append an `f64` (IEEE-754 LE) at the payload cursor.
    pub fn write_f64(&mut self, value: f64) -> Result<(), MessageError> {
        codec::encode_f64(self.write_slot(8)?, value);
        Ok(())
    }

    /// Append raw bytes at the payload cursor.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when the copy would pass the capacity.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        self.write_slot(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string at the payload cursor.
    ///
    /// Encoding is a `u16` LE byte count followed by the UTF-8 bytes, so
    /// the longest representable string is 65 535 bytes.
    ///
    /// # Errors
    ///
    /// - [`MessageError::StringTooLong`] when the encoded form exceeds the
    ///   `u16` prefix.
    /// - [`MessageError::Overflow`] when prefix plus bytes would pass the
    ///   capacity (checked as one unit before anything is written).
    pub fn write_str(&mut self, value: &str) -> Result<(), MessageError> {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(MessageError::StringTooLong { len: bytes.len() });
        }
        let needed = 2 + bytes.len();
        if self.payload_cursor + needed > Self::CAPACITY {
            return Err(MessageError::Overflow {
                requested: needed,
                available: Self::CAPACITY - self.payload_cursor,
            });
        }
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    /// Read a `u8` at the payload cursor.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when any byte beyond the assembled size
    /// would be read; the same contract applies to every typed reader
    /// below.
    pub fn read_u8(&mut self) -> Result<u8, MessageError> {
        Ok(self.read_slot(1)?[0])
    }

    /// Read an `i8` at the payload cursor.
    pub fn read_i8(&mut self) -> Result<i8, MessageError> {
        Ok(self.read_slot(1)?[0] as i8)
    }

    /// Read a `u16` (LE) at the payload cursor.
    pub fn read_u16(&mut self) -> Result<u16, MessageError> {
        Ok(codec::decode_u16(self.read_slot(2)?))
    }

    /// Read an `i16` (LE) at the payload cursor.
    pub fn read_i16(&mut self) -> Result<i16, MessageError> {
        Ok(codec::decode_i16(self.read_slot(2)?))
    }

    /// Read a 24-bit value (LE) at the payload cursor, zero-extended.
    pub fn read_u24(&mut self) -> Result<u32, MessageError> {
        Ok(codec::decode_u24(self.read_slot(3)?))
    }

    /// Read a 24-bit value (LE) at the payload cursor, zero-extended.
    ///
    /// No sign extension: the result is always nonnegative.
    pub fn read_i24(&mut self) -> Result<i32, MessageError> {
        Ok(codec::decode_i24(self.read_slot(3)?))
    }

    /// Read a `u32` (LE) at the payload cursor.
    pub fn read_u32(&mut self) -> Result<u32, MessageError> {
        Ok(codec::decode_u32(self.read_slot(4)?))
    }

    /// Read an `i32` (LE) at the payload cursor.
    pub fn read_i32(&mut self) -> Result<i32, MessageError> {
        Ok(codec::decode_i32(self.read_slot(4)?))
    }

    /// Read a `u64` (LE) at the payload cursor.
    pub fn read_u64(&mut self) -> Result<u64, MessageError> {
        Ok(codec::decode_u64(self.read_slot(8)?))
    }

    /// Read an `i64` (LE) at the payload cursor.
    pub fn read_i64(&mut self) -> Result<i64, MessageError> {
        Ok(codec::decode_i64(self.read_slot(8)?))
    }

    /// Read an `f32` (IEEE-754 LE) at the payload cursor.
    pub fn read_f32(&mut self) -> Result<f32, MessageError> {
        Ok(codec::decode_f32(self.read_slot(4)?))
    }

    /// Read an `f64` (IEEE-754 LE) at the payload cursor.
    pub fn read_f64(&mut self) -> Result<f64, MessageError> {
        Ok(codec::decode_f64(self.read_slot(8)?))
    }

    /// Read `len` raw bytes at the payload cursor.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when the read would cross the assembled
    /// size.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, MessageError> {
        Ok(self.read_slot(len)?.to_vec())
    }

    /// Read a length-prefixed string at the payload cursor.
    ///
    /// Decoding is lossy: invalid UTF-8 sequences from a peer become
    /// replacement characters rather than an error. A string written with
    /// [`write_str`](Self::write_str) always round-trips exactly.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when the prefix or the string bytes would
    /// cross the assembled size.
    pub fn read_string(&mut self) -> Result<String, MessageError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_slot(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Lay raw bytes down at the raw cursor (framer side).
    ///
    /// Advances the raw cursor and grows `size` to cover the written
    /// region. Unlike the payload writers this addresses the buffer from
    /// offset 0, header bytes included.
    ///
    /// # Errors
    ///
    /// [`MessageError::Overflow`] when the copy would pass the capacity.
    pub fn raw_write(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        let start = self.raw_cursor;
        let end = start + bytes.len();
        if end > Self::CAPACITY {
            return Err(MessageError::Overflow {
                requested: bytes.len(),
                available: Self::CAPACITY - start,
            });
        }
        self.buf[start..end].copy_from_slice(bytes);
        self.raw_cursor = end;
        self.size = self.size.max(end);
        Ok(())
    }

    /// Seal the packet for the wire.
    ///
    /// Synthesizes the header size field from the current size and returns
    /// the assembled packet bytes. Afterwards
    /// [`declared_size`](Self::declared_size) equals [`len`](Self::len).
    pub fn packet(&mut self) -> &[u8] {
        let size = self.size as u32;
        codec::encode_u24(&mut self.buf[..3], size);
        &self.buf[..self.size]
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

// Manual Debug: dumping a 10 MiB buffer field would be useless.
impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type())
            .field("size", &self.size)
            .field("payload_cursor", &self.payload_cursor)
            .field("raw_cursor", &self.raw_cursor)
            .finish_non_exhaustive()
    }
}
