//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 4-byte structure serialized as raw binary
//! (little-endian). The framer validates it once per packet before any
//! payload byte is accepted.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    codec,
    errors::{ProtocolError, Result},
};

/// Fixed 4-byte frame header.
///
/// Layout on the wire:
///
/// ```text
/// [ size: u24 LE ][ message_type: u8 ]
///   bytes 0..2      byte 3
/// ```
///
/// `size` is the total packet length including these 4 bytes, so a legal
/// value is never below [`FrameHeader::SIZE`]. Fields are stored as raw byte
/// arrays to keep the `#[repr(C, packed)]` layout free of alignment
/// requirements; all 4-byte patterns are valid bit patterns, so casting
/// untrusted network bytes cannot produce an invalid value, only an invalid
/// *size*, which [`FrameHeader::parse`] rejects.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    size: [u8; 3],
    message_type: u8,
}

impl FrameHeader {
    /// Size of the serialized header (4 bytes).
    pub const SIZE: usize = 4;

    /// Maximum total packet length (10 MiB), header included.
    pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

    /// Create a header for the given message type with a zero size field.
    ///
    /// The size field is synthesized later, when the packet is sealed for
    /// the wire (see [`Message::packet`](crate::Message::packet)).
    #[must_use]
    pub fn new(message_type: u8) -> Self {
        Self { size: [0; 3], message_type }
    }

    /// Parse a header from the first 4 bytes of `bytes` (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderIncomplete`] if fewer than 4 bytes are
    ///   available.
    /// - [`ProtocolError::SizeOutOfRange`] if the declared packet size falls
    ///   outside `[SIZE, MAX_PACKET_SIZE]`.
    pub fn parse(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderIncomplete {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        let declared = header.packet_size() as usize;
        if declared < Self::SIZE || declared > Self::MAX_PACKET_SIZE {
            return Err(ProtocolError::SizeOutOfRange {
                declared: header.packet_size(),
                min: Self::SIZE,
                max: Self::MAX_PACKET_SIZE,
            });
        }

        Ok(header)
    }

    /// Total packet length declared by the header (u24 LE, zero-extended).
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        codec::decode_u24(&self.size)
    }

    /// Set the declared packet length (low 24 bits are stored).
    pub fn set_packet_size(&mut self, size: u32) {
        codec::encode_u24(&mut self.size, size);
    }

    /// The message type byte.
    #[must_use]
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Set the message type byte.
    pub fn set_message_type(&mut self, message_type: u8) {
        self.message_type = message_type;
    }

    /// Serialize the header to its 4 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("packet_size", &self.packet_size())
            .field("message_type", &self.message_type())
            .finish()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
