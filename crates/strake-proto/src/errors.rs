//! Error types for the strake wire layer.
//!
//! Two distinct failure families live here. [`MessageError`] covers misuse
//! of a [`Message`](crate::Message) buffer by the local program (cursor
//! overflow, invalid seeks) and is never caused by peer data.
//! [`ProtocolError`] covers malformed input from the byte stream and always
//! terminates the connection that produced it.

use thiserror::Error;

/// Errors raised by [`Message`](crate::Message) cursor operations.
///
/// These are programmer errors in intended use: the caller wrote past the
/// buffer capacity, read past the assembled size, or seeked outside the
/// addressable region. They are surfaced at the call site and never
/// propagated across the network.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// A write would run past the buffer capacity, or a read would cross
    /// the current message size.
    #[error("cursor overflow: requested {requested} bytes, {available} available")]
    Overflow {
        /// Bytes the operation needed
        requested: usize,
        /// Bytes remaining before the limit
        available: usize,
    },

    /// Seek target falls outside the addressable region.
    #[error("seek out of range: target {target} in region of {len} bytes")]
    OutOfRange {
        /// Resolved absolute target offset (may be negative)
        target: i64,
        /// Length of the region being seeked over
        len: usize,
    },

    /// String is too long for the u16 byte-count prefix.
    #[error("string too long: {len} bytes exceeds the 65535-byte prefix limit")]
    StringTooLong {
        /// Encoded byte length of the string
        len: usize,
    },
}

/// Errors raised while framing an incoming byte stream.
///
/// Any of these indicates a broken or malicious peer; the connection that
/// produced the bytes is closed and the error surfaces through its
/// disconnect event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header buffer is shorter than the fixed header size.
    #[error("incomplete header: expected {expected} bytes, got {actual}")]
    HeaderIncomplete {
        /// Required header size in bytes
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Header-declared packet length outside the legal range.
    #[error("declared packet size {declared} outside [{min}, {max}]")]
    SizeOutOfRange {
        /// Length claimed by the header
        declared: u32,
        /// Minimum legal packet length (header size)
        min: usize,
        /// Maximum legal packet length
        max: usize,
    },

    /// A single packet arrived in more partial reads than the configured
    /// budget allows.
    #[error("packet split across {count} reads, limit {max}")]
    FragmentLimit {
        /// Partial reads observed so far
        count: u32,
        /// Configured maximum
        max: u32,
    },
}

/// Convenient Result alias for framing operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
