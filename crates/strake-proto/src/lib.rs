//! Wire layer for the strake framed-message protocol.
//!
//! This crate defines the on-the-wire shape of a strake packet and the
//! buffer type used to build and inspect one. It performs no I/O; the
//! `strake-net` crate drives these types from a transport.
//!
//! # Wire format
//!
//! ```text
//! ┌─────────────┬──────────┬────────────────────┐
//! │ size: u24 LE │ type: u8 │ payload (size - 4) │
//! └─────────────┴──────────┴────────────────────┘
//!   bytes 0..2    byte 3     bytes 4..size-1
//! ```
//!
//! The size field counts the whole packet including the 4 header bytes.
//! Packets range from 4 bytes (header only) to [`FrameHeader::MAX_PACKET_SIZE`]
//! (10 MiB). All multi-byte values are little-endian.
//!
//! # Modules
//!
//! - [`codec`]: little-endian scalar encode/decode primitives
//! - [`errors`]: message and protocol error types
//! - `header`: the fixed 4-byte frame header ([`FrameHeader`])
//! - `message`: the fixed-capacity dual-cursor packet buffer ([`Message`])

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod errors;
mod header;
mod message;

pub use errors::{MessageError, ProtocolError, Result};
pub use header::FrameHeader;
pub use message::{Message, SeekOrigin};
