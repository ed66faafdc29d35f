//! Connection runtime for the strake framed-message protocol.
//!
//! This crate turns a reliable byte-stream transport into an exchange of
//! discrete [`Message`](strake_proto::Message) packets. The wire shape
//! itself lives in `strake-proto`; everything here is machinery:
//!
//! ```text
//!            ┌───────────────────────── Connection ─────────────────────────┐
//! socket ──> │ filler ──> byte queue ──> drainer ──> FrameReader ──> sink   │
//!            │                                            │                 │
//!            │                                       MessagePool            │
//!            └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The filler performs transport reads; the drainer drives the frame-reader
//! state machine and delivers assembled messages to the user's handler.
//! Both run as joined futures of one task per connection, so the
//! in-progress message and the queue cursors are never raced. The pool is
//! the only cross-connection shared state and is internally synchronized.
//!
//! # Modules
//!
//! - [`config`]: tunables ([`Config`])
//! - [`error`]: runtime errors and disconnect reasons
//! - [`pool`]: bounded free list of reusable objects ([`MessagePool`])
//! - [`framer`]: byte stream → message sequence state machine
//! - [`connection`]: socket ownership, receive pipeline, send path
//! - [`listener`]: TCP accept loop with a pre-accept filter

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod listener;
pub mod pool;
mod queue;

pub use config::Config;
pub use connection::Connection;
pub use error::{DisconnectReason, NetError};
pub use framer::{Delivery, FrameReader};
pub use listener::Listener;
pub use pool::{MessagePool, Pool, Recycle};
