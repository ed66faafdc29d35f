//! Error types for the strake connection runtime.
//!
//! [`NetError`] covers failures surfaced at an API call site; terminal
//! receive-path conditions instead flow to the connection's disconnect
//! event as a [`DisconnectReason`], exactly once per connection, and are
//! suppressed when the close was locally initiated.

use std::{fmt, io};

use strake_proto::{MessageError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by connection and listener operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// `connect` was called on a connection that already has a socket.
    #[error("connection already established")]
    AlreadyConnected,

    /// The operation needs an established socket.
    #[error("connection not established")]
    NotConnected,

    /// A second concurrent `read_loop` on the same connection.
    #[error("receive loop already running")]
    AlreadyReading,

    /// A second concurrent `listen` on the same listener.
    #[error("listener already running")]
    AlreadyListening,

    /// The transport kept accepting partial writes without progress.
    #[error("send stalled after {sent} bytes")]
    SendStalled {
        /// Bytes accepted by the transport before the attempt budget ran out
        sent: usize,
    },

    /// Building a packet in a `send_with` populate closure failed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The incoming byte stream violated the framing protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Underlying transport failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a connection's receive loop ended.
///
/// Delivered through the disconnect event. The `Display` form is the
/// human-readable reason string: empty for a clean peer close, error
/// code and message for transport failures.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The peer closed the stream cleanly (zero-byte read).
    PeerClosed,

    /// The transport failed mid-stream.
    Transport {
        /// Error kind reported by the transport
        kind: io::ErrorKind,
        /// OS error code, when one exists
        code: Option<i32>,
        /// Error message text
        message: String,
    },

    /// The peer violated the framing protocol.
    Protocol(ProtocolError),

    /// A user message handler panicked; the panic was caught and the
    /// connection closed.
    Handler(String),
}

impl DisconnectReason {
    /// Whether the disconnect is an ordinary end of stream rather than a
    /// failure.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, DisconnectReason::PeerClosed)
    }

    pub(crate) fn from_io(err: &io::Error) -> Self {
        DisconnectReason::Transport {
            kind: err.kind(),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // A clean peer close carries no reason text.
            DisconnectReason::PeerClosed => Ok(()),
            DisconnectReason::Transport { code: Some(code), message, .. } => {
                write!(f, "{code}: {message}")
            },
            DisconnectReason::Transport { kind, message, .. } => {
                write!(f, "{kind}: {message}")
            },
            DisconnectReason::Protocol(err) => write!(f, "protocol error: {err}"),
            DisconnectReason::Handler(message) => {
                write!(f, "message handler panicked: {message}")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_close_reason_is_empty() {
        assert_eq!(DisconnectReason::PeerClosed.to_string(), "");
        assert!(DisconnectReason::PeerClosed.is_benign());
    }

    #[test]
    fn transport_reason_carries_code_and_message() {
        let err = io::Error::from_raw_os_error(104); // ECONNRESET
        let reason = DisconnectReason::from_io(&err);
        assert!(!reason.is_benign());

        let text = reason.to_string();
        assert!(text.starts_with("104: "), "unexpected reason text: {text}");
    }

    #[test]
    fn protocol_reason_is_not_benign() {
        let reason = DisconnectReason::Protocol(ProtocolError::SizeOutOfRange {
            declared: 3,
            min: 4,
            max: 10 * 1024 * 1024,
        });
        assert!(!reason.is_benign());
        assert!(reason.to_string().contains("declared packet size 3"));
    }
}
