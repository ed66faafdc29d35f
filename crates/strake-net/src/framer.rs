//! Byte stream → message sequence state machine.
//!
//! A [`FrameReader`] consumes arbitrarily chunked bytes from one
//! connection and reassembles them into packets. It is sans-IO: the caller
//! (the connection's drainer) feeds it whatever a transport read produced,
//! and assembled messages come back synchronously through a sink closure.
//! The reader never suspends inside its inner loop; it simply returns when
//! it needs more bytes.
//!
//! # State machine
//!
//! ```text
//!               header complete, size valid
//! AwaitingHeader ───────────────────────────> AwaitingPayload
//!       ^                                           │
//!       └───────────── packet delivered ────────────┘
//! ```
//!
//! Header bytes accumulate across as many chunks as the transport
//! fragments them into; a chunk may equally carry several whole packets,
//! which are delivered one by one in the same drain pass. Delivery is
//! strictly in stream order: the sink call for packet *n* returns before a
//! single byte of packet *n + 1* is examined.

use strake_proto::{Message, ProtocolError, SeekOrigin};

use crate::{config::Config, pool::MessagePool};

/// One assembled packet, handed to the delivery sink.
///
/// The default is zero-allocation reuse: let the `Delivery` drop and the
/// reader resets the same buffer for the next packet. A handler that needs
/// the message beyond the callback calls [`retain`](Self::retain) instead,
/// taking ownership; the reader then pulls a fresh buffer from the pool,
/// and the retained message should eventually go back via
/// [`MessagePool::release`].
pub struct Delivery<'a> {
    slot: &'a mut Option<Message>,
}

impl Delivery<'_> {
    /// The assembled message, payload cursor at the start of the payload.
    #[must_use]
    pub fn message(&mut self) -> &mut Message {
        self.slot.as_mut().expect("delivery always holds a message")
    }

    /// Take ownership of the message instead of letting the reader
    /// recycle it.
    #[must_use]
    pub fn retain(self) -> Message {
        self.slot.take().expect("delivery always holds a message")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingHeader,
    AwaitingPayload,
}

/// Frame reader for one connection.
pub struct FrameReader {
    pool: MessagePool,
    config: Config,
    /// In-progress packet. `None` only transiently inside a delivery.
    current: Option<Message>,
    phase: Phase,
    /// Partial reads spent on the current packet.
    fragments: u32,
}

impl FrameReader {
    /// Create a reader borrowing its buffers from `pool`.
    #[must_use]
    pub fn new(pool: MessagePool, config: Config) -> Self {
        let current = pool.acquire();
        Self { pool, config, current: Some(current), phase: Phase::AwaitingHeader, fragments: 0 }
    }

    /// Consume one transport read's worth of bytes.
    ///
    /// Every assembled packet is delivered through `sink` before this
    /// returns. The whole chunk is always consumed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::SizeOutOfRange`] when a completed header declares
    ///   a length outside `[HEADER_SIZE, packet_cap]`.
    /// - [`ProtocolError::FragmentLimit`] when one packet has stayed
    ///   incomplete across more reads than the configured budget.
    ///
    /// After an error the connection must be torn down; the reader makes no
    /// attempt to resynchronize a stream it no longer trusts.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        sink: &mut dyn FnMut(Delivery<'_>),
    ) -> Result<(), ProtocolError> {
        let mut rest = chunk;

        loop {
            match self.phase {
                Phase::AwaitingHeader => {
                    if rest.is_empty() {
                        break;
                    }
                    let cap = self.config.packet_cap();
                    let current = self.current_mut();
                    let need = Message::HEADER_SIZE - current.raw_position();
                    let take = need.min(rest.len());
                    current
                        .raw_write(&rest[..take])
                        .expect("header bytes fit a fresh buffer");
                    rest = &rest[take..];

                    if current.raw_position() == Message::HEADER_SIZE {
                        let declared = current.declared_size();
                        if (declared as usize) < Message::HEADER_SIZE || declared as usize > cap {
                            return Err(ProtocolError::SizeOutOfRange {
                                declared,
                                min: Message::HEADER_SIZE,
                                max: cap,
                            });
                        }
                        self.phase = Phase::AwaitingPayload;
                    }
                },

                Phase::AwaitingPayload => {
                    let current = self.current_mut();
                    let declared = current.declared_size() as usize;
                    let needed = declared - current.raw_position();

                    if needed > 0 {
                        if rest.is_empty() {
                            break;
                        }
                        let take = needed.min(rest.len());
                        current
                            .raw_write(&rest[..take])
                            .expect("declared size was validated against the cap");
                        rest = &rest[take..];
                    }

                    if self.current_mut().raw_position() == declared {
                        self.complete(sink);
                    } else {
                        break;
                    }
                },
            }
        }

        // One transport read that left a packet unfinished is one fragment.
        if !chunk.is_empty() && self.current_mut().raw_position() > 0 {
            self.fragments += 1;
            if self.fragments > self.config.max_fragments_per_packet {
                return Err(ProtocolError::FragmentLimit {
                    count: self.fragments,
                    max: self.config.max_fragments_per_packet,
                });
            }
        }

        Ok(())
    }

    /// Whether a packet is partially assembled.
    #[must_use]
    pub fn mid_packet(&self) -> bool {
        self.current.as_ref().is_some_and(|msg| msg.raw_position() > 0)
    }

    fn current_mut(&mut self) -> &mut Message {
        self.current.as_mut().expect("frame reader always holds a message")
    }

    fn complete(&mut self, sink: &mut dyn FnMut(Delivery<'_>)) {
        {
            let current = self.current_mut();
            current.sync_size_from_header();
            current
                .seek(0, SeekOrigin::Begin)
                .expect("payload start of a framed packet is addressable");
            tracing::trace!(
                message_type = current.message_type(),
                size = current.len(),
                "packet assembled"
            );
        }

        sink(Delivery { slot: &mut self.current });

        match self.current.as_mut() {
            // Sink let the delivery drop: reuse the same buffer.
            Some(message) => message.reset(),
            // Sink retained the message: replace it from the pool.
            None => self.current = Some(self.pool.acquire()),
        }
        self.phase = Phase::AwaitingHeader;
        self.fragments = 0;
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        if let Some(message) = self.current.take() {
            self.pool.release(message);
        }
    }
}
