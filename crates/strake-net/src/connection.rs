//! Connection lifecycle: socket ownership, the receive pipeline, and the
//! send path.
//!
//! A [`Connection`] owns one transport endpoint. Receiving is a pair of
//! cooperating futures driven by [`read_loop`](Connection::read_loop):
//!
//! - the **filler** performs transport reads and pushes the bytes into a
//!   bounded queue;
//! - the **drainer** pops the queue and drives the
//!   [`FrameReader`](crate::FrameReader), which delivers assembled packets
//!   to the installed message handler.
//!
//! The two are joined in the same task, so they interleave cooperatively
//! and never race on the in-progress packet or the queue cursors. Sending
//! is independent of receiving and serialized by an internal async mutex:
//! the bytes of one packet are never interleaved with another's.
//!
//! # Disconnects
//!
//! Terminal receive-path conditions (peer close, transport error, protocol
//! violation, handler panic) fire the disconnect event exactly once, with
//! a [`DisconnectReason`]. A locally initiated [`close`](Connection::close)
//! suppresses the event: the owner already knows.
//!
//! Handlers are plain synchronous closures; one that needs to respond
//! asynchronously retains the message, clones the connection handle, and
//! spawns:
//!
//! ```no_run
//! # use strake_net::{Config, Connection};
//! let conn: Connection = Connection::new(Config::default());
//! let reply_on = conn.clone();
//! conn.on_message(move |delivery| {
//!     let mut msg = delivery.retain();
//!     let conn = reply_on.clone();
//!     tokio::spawn(async move {
//!         let _ = conn.send(&mut msg).await;
//!         conn.free_message(msg);
//!     });
//! });
//! ```

use std::{
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use bytes::BytesMut;
use strake_proto::{Message, MessageError, ProtocolError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::{Mutex as AsyncMutex, Notify},
};

use crate::{
    config::Config,
    error::{DisconnectReason, NetError},
    framer::{Delivery, FrameReader},
    pool::{MessagePool, Pool},
    queue::{byte_queue, FillEnd},
};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 64 * 1024;

/// Buffered-byte bound of the receive queue (filler backpressure point).
const RECV_QUEUE_BYTES: usize = 256 * 1024;

/// Partial-write retry budget for one packet send.
const MAX_SEND_ATTEMPTS: u32 = 1000;

/// Linger applied to sockets at setup so teardown is prompt.
pub(crate) const CLOSE_LINGER: Duration = Duration::from_secs(1);

type MessageSink = Box<dyn FnMut(Delivery<'_>) + Send>;
type DisconnectSink = Box<dyn FnMut(&DisconnectReason) + Send>;

/// Why the drainer stopped before the byte stream ran out.
enum DrainStop {
    Protocol(ProtocolError),
    Handler(String),
}

struct Inner<S> {
    config: Config,
    pool: MessagePool,
    peer: StdMutex<Option<SocketAddr>>,
    /// Taken (once) by the receive loop.
    reader: StdMutex<Option<ReadHalf<S>>>,
    /// Async mutex: held across transport writes to serialize whole sends.
    writer: AsyncMutex<Option<WriteHalf<S>>>,
    closing: AtomicBool,
    reading: AtomicBool,
    /// Wakes the filler out of a transport read on local close.
    close_signal: Notify,
    on_message: StdMutex<Option<MessageSink>>,
    on_disconnected: StdMutex<Option<DisconnectSink>>,
}

/// One framed-message connection over a reliable byte stream.
///
/// `Connection` is a cheaply cloneable handle; all clones address the same
/// endpoint. The stream type defaults to [`TcpStream`], and anything
/// `AsyncRead + AsyncWrite` works (tests run over in-memory duplex pipes).
///
/// Install handlers with [`on_message`](Self::on_message) /
/// [`on_disconnected`](Self::on_disconnected) before starting
/// [`read_loop`](Self::read_loop). The setters must not be called from
/// inside a message handler.
pub struct Connection<S = TcpStream> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create an idle connection; pair with [`connect`](Connection::connect).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let pool = Pool::new(config.pool_capacity);
        Self::build(config, pool, None)
    }

    /// Wrap an already-established stream (an accepted socket, a duplex
    /// pipe under test).
    #[must_use]
    pub fn from_stream(stream: S, peer: Option<SocketAddr>, config: Config) -> Self {
        let pool = Pool::new(config.pool_capacity);
        Self::build(config, pool, Some((stream, peer)))
    }

    /// Like [`from_stream`](Self::from_stream), but borrowing buffers from
    /// a shared pool (a listener hands its pool to every accepted
    /// connection).
    #[must_use]
    pub fn from_stream_with_pool(
        stream: S,
        peer: Option<SocketAddr>,
        config: Config,
        pool: MessagePool,
    ) -> Self {
        Self::build(config, pool, Some((stream, peer)))
    }

    fn build(config: Config, pool: MessagePool, io: Option<(S, Option<SocketAddr>)>) -> Self {
        let (reader, writer, peer) = match io {
            Some((stream, peer)) => {
                let (reader, writer) = tokio::io::split(stream);
                (Some(reader), Some(writer), peer)
            },
            None => (None, None, None),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                pool,
                peer: StdMutex::new(peer),
                reader: StdMutex::new(reader),
                writer: AsyncMutex::new(writer),
                closing: AtomicBool::new(false),
                reading: AtomicBool::new(false),
                close_signal: Notify::new(),
                on_message: StdMutex::new(None),
                on_disconnected: StdMutex::new(None),
            }),
        }
    }

    /// Install the message handler.
    ///
    /// The handler runs synchronously on the connection's receive task,
    /// strictly in stream order; it returns before the next packet is
    /// assembled. Let the [`Delivery`] drop to recycle the message, or
    /// [`retain`](Delivery::retain) it and return it later through
    /// [`free_message`](Self::free_message).
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(Delivery<'_>) + Send + 'static,
    {
        *self.inner.on_message.lock().expect("message handler mutex poisoned") =
            Some(Box::new(handler));
    }

    /// Install the disconnect handler, fired at most once per connection.
    pub fn on_disconnected<F>(&self, handler: F)
    where
        F: FnMut(&DisconnectReason) + Send + 'static,
    {
        *self.inner.on_disconnected.lock().expect("disconnect handler mutex poisoned") =
            Some(Box::new(handler));
    }

    /// Remote endpoint, when the stream has one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer.lock().expect("peer mutex poisoned")
    }

    /// Whether a local close has been requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Request teardown: flags the connection as closing and shuts the
    /// receive side down.
    ///
    /// The receive loop exits cleanly (peer-close-like) and the disconnect
    /// event is *not* fired; the owner initiated this. Safe to call from
    /// inside a message handler. Idempotent.
    pub fn close(&self) {
        if !self.inner.closing.swap(true, Ordering::SeqCst) {
            tracing::debug!(peer = ?self.peer_addr(), "closing connection");
        }
        self.inner.close_signal.notify_one();
    }

    /// Return a retained message to the connection's pool.
    pub fn free_message(&self, message: Message) {
        self.inner.pool.release(message);
    }

    /// Send one packet, serialized against other senders.
    ///
    /// Seals the message (header synthesis) and writes it fully, looping on
    /// short writes. A zero-byte transport write ends the loop as "done"
    /// with the running total.
    ///
    /// # Errors
    ///
    /// - [`NetError::NotConnected`] without an established stream.
    /// - [`NetError::SendStalled`] when the transport keeps taking partial
    ///   writes past the attempt budget.
    /// - [`NetError::Io`] on transport failure.
    pub async fn send(&self, message: &mut Message) -> Result<usize, NetError> {
        let mut writer_slot = self.inner.writer.lock().await;
        let writer = writer_slot.as_mut().ok_or(NetError::NotConnected)?;

        let packet = message.packet();
        let mut sent = 0;
        let mut attempts = 0u32;
        while sent < packet.len() {
            attempts += 1;
            if attempts > MAX_SEND_ATTEMPTS {
                return Err(NetError::SendStalled { sent });
            }
            let n = writer.write(&packet[sent..]).await?;
            if n == 0 {
                break;
            }
            sent += n;
        }
        writer.flush().await?;

        tracing::trace!(bytes = sent, message_type = message.message_type(), "packet sent");
        Ok(sent)
    }

    /// Populate a pooled message and send it.
    ///
    /// Acquires a message, sets the type byte, runs `populate` for the
    /// payload fields, sends, and returns the message to the pool whatever
    /// happened.
    ///
    /// # Errors
    ///
    /// [`NetError::Message`] when `populate` fails; otherwise as
    /// [`send`](Self::send).
    pub async fn send_with<F>(&self, message_type: u8, populate: F) -> Result<usize, NetError>
    where
        F: FnOnce(&mut Message) -> Result<(), MessageError>,
    {
        let mut message = self.inner.pool.acquire();
        message.set_message_type(message_type);
        let result = match populate(&mut message) {
            Ok(()) => self.send(&mut message).await,
            Err(err) => Err(NetError::Message(err)),
        };
        self.inner.pool.release(message);
        result
    }

    /// Run the receive pipeline until the stream ends.
    ///
    /// Returns `Ok(())` however the stream terminated; terminal conditions
    /// are reported through the disconnect event instead (exactly once,
    /// suppressed on local close).
    ///
    /// # Errors
    ///
    /// - [`NetError::AlreadyReading`] when a receive loop is already
    ///   running on this connection.
    /// - [`NetError::NotConnected`] without an established stream.
    pub async fn read_loop(&self) -> Result<(), NetError> {
        if self.inner.reading.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyReading);
        }
        let result = self.drive_receive().await;
        self.inner.reading.store(false, Ordering::SeqCst);
        result
    }

    async fn drive_receive(&self) -> Result<(), NetError> {
        let mut reader = self
            .inner
            .reader
            .lock()
            .expect("reader slot mutex poisoned")
            .take()
            .ok_or(NetError::NotConnected)?;

        let (queue_writer, mut queue_reader) = byte_queue(RECV_QUEUE_BYTES);

        // Filler: transport reads into the queue until a terminal condition.
        let fill = async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let end = loop {
                if self.inner.closing.load(Ordering::SeqCst) {
                    break FillEnd::LocalClose;
                }
                buf.reserve(READ_CHUNK);
                tokio::select! {
                    _ = self.inner.close_signal.notified() => break FillEnd::LocalClose,
                    read = reader.read_buf(&mut buf) => match read {
                        Ok(0) => break FillEnd::PeerClosed,
                        Ok(_) => {
                            if queue_writer.push(buf.split().freeze()).await.is_err() {
                                break FillEnd::LocalClose;
                            }
                        },
                        Err(err) => break FillEnd::Io(err),
                    },
                }
            };
            queue_writer.finish(end);
            drop(reader);
        };

        // Drainer: queue bytes through the frame reader to the handler.
        let drain = async {
            let mut framer = FrameReader::new(self.inner.pool.clone(), self.inner.config.clone());
            let mut stop: Option<DrainStop> = None;

            while let Some(chunk) = queue_reader.pop().await {
                let mut handler_panic: Option<String> = None;
                let fed = framer.feed(&chunk, &mut |delivery| {
                    if handler_panic.is_some() {
                        // Connection is going down; recycle the rest silently.
                        return;
                    }
                    let mut slot =
                        self.inner.on_message.lock().expect("message handler mutex poisoned");
                    if let Some(handler) = slot.as_mut() {
                        let call = panic::catch_unwind(AssertUnwindSafe(|| handler(delivery)));
                        if let Err(payload) = call {
                            handler_panic = Some(panic_text(payload.as_ref()));
                        }
                    }
                });

                if let Some(text) = handler_panic {
                    tracing::error!(panic = %text, "message handler panicked; closing connection");
                    stop = Some(DrainStop::Handler(text));
                    break;
                }
                if let Err(err) = fed {
                    tracing::error!(error = %err, "protocol violation; closing connection");
                    stop = Some(DrainStop::Protocol(err));
                    break;
                }
            }

            if stop.is_some() {
                // Wake the filler wherever it is parked: a transport read
                // (close signal) or queue backpressure (queue close).
                queue_reader.close();
                self.inner.close_signal.notify_one();
            }
            stop
        };

        let ((), stop) = tokio::join!(fill, drain);

        let fill_end = queue_reader.take_end();
        drop(queue_reader);

        let reason = match stop {
            Some(DrainStop::Protocol(err)) => Some(DisconnectReason::Protocol(err)),
            Some(DrainStop::Handler(text)) => Some(DisconnectReason::Handler(text)),
            None => match fill_end {
                Some(FillEnd::PeerClosed) => Some(DisconnectReason::PeerClosed),
                Some(FillEnd::Io(err)) => Some(DisconnectReason::from_io(&err)),
                Some(FillEnd::LocalClose) | None => None,
            },
        };

        // A drainer-initiated stop is a close the owner did not ask for;
        // mark the connection closing either way so sends start failing
        // fast, but remember whether the event should fire.
        let locally_closed = self.inner.closing.load(Ordering::SeqCst);
        if reason.is_some() {
            self.inner.closing.store(true, Ordering::SeqCst);
        }

        // Push the FIN out now that the receive side is down.
        if let Some(writer) = self.inner.writer.lock().await.as_mut() {
            let _ = writer.shutdown().await;
        }

        if let Some(reason) = reason {
            if locally_closed {
                tracing::debug!(reason = %reason, "disconnect event suppressed by local close");
            } else {
                self.fire_disconnected(&reason);
            }
        }
        Ok(())
    }

    fn fire_disconnected(&self, reason: &DisconnectReason) {
        tracing::debug!(
            peer = ?self.peer_addr(),
            reason = %reason,
            benign = reason.is_benign(),
            "disconnected"
        );
        let handler =
            self.inner.on_disconnected.lock().expect("disconnect handler mutex poisoned").take();
        if let Some(mut handler) = handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(reason))).is_err() {
                tracing::error!("disconnect handler panicked");
            }
        }
    }
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `host:port`.
    ///
    /// The socket gets `TCP_NODELAY` and a short linger so a later
    /// [`close`](Self::close) tears down promptly.
    ///
    /// # Errors
    ///
    /// - [`NetError::AlreadyConnected`] when a stream is already attached.
    /// - [`NetError::Io`] on resolution or connect failure.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), NetError> {
        // Hold the writer slot across the connect: a racing second call
        // waits here and then observes AlreadyConnected.
        let mut writer_slot = self.inner.writer.lock().await;
        if writer_slot.is_some() {
            return Err(NetError::AlreadyConnected);
        }

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        stream.set_linger(Some(CLOSE_LINGER))?;
        let peer = stream.peer_addr().ok();

        let (reader, writer) = tokio::io::split(stream);
        *self.inner.reader.lock().expect("reader slot mutex poisoned") = Some(reader);
        *writer_slot = Some(writer);
        *self.inner.peer.lock().expect("peer mutex poisoned") = peer;

        tracing::debug!(peer = ?peer, "connected");
        Ok(())
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn read_loop_without_stream_is_not_connected() {
        let conn: Connection<tokio::io::DuplexStream> = Connection::new(Config::default());
        assert!(matches!(conn.read_loop().await, Err(NetError::NotConnected)));
    }

    #[tokio::test]
    async fn send_without_stream_is_not_connected() {
        let conn: Connection<tokio::io::DuplexStream> = Connection::new(Config::default());
        let mut msg = Message::new();
        assert!(matches!(conn.send(&mut msg).await, Err(NetError::NotConnected)));
    }

    #[tokio::test]
    async fn concurrent_read_loops_are_rejected() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(local, None, Config::default());

        let runner = conn.clone();
        let first = tokio::spawn(async move { runner.read_loop().await });
        tokio::task::yield_now().await;

        assert!(matches!(conn.read_loop().await, Err(NetError::AlreadyReading)));

        drop(remote); // peer close ends the first loop
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_writes_the_sealed_packet() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(local, None, Config::default());

        let mut msg = Message::new();
        msg.set_message_type(3);
        msg.write_str("Hello").unwrap();
        let sent = conn.send(&mut msg).await.unwrap();
        assert_eq!(sent, 11);

        let mut wire = vec![0u8; sent];
        let (mut remote_read, _remote_write) = tokio::io::split(remote);
        remote_read.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [0x0B, 0x00, 0x00, 0x03, 0x05, 0x00, 0x48, 0x65, 0x6C, 0x6C, 0x6F]);
    }

    #[tokio::test]
    async fn send_with_releases_the_message_on_populate_failure() {
        let (local, _remote) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(local, None, Config::default());

        let result = conn
            .send_with(1, |msg| {
                msg.write_bytes(&[0u8; 16])?;
                Err(MessageError::OutOfRange { target: -1, len: 0 })
            })
            .await;
        assert!(matches!(result, Err(NetError::Message(_))));

        // The message went back to the pool, fully reset.
        assert_eq!(conn.inner.pool.free_count(), 1);
    }

    #[tokio::test]
    async fn handler_panic_closes_and_reports() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(local, None, Config::default());

        let reasons = Arc::new(StdMutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);
        conn.on_message(|_delivery| panic!("boom"));
        conn.on_disconnected(move |reason| {
            seen.lock().unwrap().push(reason.to_string());
        });

        let (_remote_read, mut remote_write) = tokio::io::split(remote);
        let driver = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_loop().await })
        };

        remote_write.write_all(&[0x04, 0x00, 0x00, 0x00]).await.unwrap();
        driver.await.unwrap().unwrap();

        let reasons = reasons.lock().unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("boom"), "reason was: {}", reasons[0]);
        assert!(conn.is_closing());
    }

    #[tokio::test]
    async fn messages_after_a_panic_are_not_delivered() {
        let (local, remote) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(local, None, Config::default());

        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        conn.on_message(move |_delivery| {
            count.fetch_add(1, Ordering::SeqCst);
            panic!("first delivery panics");
        });

        let (_remote_read, mut remote_write) = tokio::io::split(remote);
        let driver = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_loop().await })
        };

        // Two packets in one write: the second must not reach the handler.
        remote_write
            .write_all(&[0x04, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        driver.await.unwrap().unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
