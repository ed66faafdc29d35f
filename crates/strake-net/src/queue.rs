//! Bounded byte pipe between the socket filler and the frame drainer.
//!
//! A single-producer single-consumer hand-off of byte chunks, bounded by
//! the total buffered byte count. The filler blocks in
//! [`QueueWriter::push`] while the drainer is behind (backpressure); the
//! drainer releases capacity simply by popping. When the filler stops it
//! records *why* through [`QueueWriter::finish`]; the drainer reads the
//! terminal condition after the last chunk.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use tokio::sync::Notify;

/// Terminal condition recorded by the filler.
#[derive(Debug)]
pub(crate) enum FillEnd {
    /// Zero-byte read: the peer closed the stream.
    PeerClosed,
    /// The local side asked the receive path to stop.
    LocalClose,
    /// The transport failed.
    Io(io::Error),
}

struct State {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    end: Option<FillEnd>,
    reader_gone: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

/// Producer half: owned by the filler.
pub(crate) struct QueueWriter {
    shared: Arc<Shared>,
}

/// Consumer half: owned by the drainer.
pub(crate) struct QueueReader {
    shared: Arc<Shared>,
}

/// Create a pipe admitting roughly `capacity` buffered bytes.
///
/// A chunk larger than the whole capacity is still admitted when the pipe
/// is empty, so progress is always possible.
pub(crate) fn byte_queue(capacity: usize) -> (QueueWriter, QueueReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            chunks: VecDeque::new(),
            buffered: 0,
            end: None,
            reader_gone: false,
        }),
        capacity,
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (QueueWriter { shared: Arc::clone(&shared) }, QueueReader { shared })
}

impl QueueWriter {
    /// Append a chunk, waiting for capacity when the pipe is full.
    ///
    /// Returns `Err(())` when the reader half has been dropped; the filler
    /// treats that as a request to stop.
    pub(crate) async fn push(&self, chunk: Bytes) -> Result<(), ()> {
        loop {
            {
                let mut state = self.shared.state.lock().expect("byte queue mutex poisoned");
                if state.reader_gone {
                    return Err(());
                }
                if state.buffered < self.shared.capacity || state.chunks.is_empty() {
                    state.buffered += chunk.len();
                    state.chunks.push_back(chunk);
                    self.shared.readable.notify_one();
                    return Ok(());
                }
            }
            self.shared.writable.notified().await;
        }
    }

    /// Record the terminal condition and wake the reader. Consumes the
    /// writer; no chunk can follow the end marker.
    pub(crate) fn finish(self, end: FillEnd) {
        let mut state = self.shared.state.lock().expect("byte queue mutex poisoned");
        state.end = Some(end);
        self.shared.readable.notify_one();
    }
}

impl QueueReader {
    /// Pop the next chunk in FIFO order, waiting while the pipe is empty.
    ///
    /// Returns `None` once the writer has finished and every chunk has
    /// been drained.
    pub(crate) async fn pop(&mut self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.shared.state.lock().expect("byte queue mutex poisoned");
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    self.shared.writable.notify_one();
                    return Some(chunk);
                }
                if state.end.is_some() {
                    return None;
                }
            }
            self.shared.readable.notified().await;
        }
    }

    /// Take the terminal condition recorded by the writer, if any.
    pub(crate) fn take_end(&self) -> Option<FillEnd> {
        self.shared.state.lock().expect("byte queue mutex poisoned").end.take()
    }

    /// Stop accepting input: further pushes fail immediately, and a writer
    /// parked on backpressure wakes up. Used when the drainer stops early.
    pub(crate) fn close(&self) {
        let mut state = self.shared.state.lock().expect("byte queue mutex poisoned");
        state.reader_gone = true;
        self.shared.writable.notify_one();
    }
}

impl Drop for QueueReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn chunks_arrive_in_order() {
        let (writer, mut reader) = byte_queue(1024);

        writer.push(Bytes::from_static(b"one")).await.unwrap();
        writer.push(Bytes::from_static(b"two")).await.unwrap();
        writer.finish(FillEnd::PeerClosed);

        assert_eq!(reader.pop().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(reader.pop().await.unwrap(), Bytes::from_static(b"two"));
        assert!(reader.pop().await.is_none());
        assert!(matches!(reader.take_end(), Some(FillEnd::PeerClosed)));
    }

    #[tokio::test]
    async fn full_pipe_applies_backpressure() {
        let (writer, mut reader) = byte_queue(4);
        writer.push(Bytes::from_static(b"abcd")).await.unwrap();

        // Second push must park until the reader drains the first chunk.
        let second = writer.push(Bytes::from_static(b"efgh"));
        tokio::pin!(second);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), second.as_mut()).await.is_err(),
            "push should block while the pipe is full"
        );

        assert_eq!(reader.pop().await.unwrap(), Bytes::from_static(b"abcd"));
        second.await.unwrap();
        assert_eq!(reader.pop().await.unwrap(), Bytes::from_static(b"efgh"));
    }

    #[tokio::test]
    async fn oversized_chunk_is_admitted_when_empty() {
        let (writer, mut reader) = byte_queue(2);
        writer.push(Bytes::from_static(b"larger than capacity")).await.unwrap();
        assert_eq!(reader.pop().await.unwrap(), Bytes::from_static(b"larger than capacity"));
    }

    #[tokio::test]
    async fn dropped_reader_unblocks_writer() {
        let (writer, reader) = byte_queue(4);
        writer.push(Bytes::from_static(b"abcd")).await.unwrap();
        drop(reader);

        assert!(writer.push(Bytes::from_static(b"efgh")).await.is_err());
    }
}
