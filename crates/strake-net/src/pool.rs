//! Bounded free list of reusable objects.
//!
//! Allocating a fresh 10 MiB [`Message`] for every packet would dominate
//! the receive path; the pool keeps completed messages around for reuse
//! instead. The free list is bounded: releases past the capacity drop the
//! object, acquires from an empty list construct a new one.
//!
//! # Thread safety
//!
//! The pool is internally synchronized and cheap to clone (all clones
//! share one free list). No ordering is guaranteed between concurrent
//! `acquire`/`release` calls beyond mutual exclusion of the list itself.

use std::sync::{Arc, Mutex};

use strake_proto::Message;

/// Reset-to-pristine capability for pooled objects.
pub trait Recycle {
    /// Restore the object to its freshly-constructed state.
    fn recycle(&mut self);
}

impl Recycle for Message {
    fn recycle(&mut self) {
        self.reset();
    }
}

struct PoolInner<T> {
    free: Vec<T>,
    capacity: usize,
}

/// A bounded free list of `T`.
///
/// Cloning shares the underlying list (one list serving every connection
/// on a listener, say). Objects handed out by [`acquire`](Self::acquire)
/// are always in their recycled state.
pub struct Pool<T> {
    inner: Arc<Mutex<PoolInner<T>>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Recycle + Default> Pool<T> {
    /// Create a pool retaining at most `capacity` free objects.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner { free: Vec::with_capacity(capacity), capacity })),
        }
    }

    /// Take an object from the free list, or construct one if the list is
    /// empty. The most recently released object is handed out first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding it).
    #[must_use]
    pub fn acquire(&self) -> T {
        self.inner
            .lock()
            .expect("pool mutex poisoned")
            .free
            .pop()
            .unwrap_or_default()
    }

    /// Recycle an object and return it to the free list, or drop it when
    /// the list is at capacity.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn release(&self, mut object: T) {
        object.recycle();
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if inner.free.len() < inner.capacity {
            inner.free.push(object);
        }
        // At capacity: the object is dropped here.
    }

    /// Number of objects currently on the free list.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").free.len()
    }
}

/// The message pool used by connections and frame readers.
pub type MessagePool = Pool<Message>;
