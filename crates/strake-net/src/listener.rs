//! TCP accept loop with a pre-accept filter.
//!
//! A [`Listener`] binds a port, accepts inbound sockets, and hands each
//! one, wrapped in a [`Connection`], to the installed new-connection
//! handler. An optional filter sees the peer address first and may reject
//! it, in which case the socket is dropped immediately with zero linger.
//!
//! All accepted connections borrow message buffers from the listener's
//! shared pool.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
};

use crate::{
    config::Config,
    connection::{Connection, CLOSE_LINGER},
    error::NetError,
    pool::{MessagePool, Pool},
};

type ConnectionFilter = Box<dyn Fn(&SocketAddr) -> bool + Send + Sync>;
type ConnectionHandler = Box<dyn FnMut(Connection) + Send>;

/// Accept loop emitting per-connection objects.
///
/// One `listen` may run at a time; a second concurrent call fails with
/// [`NetError::AlreadyListening`]. [`stop`](Self::stop) cancels the running
/// loop and releases the socket.
pub struct Listener {
    config: Config,
    pool: MessagePool,
    listening: Mutex<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Replaced with a fresh signal by each `listen`, so a stale `stop`
    /// cannot cancel a later run.
    shutdown: Mutex<Arc<Notify>>,
    filter: Mutex<Option<ConnectionFilter>>,
    on_new_connection: Mutex<Option<ConnectionHandler>>,
}

impl Listener {
    /// Create a listener; nothing is bound until [`listen`](Self::listen).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let pool = Pool::new(config.pool_capacity);
        Self {
            config,
            pool,
            listening: Mutex::new(false),
            local_addr: Mutex::new(None),
            shutdown: Mutex::new(Arc::new(Notify::new())),
            filter: Mutex::new(None),
            on_new_connection: Mutex::new(None),
        }
    }

    /// Install the pre-accept filter. Returning `false` rejects the peer
    /// before a connection object is built.
    pub fn on_connection_request<F>(&self, filter: F)
    where
        F: Fn(&SocketAddr) -> bool + Send + Sync + 'static,
    {
        *self.filter.lock().expect("filter mutex poisoned") = Some(Box::new(filter));
    }

    /// Install the handler receiving each accepted [`Connection`].
    ///
    /// The handler typically installs the connection's own handlers and
    /// spawns its `read_loop`. Without one, accepted sockets are dropped.
    pub fn on_new_connection<F>(&self, handler: F)
    where
        F: FnMut(Connection) + Send + 'static,
    {
        *self.on_new_connection.lock().expect("connection handler mutex poisoned") =
            Some(Box::new(handler));
    }

    /// Bind `0.0.0.0:port` and run the accept loop until
    /// [`stop`](Self::stop).
    ///
    /// Pass port 0 to bind an ephemeral port; [`local_addr`](Self::local_addr)
    /// reports the actual one.
    ///
    /// # Errors
    ///
    /// - [`NetError::AlreadyListening`] when another `listen` is running.
    /// - [`NetError::Io`] when the bind fails.
    pub async fn listen(&self, port: u16) -> Result<(), NetError> {
        let shutdown = {
            let mut listening = self.listening.lock().expect("listener state mutex poisoned");
            if *listening {
                return Err(NetError::AlreadyListening);
            }
            *listening = true;

            let mut shutdown = self.shutdown.lock().expect("shutdown mutex poisoned");
            *shutdown = Arc::new(Notify::new());
            Arc::clone(&shutdown)
        };

        let result = self.accept_loop(port, &shutdown).await;

        *self.local_addr.lock().expect("local addr mutex poisoned") = None;
        *self.listening.lock().expect("listener state mutex poisoned") = false;
        result
    }

    async fn accept_loop(&self, port: u16, shutdown: &Notify) -> Result<(), NetError> {
        let socket = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = socket.local_addr()?;
        *self.local_addr.lock().expect("local addr mutex poisoned") = Some(addr);
        tracing::debug!(%addr, "listening");

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::debug!(%addr, "listener stopped");
                    break;
                },
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    // Transient accept failures (per-connection resets,
                    // fd pressure) don't take the listener down.
                    Err(err) => tracing::error!(error = %err, "accept failed"),
                },
            }
        }
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        {
            let filter = self.filter.lock().expect("filter mutex poisoned");
            if let Some(filter) = filter.as_ref() {
                if !filter(&peer) {
                    let _ = stream.set_linger(Some(Duration::ZERO));
                    tracing::debug!(%peer, "connection rejected by filter");
                    return;
                }
            }
        }

        let _ = stream.set_nodelay(true);
        let _ = stream.set_linger(Some(CLOSE_LINGER));
        let connection = Connection::from_stream_with_pool(
            stream,
            Some(peer),
            self.config.clone(),
            self.pool.clone(),
        );

        tracing::debug!(%peer, "connection accepted");
        let mut handler =
            self.on_new_connection.lock().expect("connection handler mutex poisoned");
        match handler.as_mut() {
            Some(handler) => handler(connection),
            None => tracing::debug!(%peer, "no connection handler installed; dropping socket"),
        }
    }

    /// Cancel the running accept loop and release the listening socket.
    /// A no-op when nothing is listening.
    pub fn stop(&self) {
        self.shutdown.lock().expect("shutdown mutex poisoned").notify_one();
    }

    /// Address actually bound, while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr mutex poisoned")
    }

    /// Whether an accept loop is currently running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        *self.listening.lock().expect("listener state mutex poisoned")
    }
}
