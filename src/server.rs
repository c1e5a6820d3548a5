//! Server endpoint: acceptor loop, connection table, and message dispatch.
//!
//! [`Server::bind`] starts an acceptor task on the ambient tokio runtime.
//! Every accepted socket gets a fresh [`ConnectionId`], a server-role
//! [`Connection`] whose I/O loops start immediately, and a slot in the
//! connection table; the acceptor then re-arms and keeps accepting until
//! [`Server::stop`].
//!
//! Application code drains the shared inbound queue from its own thread
//! with [`Server::update`], which invokes a [`ServerHandler`] per message.
//! Replies go back through [`Server::send_to`]; a target that is gone or
//! no longer open is removed from the table, not retried.
//!
//! # Example
//!
//! ```ignore
//! use meownet::{Message, MessageTag, Server, ServerHandler, ConnectionId};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_message(&mut self, server: &Server, origin: ConnectionId, message: Message) {
//!         server.send_to(origin, message);
//!     }
//! }
//!
//! # async fn run() -> meownet::Result<()> {
//! let server = Server::bind("127.0.0.1:8080").await?;
//! let mut handler = Echo;
//! loop {
//!     server.update(&mut handler, usize::MAX, true);
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionId, OwnedMessage, Side};
use crate::error::Result;
use crate::protocol::Message;
use crate::queue::SyncQueue;

/// Per-message callback invoked by [`Server::update`].
///
/// The overridable dispatch point: implement this on your application state
/// and reply through the `server` reference.
pub trait ServerHandler {
    /// Called once for every inbound message, in arrival order per
    /// connection.
    fn on_message(&mut self, server: &Server, origin: ConnectionId, message: Message);
}

type ConnectionTable = Mutex<HashMap<ConnectionId, Arc<Connection>>>;

/// A running server endpoint.
pub struct Server {
    local_addr: SocketAddr,
    inbound: Arc<SyncQueue<OwnedMessage>>,
    connections: Arc<ConnectionTable>,
    shutdown: watch::Sender<bool>,
    accept_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind a listener and start accepting connections.
    ///
    /// Tasks run on the tokio runtime this is called from; tear them down
    /// with [`Server::stop`]. Bind to port 0 and use
    /// [`Server::local_addr`] for an ephemeral port.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let inbound: Arc<SyncQueue<OwnedMessage>> = Arc::new(SyncQueue::new());
        let connections: Arc<ConnectionTable> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            inbound.clone(),
            connections.clone(),
            shutdown_rx,
        ));

        tracing::info!(%local_addr, "server started");

        Ok(Self {
            local_addr,
            inbound,
            connections,
            shutdown,
            accept_task: AsyncMutex::new(Some(accept_task)),
        })
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently in the table.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().expect("connection table poisoned").len()
    }

    /// The shared inbound queue. Application threads may `wait()` and pop
    /// from it directly instead of going through [`Server::update`].
    pub fn inbound(&self) -> &Arc<SyncQueue<OwnedMessage>> {
        &self.inbound
    }

    /// Drain up to `max_messages` inbound messages through `handler`,
    /// optionally blocking until at least one is available.
    ///
    /// Intended to be called from an application thread, not an async
    /// task (`wait = true` blocks on a condition variable). Returns the
    /// number of messages dispatched.
    pub fn update<H: ServerHandler>(
        &self,
        handler: &mut H,
        max_messages: usize,
        wait: bool,
    ) -> usize {
        if wait {
            self.inbound.wait();
        }

        let mut count = 0;
        while count < max_messages {
            let Some(owned) = self.inbound.pop_front() else {
                break;
            };
            let Some(origin) = owned.origin else {
                // Server-role connections always tag their messages.
                tracing::warn!("inbound message without origin, dropping");
                continue;
            };
            handler.on_message(self, origin, owned.message);
            count += 1;
        }
        count
    }

    /// Forward a message to `target` if it is still connected; otherwise
    /// drop the message and remove `target` from the table.
    pub fn send_to(&self, target: ConnectionId, message: Message) {
        let connection = {
            let table = self.connections.lock().expect("connection table poisoned");
            table.get(&target).cloned()
        };

        let Some(connection) = connection else {
            return;
        };

        if connection.send(message).is_err() {
            tracing::debug!(id = %target, "peer unreachable, removing connection");
            connection.disconnect();
            self.connections
                .lock()
                .expect("connection table poisoned")
                .remove(&target);
        }
    }

    /// Disconnect `target` and remove it from the table. No-op for unknown
    /// ids.
    pub fn disconnect(&self, target: ConnectionId) {
        let removed = self
            .connections
            .lock()
            .expect("connection table poisoned")
            .remove(&target);
        if let Some(connection) = removed {
            connection.disconnect();
        }
    }

    /// Stop accepting, disconnect every connection, and join all tasks.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }

        let connections: Vec<Arc<Connection>> = {
            let mut table = self.connections.lock().expect("connection table poisoned");
            table.drain().map(|(_, c)| c).collect()
        };
        for connection in connections {
            connection.disconnect();
            connection.join().await;
        }

        tracing::info!("server stopped");
    }
}

/// Accept loop: construct a connection per accepted socket and re-arm.
async fn accept_loop(
    listener: TcpListener,
    inbound: Arc<SyncQueue<OwnedMessage>>,
    connections: Arc<ConnectionTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let id = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
                    let connection = Connection::new(id, Side::Server, inbound.clone());
                    connection.open(stream).await;

                    connections
                        .lock()
                        .expect("connection table poisoned")
                        .insert(id, connection);

                    tracing::info!(%peer, %id, "accepted connection");
                }
                Err(e) => {
                    // Accept errors are transient (e.g. fd exhaustion);
                    // keep the acceptor armed.
                    tracing::error!(error = %e, "accept failed");
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
