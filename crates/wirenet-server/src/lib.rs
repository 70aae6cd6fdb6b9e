//! Wirenet router server.
//!
//! This crate provides the server that routes terminal state between clients:
//! - Tokio for the TCP transport and async runtime
//! - A sans-IO [`Router`] holding the terminal registry
//! - A broadcast [`EventBus`] for observers
//!
//! ## Architecture
//!
//! ```text
//! wirenet-server
//!   ├─ Server             (TCP accept loop)
//!   ├─ Hub                (router + per-connection writer queues, one mutex)
//!   ├─ Router             (registration, propagation, close/unregister)
//!   ├─ TerminalRegistry   (connections, owned terminals, stored states)
//!   └─ EventBus           (observability)
//! ```
//!
//! Every connection gets a reader task and a writer task. Router actions are
//! executed while the hub lock is held, so messages reach each destination
//! queue in routing order; writer tasks drain their queue independently, so a
//! slow client never stalls routing for the others.
//!
//! Writer queues are bounded. A client that stops reading until its queue is
//! full is closed like any other failing connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod events;
mod registry;
mod router;

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use bytes::BytesMut;
pub use error::ServerError;
pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, RouterEvent};
pub use registry::{
    ConnectionId, ConnectionInfo, ConnectionPhase, TOKEN_LEN, TerminalEntry, TerminalRegistry,
};
pub use router::{
    ConnectionSnapshot, MAX_TOKEN_ATTEMPTS, Router, RouterAction, RouterError, RouterSnapshot,
    TerminalSnapshot,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, Notify, broadcast, mpsc, mpsc::error::TrySendError},
    task::AbortHandle,
};
use wirenet_core::{SystemEnv, WiringMode, WiringTable};
use wirenet_proto::{LineCodec, Message};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:23456")
    pub bind_address: String,
    /// Wiring table file; `None` starts with an empty table
    pub wiring_path: Option<PathBuf>,
    /// How wiring entries are interpreted
    pub wiring_mode: WiringMode,
    /// Messages queued per connection before it is closed as unresponsive
    pub outbound_capacity: usize,
}

/// Default bound of a connection's writer queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:23456".to_string(),
            wiring_path: None,
            wiring_mode: WiringMode::Symmetric,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Transport side of a live connection.
struct Peer {
    queue: mpsc::Sender<Message>,
    writer: AbortHandle,
    closed: Arc<Notify>,
}

/// Router plus the queue feeding each connection's writer.
struct Hub {
    router: Router<SystemEnv>,
    peers: HashMap<ConnectionId, Peer>,
}

impl Hub {
    fn is_open(&self, connection: ConnectionId) -> bool {
        self.peers.contains_key(&connection)
    }

    /// Execute router actions in order.
    ///
    /// A send that finds its queue full closes that connection; the actions
    /// of that close run after the ones already pending.
    fn execute(&mut self, actions: Vec<RouterAction>) {
        let mut pending = VecDeque::from(actions);

        while let Some(action) = pending.pop_front() {
            match action {
                RouterAction::Send { connection, message } => {
                    let Some(peer) = self.peers.get(&connection) else {
                        tracing::debug!("Dropping message for closed connection {}", connection);
                        continue;
                    };
                    match peer.queue.try_send(message) {
                        Ok(()) => {},
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!("Outbound queue of {} is full", connection);
                            peer.writer.abort();
                            pending.extend(self.router.close(connection, "outbound queue full"));
                        },
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("Writer for {} is gone", connection);
                        },
                    }
                },

                RouterAction::Close { connection, reason } => {
                    tracing::info!("Closing connection {}: {}", connection, reason);
                    if let Some(peer) = self.peers.remove(&connection) {
                        peer.closed.notify_one();
                    }
                },
            }
        }
    }
}

/// Production wirenet server.
pub struct Server {
    listener: TcpListener,
    hub: Arc<Mutex<Hub>>,
    events: EventBus,
    outbound_capacity: usize,
}

impl Server {
    /// Load the wiring table and bind.
    ///
    /// A missing wiring file is logged and the server starts with no links.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The wiring file exists but cannot be read
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let wiring = match &config.wiring_path {
            Some(path) => match WiringTable::load(path, config.wiring_mode) {
                Ok(table) => table,
                Err(e) if e.is_not_found() => {
                    tracing::error!("{} does not exist. No connections registered.", path.display());
                    WiringTable::new(config.wiring_mode)
                },
                Err(e) => return Err(e.into()),
            },
            None => WiringTable::new(config.wiring_mode),
        };

        let server = Self::bind_with_wiring(&config.bind_address, wiring).await?;
        Ok(server.with_outbound_capacity(config.outbound_capacity))
    }

    /// Bind with an already-built wiring table.
    ///
    /// # Errors
    ///
    /// Returns error if binding to the address fails.
    pub async fn bind_with_wiring(
        bind_address: &str,
        wiring: WiringTable,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_address).await?;
        let router = Router::new(SystemEnv::new(), Arc::new(wiring));
        let events = router.events().clone();
        let hub = Hub { router, peers: HashMap::new() };

        Ok(Self {
            listener,
            hub: Arc::new(Mutex::new(hub)),
            events,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        })
    }

    /// Bound each connection's writer queue to `capacity` messages.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Get the local address the server is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Subscribe to router events.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Copy of the router's registry.
    pub async fn snapshot(&self) -> RouterSnapshot {
        self.hub.lock().await.router.snapshot()
    }

    /// Run the server, accepting connections and routing messages.
    ///
    /// This method runs until the task is cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server now listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let hub = Arc::clone(&self.hub);
                    let capacity = self.outbound_capacity;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, hub, capacity).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Serve one client connection until it closes.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Mutex<Hub>>,
    capacity: usize,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let (queue, pending) = mpsc::channel(capacity);
    let closed = Arc::new(Notify::new());

    let connection = {
        let mut hub = hub.lock().await;
        let connection = hub.router.accept()?;
        let writer = tokio::spawn(write_loop(connection, writer, pending)).abort_handle();
        hub.peers.insert(connection, Peer { queue, writer, closed: Arc::clone(&closed) });
        connection
    };
    tracing::debug!("Connection {} from {}", connection, peer);

    let reason = match read_loop(connection, reader, &hub, &closed).await {
        Ok(()) => "connection closed".to_string(),
        Err(e) => {
            tracing::warn!("Connection {} failed: {}", connection, e);
            e.to_string()
        },
    };

    let mut hub = hub.lock().await;
    let actions = hub.router.close(connection, &reason);
    hub.execute(actions);

    Ok(())
}

/// Decode lines and hand them to the router.
///
/// Returns when the peer hangs up or the hub closed the connection.
async fn read_loop(
    connection: ConnectionId,
    mut reader: OwnedReadHalf,
    hub: &Mutex<Hub>,
    closed: &Notify,
) -> Result<(), ServerError> {
    let codec = LineCodec::new();
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
            },
            () = closed.notified() => return Ok(()),
        }

        while let Some(message) = codec.decode(&mut buf)? {
            let mut hub = hub.lock().await;
            let actions = hub.router.handle_message(connection, message);
            hub.execute(actions);

            if !hub.is_open(connection) {
                return Ok(());
            }
        }
    }
}

/// Drain a connection's queue onto its socket.
///
/// Ends when the queue is dropped (connection closed) or a write fails.
async fn write_loop(
    connection: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut pending: mpsc::Receiver<Message>,
) {
    let codec = LineCodec::new();
    let mut buf = BytesMut::new();

    while let Some(message) = pending.recv().await {
        buf.clear();
        let mut batch = Some(message);
        while let Some(message) = batch {
            if let Err(e) = codec.encode(&message, &mut buf) {
                tracing::error!("Cannot encode message for {}: {}", connection, e);
            }
            batch = pending.try_recv().ok();
        }

        if let Err(e) = writer.write_all(&buf).await {
            tracing::debug!("Write to {} failed: {}", connection, e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown of {} failed: {}", connection, e);
    }
}
