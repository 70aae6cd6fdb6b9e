//! Terminal Propagation Router
//!
//! Tracks which terminal lives on which connection and forwards every state
//! change to the wiring peers of the changed terminal.
//!
//! ## Responsibilities
//!
//! - Connection lifecycle: assign tokens, record client names, release
//!   everything a connection owned when it closes
//! - Registration: enforce global uniqueness of terminal names and hand each
//!   new terminal the levels already present on the terminals wired into it
//! - Propagation: store the reported state, then address one `statechange`
//!   to the owner of every registered peer
//! - Observability: publish a [`RouterEvent`] after each mutation
//!
//! ## Design
//!
//! - Action-based: methods return [`RouterAction`]s; the caller owns the
//!   sockets and executes them in order
//! - Errors close only the connection that caused them; the registry of every
//!   other connection stays intact
//! - Propagate before delete: a closing connection's terminals are driven to
//!   `None` so peers observe the loss before the entries disappear

use std::sync::Arc;

use tokio::sync::broadcast;
use wirenet_core::{Environment, WiringTable};
use wirenet_proto::{Message, State};

use crate::{
    events::{EventBus, RouterEvent},
    registry::{ConnectionId, ConnectionPhase, TOKEN_LEN, TerminalRegistry},
};

/// Token draws before [`Router::accept`] gives up.
pub const MAX_TOKEN_ATTEMPTS: usize = 1024;

/// Actions returned by the router for the transport to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Write a message to a connection.
    Send {
        /// Destination
        connection: ConnectionId,
        /// Message to write
        message: Message,
    },

    /// Terminate a connection's transport.
    Close {
        /// Connection to close
        connection: ConnectionId,
        /// Why it is being closed
        reason: String,
    },
}

/// Errors from router operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// Token is not live.
    #[error("unknown connection: {connection}")]
    UnknownConnection {
        /// The token
        connection: ConnectionId,
    },

    /// Connection sent `clientname` twice.
    #[error("connection {connection} already registered as {name}")]
    ClientNameAlreadySet {
        /// The connection
        connection: ConnectionId,
        /// Name it registered first
        name: String,
    },

    /// Terminal name is taken.
    #[error("terminal already registered: {terminal}")]
    DuplicateTerminalName {
        /// The duplicated name
        terminal: String,
        /// Current owner, `None` if the name repeats within one registration
        owner: Option<ConnectionId>,
    },

    /// State change for a terminal nobody registered.
    #[error("terminal not registered: {terminal}")]
    UnregisteredTerminal {
        /// The terminal
        terminal: String,
    },

    /// State change for a terminal owned by another connection.
    #[error("connection {connection} does not own {terminal}")]
    NotOwner {
        /// The terminal
        terminal: String,
        /// The connection that tried to change it
        connection: ConnectionId,
    },

    /// No free token found.
    #[error("no free connection token after {attempts} attempts")]
    TokenSpaceExhausted {
        /// Draws made
        attempts: usize,
    },
}

impl RouterError {
    /// Returns true if the offending connection must be closed.
    ///
    /// Rejected registrations and repeated names leave the connection open;
    /// state changes the router cannot attribute close it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnknownConnection { .. }
            | Self::UnregisteredTerminal { .. }
            | Self::NotOwner { .. }
            | Self::TokenSpaceExhausted { .. } => true,

            Self::ClientNameAlreadySet { .. } | Self::DuplicateTerminalName { .. } => false,
        }
    }
}

/// Observable view of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection token
    pub connection: ConnectionId,
    /// Announced client name
    pub client_name: Option<String>,
    /// Lifecycle phase
    pub phase: ConnectionPhase,
    /// Owned terminals in registration order
    pub terminals: Vec<String>,
}

/// Observable view of a registered terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSnapshot {
    /// Terminal name
    pub terminal: String,
    /// Last reported state
    pub state: State,
    /// Owning connection
    pub owner: ConnectionId,
}

/// Point-in-time copy of the router's registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterSnapshot {
    /// Live connections in token order
    pub connections: Vec<ConnectionSnapshot>,
    /// Registered terminals in name order
    pub terminals: Vec<TerminalSnapshot>,
}

impl RouterSnapshot {
    /// State of a terminal, if registered.
    pub fn state(&self, terminal: &str) -> Option<&State> {
        self.terminals.iter().find(|t| t.terminal == terminal).map(|t| &t.state)
    }
}

/// Server-side terminal registry and propagation engine.
pub struct Router<E: Environment> {
    env: E,
    wiring: Arc<WiringTable>,
    registry: TerminalRegistry,
    events: EventBus,
}

impl<E: Environment> Router<E> {
    /// Router over a fixed wiring table.
    pub fn new(env: E, wiring: Arc<WiringTable>) -> Self {
        Self { env, wiring, registry: TerminalRegistry::new(), events: EventBus::new() }
    }

    /// Wiring table in use.
    pub fn wiring(&self) -> &WiringTable {
        &self.wiring
    }

    /// Registry, read-only.
    pub fn registry(&self) -> &TerminalRegistry {
        &self.registry
    }

    /// Event bus handle.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to router events.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Check if a connection is live.
    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.registry.contains_connection(connection)
    }

    /// Assign a fresh token to a new connection.
    ///
    /// # Errors
    ///
    /// `RouterError::TokenSpaceExhausted` if no unused token turned up.
    pub fn accept(&mut self) -> Result<ConnectionId, RouterError> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let mut bytes = [0u8; TOKEN_LEN];
            self.env.random_bytes(&mut bytes);
            let id = ConnectionId::from_random(bytes);

            if self.registry.insert_connection(id, self.env.now()) {
                tracing::debug!("New incoming connection: {}", id);
                return Ok(id);
            }
        }

        tracing::error!("Could not find a free connection token");
        Err(RouterError::TokenSpaceExhausted { attempts: MAX_TOKEN_ATTEMPTS })
    }

    /// Record the client name a connection announced.
    ///
    /// # Errors
    ///
    /// `UnknownConnection`, or `ClientNameAlreadySet` on a second announcement.
    pub fn register_client_name(
        &mut self,
        connection: ConnectionId,
        name: &str,
    ) -> Result<(), RouterError> {
        let info = self
            .registry
            .connection_mut(connection)
            .ok_or(RouterError::UnknownConnection { connection })?;

        if let Some(existing) = &info.client_name {
            return Err(RouterError::ClientNameAlreadySet { connection, name: existing.clone() });
        }

        info.client_name = Some(name.to_string());
        if info.phase == ConnectionPhase::Accepted {
            info.phase = ConnectionPhase::NameRegistered;
        }

        tracing::info!("Client with id {} registered as {}", connection, name);
        self.events
            .publish(RouterEvent::ClientNameRegistered { connection, client: name.to_string() });

        Ok(())
    }

    /// Register terminals for a connection, all or nothing.
    ///
    /// Every entry starts at `None`. Each new terminal is then sent the stored
    /// state of every registered terminal wired into it, so a client that
    /// (re)connects picks up levels asserted while it was away.
    ///
    /// # Errors
    ///
    /// `UnknownConnection`, or `DuplicateTerminalName` if any name is taken
    /// (globally or by an earlier name in `names`). Nothing is registered in
    /// that case and the existing owner keeps its entry.
    pub fn register_terminals(
        &mut self,
        connection: ConnectionId,
        names: &[String],
    ) -> Result<Vec<RouterAction>, RouterError> {
        let client = self
            .registry
            .connection(connection)
            .ok_or(RouterError::UnknownConnection { connection })?
            .client_name
            .clone();

        if let Some((terminal, owner)) = self.registry.find_conflict(names) {
            tracing::warn!(
                "Client {} tried to register {}, already owned by {}",
                connection,
                terminal,
                owner.map_or_else(|| connection.to_string(), |o| o.to_string())
            );
            return Err(RouterError::DuplicateTerminalName {
                terminal: terminal.to_string(),
                owner,
            });
        }

        for name in names {
            self.registry.insert_terminal(name, connection);

            tracing::debug!("Client {} registered a terminal: {}", connection, name);
            self.events.publish(RouterEvent::TerminalRegistered {
                client: client.clone(),
                terminal: name.clone(),
                state: State::NoState,
                peers: self.wiring.peers(name).to_vec(),
            });
        }

        if let Some(info) = self.registry.connection_mut(connection) {
            if !names.is_empty() {
                info.phase = ConnectionPhase::Active;
            }
        }

        let mut actions = Vec::new();
        for name in names {
            for feeder in self.wiring.feeders(name) {
                let Some(entry) = self.registry.terminal(feeder) else {
                    continue;
                };
                if entry.state.is_none() {
                    continue;
                }

                tracing::debug!("Sent state of {} ({}) to new terminal {}", feeder, entry.state, name);
                actions.push(RouterAction::Send {
                    connection,
                    message: Message::state_change(name.as_str(), entry.state.clone()),
                });
            }
        }

        Ok(actions)
    }

    /// Store a terminal's new state and address it to every registered peer.
    ///
    /// The state is stored unconditionally. Peers nobody registered are
    /// skipped without error.
    ///
    /// # Errors
    ///
    /// `UnregisteredTerminal` if `terminal` is unknown, `NotOwner` if `source`
    /// did not register it.
    pub fn route_state_change(
        &mut self,
        terminal: &str,
        state: State,
        source: ConnectionId,
    ) -> Result<Vec<RouterAction>, RouterError> {
        let entry = self
            .registry
            .terminal_mut(terminal)
            .ok_or_else(|| RouterError::UnregisteredTerminal { terminal: terminal.to_string() })?;

        if entry.owner != source {
            return Err(RouterError::NotOwner { terminal: terminal.to_string(), connection: source });
        }

        let old_state = std::mem::replace(&mut entry.state, state.clone());
        tracing::debug!("{} changed state from {} to {}", terminal, old_state, state);

        let client = self.registry.connection(source).and_then(|info| info.client_name.clone());
        self.events.publish(RouterEvent::TerminalStateChanged {
            client,
            terminal: terminal.to_string(),
            state: state.clone(),
        });

        let mut actions = Vec::new();
        for peer in self.wiring.peers(terminal) {
            let Some(owner) = self.registry.owner(peer) else {
                tracing::trace!("Peer {} of {} is not registered", peer, terminal);
                continue;
            };

            tracing::debug!("Sent statechange on {} (new state: {}) to {}", peer, state, owner);
            actions.push(RouterAction::Send {
                connection: owner,
                message: Message::state_change(peer.as_str(), state.clone()),
            });
        }

        Ok(actions)
    }

    /// Release everything a connection owns.
    ///
    /// Each owned terminal is routed to `None` first, then its entry is
    /// deleted. Messages addressed back to the departing connection are
    /// dropped.
    ///
    /// # Errors
    ///
    /// `UnknownConnection` if the token is not live.
    pub fn unregister(&mut self, connection: ConnectionId) -> Result<Vec<RouterAction>, RouterError> {
        let info = self
            .registry
            .connection_mut(connection)
            .ok_or(RouterError::UnknownConnection { connection })?;
        info.phase = ConnectionPhase::Closed;
        let terminals = info.terminals.clone();

        let mut actions = Vec::new();
        for terminal in &terminals {
            let routed = self.route_state_change(terminal, State::NoState, connection)?;
            actions.extend(routed.into_iter().filter(|action| match action {
                RouterAction::Send { connection: to, .. } => *to != connection,
                RouterAction::Close { .. } => true,
            }));
        }

        for terminal in &terminals {
            self.registry.remove_terminal(terminal);
            tracing::debug!("Unregistered terminal {}", terminal);
            self.events.publish(RouterEvent::TerminalUnregistered { terminal: terminal.clone() });
        }

        let client = self.registry.remove_connection(connection).and_then(|info| {
            tracing::debug!(
                "Connection {} unregistered after {:?}",
                connection,
                self.env.now().saturating_duration_since(info.connected_at)
            );
            info.client_name
        });
        self.events.publish(RouterEvent::ClientNameUnregistered { connection, client });

        Ok(actions)
    }

    /// Close a connection: terminate its transport, then unregister it.
    ///
    /// Closing an unknown or already closed connection does nothing.
    pub fn close(&mut self, connection: ConnectionId, reason: &str) -> Vec<RouterAction> {
        if !self.is_open(connection) {
            return Vec::new();
        }

        tracing::debug!("Connection {} closed: {}", connection, reason);

        let mut actions = vec![RouterAction::Close { connection, reason: reason.to_string() }];
        match self.unregister(connection) {
            Ok(routed) => actions.extend(routed),
            Err(e) => tracing::error!("Failed to unregister {}: {}", connection, e),
        }
        actions
    }

    /// Apply one message from a connection.
    ///
    /// # Errors
    ///
    /// Whatever the matching operation returns.
    pub fn dispatch(
        &mut self,
        connection: ConnectionId,
        message: Message,
    ) -> Result<Vec<RouterAction>, RouterError> {
        match message {
            Message::ClientName { name } => {
                self.register_client_name(connection, &name)?;
                Ok(Vec::new())
            },
            Message::Registration { terminals } => self.register_terminals(connection, &terminals),
            Message::StateChange { terminal, state } => {
                self.route_state_change(&terminal, state, connection)
            },
        }
    }

    /// Apply one message, containing errors to the offending connection.
    ///
    /// Fatal errors close the connection; the rest are logged and the message
    /// is dropped.
    pub fn handle_message(&mut self, connection: ConnectionId, message: Message) -> Vec<RouterAction> {
        match self.dispatch(connection, message) {
            Ok(actions) => actions,
            Err(e) if e.is_fatal() => {
                tracing::warn!("Closing connection {}: {}", connection, e);
                self.close(connection, &e.to_string())
            },
            Err(e) => {
                tracing::warn!("Rejected message from {}: {}", connection, e);
                Vec::new()
            },
        }
    }

    /// Copy of the registry for observers.
    pub fn snapshot(&self) -> RouterSnapshot {
        let connections = self
            .registry
            .connections()
            .map(|(connection, info)| ConnectionSnapshot {
                connection,
                client_name: info.client_name.clone(),
                phase: info.phase,
                terminals: info.terminals.clone(),
            })
            .collect();

        let terminals = self
            .registry
            .terminals()
            .map(|(name, entry)| TerminalSnapshot {
                terminal: name.to_string(),
                state: entry.state.clone(),
                owner: entry.owner,
            })
            .collect();

        RouterSnapshot { connections, terminals }
    }
}

impl<E: Environment> std::fmt::Debug for Router<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("connections", &self.registry.connection_count())
            .field("terminals", &self.registry.terminal_count())
            .field("wiring_entries", &self.wiring.entry_count())
            .finish_non_exhaustive()
    }
}
