//! Terminal state engine.
//!
//! The engine owns the process-local set of terminals. Each terminal holds its
//! current [`State`] and at most one [`TerminalReaction`].
//!
//! # Local and remote paths
//!
//! ```text
//! device ──apply_local_change──► engine ──statechange──► outbound queue
//!                                  ▲
//! server ──statechange──► apply_remote_change ──► reaction(engine, ...)
//! ```
//!
//! The two paths are deliberately asymmetric:
//!
//! - Local changes equal to the stored state are dropped. This is what stops
//!   a cyclic wiring graph from echoing forever.
//! - Remote changes always reach the reaction, even when the value is
//!   unchanged. Devices use the arrival itself to re-assert their effects.
//!
//! The engine performs no I/O. Outbound messages accumulate until the
//! connection layer drains them with [`TerminalEngine::take_outbound`].

use std::{collections::BTreeMap, sync::Arc};

use wirenet_proto::{Message, State};

use crate::{error::EngineError, reaction::TerminalReaction};

/// One registered terminal.
struct Terminal {
    state: State,
    reaction: Option<Arc<dyn TerminalReaction>>,
}

/// Process-local terminal registry and state machine.
pub struct TerminalEngine {
    /// Group label sent in `clientname`.
    client_name: String,

    /// Registered terminals by name.
    terminals: BTreeMap<String, Terminal>,

    /// Whether the connection is up. Reactions are dormant while it is not.
    connected: bool,

    /// Messages waiting to be written to the connection.
    outbound: Vec<Message>,
}

impl TerminalEngine {
    /// Create an engine announcing itself as `client_name`.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            terminals: BTreeMap::new(),
            connected: false,
            outbound: Vec::new(),
        }
    }

    /// Group label.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// True between `on_connected` and `on_disconnected`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of registered terminals.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Check if a terminal is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.terminals.contains_key(name)
    }

    /// Registered terminal names, in sorted order.
    pub fn terminal_names(&self) -> impl Iterator<Item = &str> {
        self.terminals.keys().map(String::as_str)
    }

    /// Register a terminal.
    ///
    /// While connected, the new terminal is announced to the server with its
    /// own `registration` message.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateTerminal` if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        initial_state: State,
        reaction: Option<Arc<dyn TerminalReaction>>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.terminals.contains_key(&name) {
            return Err(EngineError::DuplicateTerminal { name });
        }

        tracing::debug!("Registered terminal {} (state: {})", name, initial_state);

        if self.connected {
            self.outbound.push(Message::Registration { terminals: vec![name.clone()] });
        }
        self.terminals.insert(name, Terminal { state: initial_state, reaction });

        Ok(())
    }

    /// Attach a reaction, replacing any previous one.
    ///
    /// Returns the reaction that was replaced.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownTerminal` if the name is not registered.
    pub fn attach_reaction(
        &mut self,
        name: &str,
        reaction: Arc<dyn TerminalReaction>,
    ) -> Result<Option<Arc<dyn TerminalReaction>>, EngineError> {
        let terminal = self.terminal_mut(name)?;
        Ok(terminal.reaction.replace(reaction))
    }

    /// Current state of a terminal.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownTerminal` if the name is not registered.
    pub fn get_state(&self, name: &str) -> Result<&State, EngineError> {
        self.terminals
            .get(name)
            .map(|t| &t.state)
            .ok_or_else(|| EngineError::UnknownTerminal { name: name.to_string() })
    }

    /// Change a terminal on behalf of the local device.
    ///
    /// No-op when `new_state` equals the stored state. Otherwise stores it and
    /// queues a `statechange` for the server. While disconnected only the
    /// stored state changes; [`Self::on_connected`] sends it after the
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownTerminal` if the name is not registered.
    pub fn apply_local_change(&mut self, name: &str, new_state: State) -> Result<(), EngineError> {
        let connected = self.connected;
        let terminal = self.terminal_mut(name)?;

        if terminal.state == new_state {
            return Ok(());
        }

        tracing::debug!("{} changed state from {} to {}", name, terminal.state, new_state);
        terminal.state = new_state.clone();

        if connected {
            self.outbound.push(Message::state_change(name, new_state));
        } else {
            tracing::debug!("Holding {} for the next connection", name);
        }

        Ok(())
    }

    /// Apply a state change routed from the server.
    ///
    /// Stores the state if it differs, then invokes the terminal's reaction
    /// unconditionally. Dormant while disconnected.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownTerminal` if the name is not registered,
    /// or whatever the reaction returns.
    pub fn apply_remote_change(&mut self, name: &str, new_state: State) -> Result<(), EngineError> {
        if !self.connected {
            tracing::debug!("Ignoring delivery on {}: reactions are dormant", name);
            return Ok(());
        }

        let terminal = self.terminal_mut(name)?;
        if terminal.state != new_state {
            tracing::debug!("{} received state {} (was {})", name, new_state, terminal.state);
            terminal.state = new_state.clone();
        }

        // Cloned out so the reaction can borrow the engine mutably.
        let Some(reaction) = terminal.reaction.clone() else {
            return Ok(());
        };
        reaction.on_state_change(self, name, &new_state)
    }

    /// Dispatch a message received from the server.
    ///
    /// # Errors
    ///
    /// `UnexpectedMessage` for anything other than `statechange`; otherwise
    /// see [`Self::apply_remote_change`].
    pub fn handle_message(&mut self, message: Message) -> Result<(), EngineError> {
        match message {
            Message::StateChange { terminal, state } => self.apply_remote_change(&terminal, state),
            other => Err(EngineError::UnexpectedMessage { keyword: other.keyword() }),
        }
    }

    /// The connection is up: announce the client name and every terminal.
    ///
    /// Queues `clientname` followed by a single `registration` (omitted when
    /// no terminal is registered), then one `statechange` for every terminal
    /// already holding a level: initial states and changes made while
    /// disconnected. Reactions wake up.
    pub fn on_connected(&mut self) {
        self.connected = true;
        self.outbound.push(Message::ClientName { name: self.client_name.clone() });

        if !self.terminals.is_empty() {
            let terminals = self.terminals.keys().cloned().collect();
            self.outbound.push(Message::Registration { terminals });
        }

        for (name, terminal) in &self.terminals {
            if !terminal.state.is_none() {
                self.outbound.push(Message::state_change(name.as_str(), terminal.state.clone()));
            }
        }

        tracing::debug!(
            "Client {} announced {} terminal(s)",
            self.client_name,
            self.terminals.len()
        );
    }

    /// The connection is gone.
    ///
    /// Reactions become dormant, pending output is discarded and every
    /// terminal reverts to `None`, matching what the server does on its side.
    /// Registrations are kept for the next `on_connected`.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.outbound.clear();
        for terminal in self.terminals.values_mut() {
            terminal.state = State::NoState;
        }
    }

    /// Drain queued outbound messages in the order they were produced.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbound)
    }

    /// Check whether output is waiting to be written.
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn terminal_mut(&mut self, name: &str) -> Result<&mut Terminal, EngineError> {
        self.terminals
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownTerminal { name: name.to_string() })
    }
}

impl std::fmt::Debug for TerminalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalEngine")
            .field("client_name", &self.client_name)
            .field("terminal_count", &self.terminals.len())
            .field("connected", &self.connected)
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
