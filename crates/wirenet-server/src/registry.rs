//! Terminal and connection registry.
//!
//! Pure bookkeeping: who is connected, what each connection owns, and the last
//! state stored for every terminal. Routing decisions live in the router.

use std::{collections::BTreeMap, fmt, time::Instant};

use wirenet_proto::State;

/// Alphabet connection tokens are drawn from.
const TOKEN_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a connection token.
pub const TOKEN_LEN: usize = 4;

/// Opaque token naming one live connection, e.g. `K3QZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId([u8; TOKEN_LEN]);

impl ConnectionId {
    /// Map random bytes onto the token alphabet.
    pub fn from_random(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes.map(|b| TOKEN_ALPHABET[usize::from(b) % TOKEN_ALPHABET.len()]))
    }

    /// Parse a token from its display form.
    ///
    /// Returns `None` unless `token` is exactly four upper-case alphanumeric
    /// characters.
    pub fn from_token(token: &str) -> Option<Self> {
        let bytes: [u8; TOKEN_LEN] = token.as_bytes().try_into().ok()?;
        bytes.iter().all(|b| TOKEN_ALPHABET.contains(b)).then_some(Self(bytes))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            fmt::Write::write_char(f, char::from(b))?;
        }
        Ok(())
    }
}

/// Lifecycle of a connection as seen by the router.
///
/// ```text
/// Accepted ──clientname──► NameRegistered ──registration──► Active
///    │                                                        │
///    └────────────────────────registration────────────────────┘
/// any ──close──► Closed
/// ```
///
/// `registration` and `statechange` are accepted in every open phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Token assigned, nothing received yet.
    Accepted,
    /// `clientname` received.
    NameRegistered,
    /// At least one terminal registered.
    Active,
    /// Closed; terminals released.
    Closed,
}

/// One live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Client name, once announced
    pub client_name: Option<String>,
    /// Lifecycle phase
    pub phase: ConnectionPhase,
    /// Owned terminals in registration order
    pub terminals: Vec<String>,
    /// When the connection was accepted
    pub connected_at: Instant,
}

/// One registered terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalEntry {
    /// Last state reported by the owner
    pub state: State,
    /// Connection that registered the terminal
    pub owner: ConnectionId,
}

/// Connections and the terminals they own.
#[derive(Debug, Default)]
pub struct TerminalRegistry {
    connections: BTreeMap<ConnectionId, ConnectionInfo>,
    terminals: BTreeMap<String, TerminalEntry>,
}

impl TerminalRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted connection.
    ///
    /// Returns false if the token is already live.
    pub fn insert_connection(&mut self, id: ConnectionId, now: Instant) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            ConnectionInfo {
                client_name: None,
                phase: ConnectionPhase::Accepted,
                terminals: Vec::new(),
                connected_at: now,
            },
        );
        true
    }

    /// Check if a token is live.
    pub fn contains_connection(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Live connection by token.
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionInfo> {
        self.connections.get(&id)
    }

    /// Mutable live connection by token.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionInfo> {
        self.connections.get_mut(&id)
    }

    /// Live connections in token order.
    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &ConnectionInfo)> {
        self.connections.iter().map(|(id, info)| (*id, info))
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registered terminal by name.
    pub fn terminal(&self, name: &str) -> Option<&TerminalEntry> {
        self.terminals.get(name)
    }

    /// Mutable registered terminal by name.
    pub fn terminal_mut(&mut self, name: &str) -> Option<&mut TerminalEntry> {
        self.terminals.get_mut(name)
    }

    /// Owner of a registered terminal.
    pub fn owner(&self, name: &str) -> Option<ConnectionId> {
        self.terminals.get(name).map(|t| t.owner)
    }

    /// Registered terminals in name order.
    pub fn terminals(&self) -> impl Iterator<Item = (&str, &TerminalEntry)> {
        self.terminals.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of registered terminals.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Find the first name in `names` that cannot be registered.
    ///
    /// A name is taken when it is registered anywhere or appears earlier in
    /// the same list. Returns the name and the connection holding it (`None`
    /// for an in-list repeat).
    pub fn find_conflict<'a>(
        &self,
        names: &'a [String],
    ) -> Option<(&'a str, Option<ConnectionId>)> {
        for (i, name) in names.iter().enumerate() {
            if let Some(entry) = self.terminals.get(name) {
                return Some((name, Some(entry.owner)));
            }
            if names[..i].contains(name) {
                return Some((name, None));
            }
        }
        None
    }

    /// Register a terminal at `NoState` for `owner`.
    ///
    /// Callers check [`Self::find_conflict`] first; an existing entry is left
    /// untouched and false is returned.
    pub fn insert_terminal(&mut self, name: &str, owner: ConnectionId) -> bool {
        if self.terminals.contains_key(name) {
            return false;
        }
        let Some(info) = self.connections.get_mut(&owner) else {
            return false;
        };
        info.terminals.push(name.to_string());
        self.terminals.insert(name.to_string(), TerminalEntry { state: State::NoState, owner });
        true
    }

    /// Drop a terminal entry.
    pub fn remove_terminal(&mut self, name: &str) -> Option<TerminalEntry> {
        let entry = self.terminals.remove(name)?;
        if let Some(info) = self.connections.get_mut(&entry.owner) {
            info.terminals.retain(|t| t != name);
        }
        Some(entry)
    }

    /// Drop a connection record. Its terminals must already be removed.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(&id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(token: &str) -> ConnectionId {
        ConnectionId::from_token(token).unwrap()
    }

    #[test]
    fn token_display_round_trips() {
        let token = ConnectionId::from_random([0, 25, 26, 255]);
        let shown = token.to_string();
        assert_eq!(shown.len(), TOKEN_LEN);
        assert!(shown.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        assert_eq!(ConnectionId::from_token(&shown), Some(token));
    }

    #[test]
    fn token_parse_rejects_bad_input() {
        assert!(ConnectionId::from_token("abcd").is_none());
        assert!(ConnectionId::from_token("ABC").is_none());
        assert!(ConnectionId::from_token("ABCDE").is_none());
        assert!(ConnectionId::from_token("AB-D").is_none());
    }

    #[test]
    fn duplicate_connection_rejected() {
        let mut registry = TerminalRegistry::new();
        assert!(registry.insert_connection(id("AAAA"), Instant::now()));
        assert!(!registry.insert_connection(id("AAAA"), Instant::now()));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn conflict_detection() {
        let mut registry = TerminalRegistry::new();
        registry.insert_connection(id("AAAA"), Instant::now());
        registry.insert_terminal("T1", id("AAAA"));

        let names = vec!["T2".to_string(), "T1".to_string()];
        assert_eq!(registry.find_conflict(&names), Some(("T1", Some(id("AAAA")))));

        let names = vec!["T3".to_string(), "T3".to_string()];
        assert_eq!(registry.find_conflict(&names), Some(("T3", None)));

        let names = vec!["T4".to_string()];
        assert_eq!(registry.find_conflict(&names), None);
    }

    #[test]
    fn terminal_removal_updates_owner() {
        let mut registry = TerminalRegistry::new();
        registry.insert_connection(id("AAAA"), Instant::now());
        registry.insert_terminal("T1", id("AAAA"));
        registry.insert_terminal("T2", id("AAAA"));

        registry.remove_terminal("T1");

        assert_eq!(registry.connection(id("AAAA")).unwrap().terminals, vec!["T2".to_string()]);
        assert!(registry.terminal("T1").is_none());
    }

    #[test]
    fn insert_terminal_requires_live_owner() {
        let mut registry = TerminalRegistry::new();
        assert!(!registry.insert_terminal("T1", id("ZZZZ")));
        assert_eq!(registry.terminal_count(), 0);
    }
}
