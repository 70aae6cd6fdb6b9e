//! Static wiring table.
//!
//! The wiring table declares which terminals are electrically connected. It is
//! built once before the server starts listening and never changes afterwards,
//! so routing contexts share it behind an `Arc` without locking.
//!
//! # Source format
//!
//! ```text
//! # comment
//! Q1.1 -> F1.1, F2.1
//! F1.2 -> K1.A1
//! ```
//!
//! One entry per line. Blank lines and lines starting with `#` are ignored.
//! Lines without exactly one `->`, without a left-hand terminal, or without
//! any peer are logged and skipped.
//!
//! # Modes
//!
//! - [`WiringMode::Directed`]: `A -> B, C` makes `B` and `C` the fan-out of
//!   `A` only. A later line for the same `A` replaces the earlier fan-out.
//! - [`WiringMode::Symmetric`]: the link is recorded from both endpoints, so
//!   state flows either way. Repeated left-hand sides accumulate.
//!
//! Peers may name terminals that are never registered; routing to them is a
//! no-op at the router.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Separator between a terminal and its peers.
pub const LINK_ARROW: &str = "->";

/// How entries are turned into fan-out sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WiringMode {
    /// Output terminal to list of input terminals.
    Directed,
    /// Links are recorded from both endpoints.
    #[default]
    Symmetric,
}

/// Errors from loading a wiring table.
#[derive(Debug, Error)]
pub enum WiringError {
    /// The wiring file could not be read.
    #[error("cannot read wiring table {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl WiringError {
    /// True if the wiring file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

/// Immutable mapping from terminal name to its ordered fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiringTable {
    mode: WiringMode,
    links: HashMap<String, Vec<String>>,
    entries: usize,
    link_count: usize,
    skipped_lines: usize,
}

impl WiringTable {
    /// Empty table in the given mode.
    pub fn new(mode: WiringMode) -> Self {
        Self { mode, ..Self::default() }
    }

    /// Build a table from already-parsed entries.
    pub fn from_entries<I, T, P>(mode: WiringMode, entries: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut table = Self::new(mode);
        for (terminal, peers) in entries {
            let peers: Vec<String> = peers.into_iter().map(|p| p.as_ref().to_string()).collect();
            table.add_entry(terminal.as_ref(), &peers);
        }
        table
    }

    /// Parse the text format. Malformed lines are logged and skipped.
    pub fn parse(source: &str, mode: WiringMode) -> Self {
        let mut table = Self::new(mode);

        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_entry(line) {
                Some((terminal, peers)) => table.add_entry(terminal, &peers),
                None => {
                    tracing::warn!("Malformed wiring line {}: {:?}", index + 1, raw);
                    table.skipped_lines += 1;
                },
            }
        }

        tracing::info!(
            "Successfully registered {} connections from {} entries",
            table.link_count,
            table.entries
        );

        table
    }

    /// Read and parse a wiring file.
    ///
    /// # Errors
    ///
    /// Returns `WiringError::Io` if the file cannot be read. Malformed lines
    /// are not errors.
    pub fn load(path: impl AsRef<Path>, mode: WiringMode) -> Result<Self, WiringError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| WiringError::Io { path: path.to_path_buf(), source })?;
        Ok(Self::parse(&source, mode))
    }

    /// Add one entry, applying the table's mode.
    pub fn add_entry<S: AsRef<str>>(&mut self, terminal: &str, peers: &[S]) {
        let mut fan_out: Vec<String> = Vec::with_capacity(peers.len());
        for peer in peers {
            let peer = peer.as_ref();
            if peer == terminal {
                tracing::warn!("Ignoring self-link on terminal {}", terminal);
                continue;
            }
            if !fan_out.iter().any(|p| p == peer) {
                fan_out.push(peer.to_string());
            }
        }

        match self.mode {
            WiringMode::Directed => {
                if self.links.contains_key(terminal) {
                    tracing::warn!("Wiring entry for {} replaces an earlier entry", terminal);
                }
                self.link_count += fan_out.len();
                self.links.insert(terminal.to_string(), fan_out);
            },
            WiringMode::Symmetric => {
                for peer in fan_out {
                    if push_unique(self.links.entry(terminal.to_string()).or_default(), &peer) {
                        self.link_count += 1;
                    }
                    push_unique(self.links.entry(peer).or_default(), terminal);
                }
            },
        }

        self.entries += 1;
    }

    /// Construction mode.
    pub fn mode(&self) -> WiringMode {
        self.mode
    }

    /// Fan-out of `terminal`, empty if the terminal is not wired.
    pub fn peers(&self, terminal: &str) -> &[String] {
        self.links.get(terminal).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Terminals whose fan-out contains `terminal`, sorted by name.
    ///
    /// In symmetric mode these are exactly the peers of `terminal`.
    pub fn feeders(&self, terminal: &str) -> Vec<&str> {
        let mut feeders: Vec<&str> = self
            .iter()
            .filter(|(_, peers)| peers.iter().any(|p| p == terminal))
            .map(|(feeder, _)| feeder)
            .collect();
        feeders.sort_unstable();
        feeders
    }

    /// True if `a` delivers to `b`.
    pub fn is_linked(&self, a: &str, b: &str) -> bool {
        self.peers(a).iter().any(|p| p == b)
    }

    /// Number of entries accepted.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Number of distinct links declared by the accepted entries.
    pub fn link_count(&self) -> usize {
        self.link_count
    }

    /// Number of malformed lines skipped while parsing.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// True if no terminal has a fan-out.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Every terminal with a fan-out, with that fan-out.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.links.iter().map(|(terminal, peers)| (terminal.as_str(), peers.as_slice()))
    }
}

fn parse_entry(line: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = line.split(LINK_ARROW);
    let (terminal, peers) = match (parts.next(), parts.next(), parts.next()) {
        (Some(terminal), Some(peers), None) => (terminal.trim(), peers),
        _ => return None,
    };

    if terminal.is_empty() {
        return None;
    }

    let peers: Vec<&str> = peers.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if peers.is_empty() {
        return None;
    }

    Some((terminal, peers))
}

fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|existing| existing == item) {
        false
    } else {
        list.push(item.to_string());
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
# Main supply
Q1.1 -> F1.1, F2.1

F1.2 -> K1.A1
   # indented comment
K1.A2 -> N1
";

    #[test]
    fn directed_parse() {
        let table = WiringTable::parse(SAMPLE, WiringMode::Directed);

        assert_eq!(table.entry_count(), 3);
        assert_eq!(table.link_count(), 4);
        assert_eq!(table.peers("Q1.1"), ["F1.1".to_string(), "F2.1".to_string()]);
        assert_eq!(table.peers("F1.2"), ["K1.A1".to_string()]);
        assert!(table.peers("F1.1").is_empty());
        assert!(table.is_linked("Q1.1", "F2.1"));
        assert!(!table.is_linked("F2.1", "Q1.1"));
    }

    #[test]
    fn symmetric_parse_links_both_ends() {
        let table = WiringTable::parse(SAMPLE, WiringMode::Symmetric);

        assert_eq!(table.entry_count(), 3);
        assert_eq!(table.link_count(), 4);
        assert_eq!(table.peers("Q1.1"), ["F1.1".to_string(), "F2.1".to_string()]);
        assert_eq!(table.peers("F1.1"), ["Q1.1".to_string()]);
        assert_eq!(table.peers("F2.1"), ["Q1.1".to_string()]);
        assert_eq!(table.peers("N1"), ["K1.A2".to_string()]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let source = "\
A -> B
this line has no arrow
C -> D -> E
 -> F
G ->
H -> ,  ,
I -> J
";
        let table = WiringTable::parse(source, WiringMode::Directed);

        assert_eq!(table.entry_count(), 2);
        assert_eq!(table.skipped_lines(), 5);
        assert_eq!(table.peers("A"), ["B".to_string()]);
        assert_eq!(table.peers("I"), ["J".to_string()]);
        assert!(table.peers("C").is_empty());
    }

    #[test]
    fn directed_later_entry_replaces_fan_out() {
        let table = WiringTable::parse("A -> B, C\nA -> D\n", WiringMode::Directed);
        assert_eq!(table.peers("A"), ["D".to_string()]);
    }

    #[test]
    fn symmetric_repeated_entries_accumulate_without_duplicates() {
        let table = WiringTable::parse("A -> B\nA -> C, B\nB -> A\n", WiringMode::Symmetric);

        assert_eq!(table.peers("A"), ["B".to_string(), "C".to_string()]);
        assert_eq!(table.peers("B"), ["A".to_string()]);
        assert_eq!(table.peers("C"), ["A".to_string()]);
        assert_eq!(table.link_count(), 2);
    }

    #[test]
    fn duplicate_peers_collapse() {
        let table = WiringTable::parse("A -> B, B, C\n", WiringMode::Directed);
        assert_eq!(table.peers("A"), ["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn self_links_ignored() {
        let table = WiringTable::parse("A -> A, B\n", WiringMode::Symmetric);
        assert_eq!(table.peers("A"), ["B".to_string()]);
    }

    #[test]
    fn from_entries_matches_parse() {
        let built = WiringTable::from_entries(
            WiringMode::Symmetric,
            [("Q1.1", vec!["F1.1", "F2.1"]), ("F1.2", vec!["K1.A1"]), ("K1.A2", vec!["N1"])],
        );
        let parsed = WiringTable::parse(SAMPLE, WiringMode::Symmetric);

        for terminal in ["Q1.1", "F1.1", "F2.1", "F1.2", "K1.A1", "K1.A2", "N1"] {
            assert_eq!(built.peers(terminal), parsed.peers(terminal), "{terminal}");
        }
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let table = WiringTable::load(file.path(), WiringMode::Directed).unwrap();
        assert_eq!(table.entry_count(), 3);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = WiringTable::load(dir.path().join("missing.txt"), WiringMode::Symmetric)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn feeders_follow_direction() {
        let directed = WiringTable::parse(SAMPLE, WiringMode::Directed);
        assert_eq!(directed.feeders("F2.1"), ["Q1.1"]);
        assert!(directed.feeders("Q1.1").is_empty());

        let symmetric = WiringTable::parse("B -> A\nC -> A\n", WiringMode::Symmetric);
        assert_eq!(symmetric.feeders("A"), ["B", "C"]);
        assert_eq!(symmetric.feeders("B"), ["A"]);
    }

    #[test]
    fn empty_table_has_no_peers() {
        let table = WiringTable::new(WiringMode::Directed);
        assert!(table.is_empty());
        assert!(table.peers("anything").is_empty());
    }

    proptest::proptest! {
        #[test]
        fn symmetric_links_hold_both_ways(
            entries in proptest::collection::vec(
                ("[A-E][0-9]", proptest::collection::vec("[A-E][0-9]", 1..4)),
                0..12,
            ),
        ) {
            let table = WiringTable::from_entries(WiringMode::Symmetric, entries);

            for (terminal, peers) in table.iter() {
                for peer in peers {
                    proptest::prop_assert_ne!(peer.as_str(), terminal);
                    proptest::prop_assert!(table.is_linked(peer, terminal));
                    proptest::prop_assert_eq!(peers.iter().filter(|p| *p == peer).count(), 1);
                }
            }
        }
    }
}
