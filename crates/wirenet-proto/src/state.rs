//! Terminal state tokens.

use std::fmt;

/// Wire token of the "no state" sentinel.
pub const NO_STATE_TOKEN: &str = "None";

/// Well-known voltage tokens.
///
/// The protocol treats these as opaque strings. They are collected here so
/// device models and tests agree on spelling.
pub mod voltage {
    /// AC mains, energized.
    pub const AC_ON: &str = "230VAC";
    /// AC mains, zero reference.
    pub const AC_OFF: &str = "0VAC";
    /// DC power, energized.
    pub const DC_ON: &str = "48VDC";
    /// DC power, zero reference.
    pub const DC_OFF: &str = "0VDC";
    /// Signal level, energized.
    pub const SIGNAL_ON: &str = "12VDC";
    /// Signal level, zero reference. Shares its token with [`DC_OFF`].
    pub const SIGNAL_OFF: &str = "0VDC";
    /// Logic supply.
    pub const LOGIC: &str = "5VDC";
}

/// Discrete state carried by a terminal.
///
/// `NoState` is the sentinel for a terminal nobody is driving. Every other
/// value is an opaque voltage token compared by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Terminal is not driven.
    #[default]
    NoState,
    /// Terminal is driven at the given voltage token.
    Level(String),
}

impl State {
    /// Builds a state from its wire token.
    ///
    /// The token `None` maps to [`State::NoState`]; anything else is a level.
    pub fn from_token(token: &str) -> Self {
        if token == NO_STATE_TOKEN { Self::NoState } else { Self::Level(token.to_string()) }
    }

    /// Wire token for this state.
    pub fn token(&self) -> &str {
        match self {
            Self::NoState => NO_STATE_TOKEN,
            Self::Level(token) => token,
        }
    }

    /// True if nobody drives the terminal.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::NoState)
    }
}

impl From<&str> for State {
    fn from(token: &str) -> Self {
        Self::from_token(token)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
