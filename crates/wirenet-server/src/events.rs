//! Router observability.
//!
//! The router publishes what happened after every mutation. Observers (a
//! monitoring UI, the server binary's logger, tests) subscribe to a broadcast
//! channel and never influence routing. Events published while nobody
//! listens are discarded.

use tokio::sync::broadcast;
use wirenet_proto::State;

use crate::registry::ConnectionId;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something observable the router did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A connection announced its client name.
    ClientNameRegistered {
        /// Connection token
        connection: ConnectionId,
        /// Announced name
        client: String,
    },

    /// A connection went away.
    ClientNameUnregistered {
        /// Connection token
        connection: ConnectionId,
        /// Name it had announced, if any
        client: Option<String>,
    },

    /// A terminal was registered.
    TerminalRegistered {
        /// Owner's client name, if announced
        client: Option<String>,
        /// Terminal name
        terminal: String,
        /// Initial state (always `None` on the wire)
        state: State,
        /// Wiring peers of the terminal
        peers: Vec<String>,
    },

    /// A terminal was released by its closing owner.
    TerminalUnregistered {
        /// Terminal name
        terminal: String,
    },

    /// The owner of a terminal reported a new state.
    TerminalStateChanged {
        /// Owner's client name, if announced
        client: Option<String>,
        /// Terminal name
        terminal: String,
        /// Reported state
        state: State,
    },
}

/// Fan-out of [`RouterEvent`]s to any number of observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RouterEvent>,
}

impl EventBus {
    /// Bus with [`DEFAULT_EVENT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Bus buffering up to `capacity` events per subscriber.
    ///
    /// Slow subscribers lag and lose the oldest events; routing never waits.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver seeing every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: RouterEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(terminal: &str) -> RouterEvent {
        RouterEvent::TerminalUnregistered { terminal: terminal.to_string() }
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(event("T1")), 0);
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(event("T1")), 2);
        assert_eq!(bus.publish(event("T2")), 2);

        assert_eq!(first.try_recv().unwrap(), event("T1"));
        assert_eq!(first.try_recv().unwrap(), event("T2"));
        assert_eq!(second.try_recv().unwrap(), event("T1"));
    }

    #[test]
    fn lagging_subscriber_loses_oldest() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for name in ["T1", "T2", "T3"] {
            bus.publish(event(name));
        }

        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(1))));
        assert_eq!(rx.try_recv().unwrap(), event("T2"));
    }
}
