use std::fmt;
use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::{debug, trace};
use ulid::Ulid;

const EVENT_CAPACITY: usize = 1024;

/// Identity of one connected agent socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub Ulid);

impl ClientId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    AgentConnected {
        client: ClientId,
        addr: Option<SocketAddr>,
    },
    AgentDisconnected {
        client: ClientId,
    },
    LineSent {
        client: ClientId,
        line: String,
    },
    SendError {
        client: ClientId,
        message: String,
    },
    PingReceived {
        client: ClientId,
    },
    PongSent {
        client: ClientId,
    },
}

/// Fan-out of adapter lifecycle events to any number of subscribers.
///
/// Slow subscribers lag and lose events rather than stalling the adapter.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AdapterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.tx.subscribe()
    }

    /// Whether anyone is listening; used to skip building per-line events.
    pub fn is_observed(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub fn emit(&self, event: AdapterEvent) {
        match &event {
            AdapterEvent::AgentConnected { client, addr } => {
                debug!(%client, addr = ?addr, "agent connected")
            }
            AdapterEvent::AgentDisconnected { client } => debug!(%client, "agent disconnected"),
            AdapterEvent::LineSent { client, line } => trace!(%client, line = %line, "line sent"),
            AdapterEvent::SendError { client, message } => {
                debug!(%client, error = %message, "send error")
            }
            AdapterEvent::PingReceived { client } => debug!(%client, "ping received"),
            AdapterEvent::PongSent { client } => debug!(%client, "pong sent"),
        }

        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}
