use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tracing::{info, warn};

use shared::prelude::DecodeError;

/// Prefix stamped on every line handed to log listeners.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d - %H:%M:%S";

/// Callback receiving one timestamped, human-readable line per relay event.
pub type LogListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a connection handler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The peer closed the stream between frames.
    CleanClose,
    Transport(String),
    Decode(DecodeError),
    ProtocolViolation(String),
    NameTaken(String),
    /// The recipient's outbound queue overflowed under the disconnect policy.
    SlowConsumer,
    /// Writing to the peer failed.
    WriteFailed(String),
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::CleanClose => write!(f, "connection closed"),
            TerminationReason::Transport(err) => write!(f, "transport error: {err}"),
            TerminationReason::Decode(err) => write!(f, "malformed frame: {err}"),
            TerminationReason::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
            TerminationReason::NameTaken(name) => write!(f, "display name {name:?} already taken"),
            TerminationReason::SlowConsumer => write!(f, "outbound queue overflowed"),
            TerminationReason::WriteFailed(err) => write!(f, "write failed: {err}"),
            TerminationReason::Shutdown => write!(f, "relay shutting down"),
        }
    }
}

/// Lifecycle events reported by the relay and its connection handlers.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Listening { addr: SocketAddr },
    Connected { addr: SocketAddr },
    LoggedIn { name: String, addr: SocketAddr },
    NameConflict { name: String, addr: SocketAddr },
    SnapshotShared { name: String, recipients: usize },
    DeliveryFailed { recipient: String, detail: String },
    Disconnected {
        name: Option<String>,
        addr: SocketAddr,
        reason: TerminationReason,
    },
    Stopped,
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Listening { addr } => write!(f, "Listening for clients on {addr}"),
            RelayEvent::Connected { addr } => write!(f, "Client has connected {addr}"),
            RelayEvent::LoggedIn { name, addr } => write!(f, "User {name} logged in from {addr}"),
            RelayEvent::NameConflict { name, addr } => {
                write!(f, "There already is a user named {name}; refusing {addr}")
            }
            RelayEvent::SnapshotShared { name, recipients } => {
                write!(f, "Client {name} shared a snapshot with {recipients} peer(s)")
            }
            RelayEvent::DeliveryFailed { recipient, detail } => {
                write!(f, "Could not deliver snapshot to {recipient}: {detail}")
            }
            RelayEvent::Disconnected { name, addr, reason } => match name {
                Some(name) => write!(f, "Client {name} ({addr}) has disconnected: {reason}"),
                None => write!(f, "Client {addr} has disconnected: {reason}"),
            },
            RelayEvent::Stopped => write!(f, "Relay stopped"),
        }
    }
}

/// Fan-out point for relay diagnostics: every line goes to `tracing` and,
/// prefixed with the local time, to each registered listener.
#[derive(Clone, Default)]
pub struct RelayLog {
    listeners: Arc<Mutex<Vec<LogListener>>>,
}

impl RelayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: LogListener) {
        self.listeners.lock().push(listener);
    }

    pub fn emit(&self, event: &RelayEvent) {
        let line = event.to_string();
        match event {
            RelayEvent::NameConflict { .. } | RelayEvent::DeliveryFailed { .. } => warn!("{line}"),
            RelayEvent::Disconnected {
                reason: TerminationReason::ProtocolViolation(_) | TerminationReason::Decode(_),
                ..
            } => warn!("{line}"),
            _ => info!("{line}"),
        }
        self.publish(&line);
    }

    /// Record a free-form diagnostic line.
    pub fn line(&self, line: &str) {
        info!("{line}");
        self.publish(line);
    }

    fn publish(&self, line: &str) {
        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            return;
        }
        let stamped = format!("{} {line}", Local::now().format(TIMESTAMP_FORMAT));
        for listener in listeners {
            listener(&stamped);
        }
    }
}
