//! Status sink: the narrow surface through which the core reports to a UI.
//!
//! The core only ever calls into a sink; sinks must return immediately and
//! swallow their own failures.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::probe::ConnectivityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Error,
}

/// A timestamped line for the operator's message log.
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    pub timestamp: DateTime<Local>,
    pub level: MessageLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level: MessageLevel::Error,
            text: text.into(),
        }
    }

    /// `[HH:MM:SS] text`, the format the message log displays.
    pub fn display_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

pub trait StatusSink: Send + Sync {
    /// Refresh the connectivity indicators.
    fn update_connectivity(&self, state: ConnectivityState);

    /// Append a line to the message log.
    fn append_message(&self, message: StatusMessage);
}

/// Sink that writes everything through `tracing`. Used by the headless daemon.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn update_connectivity(&self, state: ConnectivityState) {
        tracing::debug!(
            address_valid = state.address_valid,
            reachable = state.reachable,
            "Connectivity updated"
        );
    }

    fn append_message(&self, message: StatusMessage) {
        match message.level {
            MessageLevel::Info => info!(target: "watchdogd::status", "{}", message.text),
            MessageLevel::Error => error!(target: "watchdogd::status", "{}", message.text),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Connectivity(ConnectivityState),
    Message(StatusMessage),
}

/// Fans status updates out to any number of UI subscribers, and logs them
/// like [`TracingSink`].
///
/// Slow subscribers lag and lose old events rather than holding up the loops.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusEvent>,
    log: TracingSink,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            log: TracingSink,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl StatusSink for BroadcastSink {
    fn update_connectivity(&self, state: ConnectivityState) {
        self.log.update_connectivity(state);
        let _ = self.tx.send(StatusEvent::Connectivity(state));
    }

    fn append_message(&self, message: StatusMessage) {
        self.log.append_message(message.clone());
        let _ = self.tx.send(StatusEvent::Message(message));
    }
}
