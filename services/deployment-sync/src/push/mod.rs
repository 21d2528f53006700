//! Push notification channel
//!
//! A push channel delivers opaque "something changed" events for a topic.
//! Events carry no state the controller trusts; each one only means the
//! displayed deployment list may be stale.
//!
//! The production channel speaks Socket.IO over a WebSocket
//! ([`websocket::WebSocketPushChannel`]); [`local::LocalPushChannel`] is an
//! in-process channel for embedding and tests.

pub mod local;
pub mod socketio;
pub mod websocket;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use local::LocalPushChannel;
pub use websocket::WebSocketPushChannel;

/// Name of the synthetic event emitted after a dropped connection is restored
pub const RECONNECTED_EVENT: &str = "reconnected";

/// A notification received from the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub name: String,
    /// Observed for logging only, never parsed into state
    pub payload: Option<serde_json::Value>,
}

impl PushEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
        }
    }
}

/// Capability to open subscriptions on a topic
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a subscription. Fails with `SyncError::Connection` when the
    /// channel cannot be set up.
    async fn subscribe(&self, topic: &str) -> crate::Result<Subscription>;
}

/// Cloneable handle that terminates a subscription
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    cancel: CancellationToken,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An open subscription: a stream of events plus its disconnect switch.
///
/// Dropping the subscription disconnects it.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<PushEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wrap the receiving end of a producer. The producer must stop once
    /// `cancel` fires.
    pub fn new(events: mpsc::Receiver<PushEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once disconnected or the producer has gone away
    pub async fn recv(&mut self) -> Option<PushEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            cancel: self.cancel.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
