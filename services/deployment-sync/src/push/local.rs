//! In-process push channel backed by a broadcast channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{PushChannel, PushEvent, Subscription};

/// A push channel whose events are published from the same process.
///
/// Cloning shares the underlying channel. While marked unavailable every
/// `subscribe` fails with a connection error.
#[derive(Debug, Clone)]
pub struct LocalPushChannel {
    sender: broadcast::Sender<(String, PushEvent)>,
    available: Arc<AtomicBool>,
}

impl Default for LocalPushChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPushChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Publish an event to every live subscription on `topic`.
    /// Returns the number of subscriptions it was offered to.
    pub fn publish(&self, topic: &str, event: PushEvent) -> usize {
        self.sender
            .send((topic.to_string(), event))
            .unwrap_or_default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of subscriptions currently attached
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    async fn subscribe(&self, topic: &str) -> crate::Result<Subscription> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(crate::SyncError::Connection(format!(
                "push channel unavailable for topic '{}'",
                topic
            )));
        }

        let mut incoming = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let forward_cancel = cancel.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = forward_cancel.cancelled() => break,
                    received = incoming.recv() => received,
                };
                match received {
                    Ok((event_topic, event)) => {
                        if event_topic != topic {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // A single event is enough to trigger a refresh
                        tracing::debug!("Local push subscriber lagged by {} events", skipped);
                        if tx.send(PushEvent::new("lagged")).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Local subscription on '{}' ended", topic);
        });

        Ok(Subscription::new(rx, cancel))
    }
}
