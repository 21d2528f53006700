//! Sync controller: reconciles pull fetches and push notifications into one state
//!
//! The controller owns the only writable copy of [`SyncState`]. Three things
//! mutate it: list-fetch completions (initial, manual or push-triggered),
//! rename completions, and pending-name edits. Every mutation goes through
//! the state's `watch::Sender`, which serialises writers; the liveness check
//! runs inside that same critical section so nothing is applied once
//! [`SyncController::stop`] has returned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::deployment::DeploymentRecord;
use crate::error::{Result, SyncError};
use crate::fetch::FetchService;
use crate::push::{DisconnectHandle, PushChannel, Subscription};

/// Everything the render surface needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub deployments: Vec<DeploymentRecord>,
    /// Rename text the user is editing
    pub pending_name: String,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            deployments: vec![DeploymentRecord::fetching()],
            pending_name: String::new(),
        }
    }
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Starting,
    Active,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Idle => write!(f, "Idle"),
            Lifecycle::Starting => write!(f, "Starting"),
            Lifecycle::Active => write!(f, "Active"),
            Lifecycle::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub topic: String,
    pub rename_target_id: i64,
    pub sequence_refreshes: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic: config.push.topic.clone(),
            rename_target_id: config.controller.rename_target_id,
            sequence_refreshes: config.controller.sequence_refreshes,
        }
    }
}

/// A live push subscription and the task draining it
struct Running {
    disconnect: DisconnectHandle,
    pump: JoinHandle<()>,
}

struct Inner {
    fetch: Arc<dyn FetchService>,
    push: Arc<dyn PushChannel>,
    options: ControllerOptions,
    state: watch::Sender<SyncState>,
    lifecycle: watch::Sender<Lifecycle>,
    live: CancellationToken,
    running: Mutex<Option<Running>>,
    issued: AtomicU64,
    applied: AtomicU64,
}

/// Keeps the deployment list consistent with the remote service.
///
/// Cheap to clone; clones share the same state and lifecycle.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

impl fmt::Debug for SyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncController")
            .field("lifecycle", &self.lifecycle())
            .field("options", &self.inner.options)
            .finish()
    }
}

enum RefreshOutcome {
    Applied,
    Stale,
    Stopped,
}

impl SyncController {
    pub fn new(
        fetch: Arc<dyn FetchService>,
        push: Arc<dyn PushChannel>,
        options: ControllerOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        let (lifecycle, _) = watch::channel(Lifecycle::Idle);
        Self {
            inner: Arc::new(Inner {
                fetch,
                push,
                options,
                state,
                lifecycle,
                live: CancellationToken::new(),
                running: Mutex::new(None),
                issued: AtomicU64::new(0),
                applied: AtomicU64::new(0),
            }),
        }
    }

    /// Current state
    pub fn snapshot(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified after every applied mutation
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    /// Fetch once and subscribe to push notifications.
    ///
    /// The initial fetch runs in the background. If the subscription cannot
    /// be set up the list is replaced with the connection failure record,
    /// the controller stops for good and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let claimed = self.inner.lifecycle.send_if_modified(|lifecycle| {
            if *lifecycle == Lifecycle::Idle {
                *lifecycle = Lifecycle::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SyncError::Lifecycle(format!(
                "start() called while {}",
                self.lifecycle()
            )));
        }

        let topic = &self.inner.options.topic;
        info!("Starting sync controller on topic '{}'", topic);
        self.spawn_refresh();

        let subscription = match self.inner.push.subscribe(topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Push subscription to '{}' failed: {}", topic, e);
                self.apply("subscription failure", |state| {
                    state.deployments = vec![DeploymentRecord::unable_to_connect()];
                });
                self.shut_liveness();
                self.inner.lifecycle.send_replace(Lifecycle::Stopped);
                return Err(match e {
                    SyncError::Connection(_) => e,
                    other => SyncError::Connection(other.to_string()),
                });
            }
        };

        let mut running = self.inner.running.lock().await;
        if self.inner.live.is_cancelled() {
            debug!("Stopped while subscribing, dropping subscription");
            subscription.disconnect();
            return Ok(());
        }
        let disconnect = subscription.disconnect_handle();
        let pump = tokio::spawn(self.clone().pump(subscription));
        *running = Some(Running { disconnect, pump });
        drop(running);

        self.inner.lifecycle.send_if_modified(|lifecycle| {
            if *lifecycle == Lifecycle::Starting {
                *lifecycle = Lifecycle::Active;
                true
            } else {
                false
            }
        });
        info!("Sync controller active");
        Ok(())
    }

    /// Re-read the full deployment list and replace the displayed one.
    ///
    /// Failures are recovered into the connection failure record.
    pub async fn refresh(&self) {
        let seq = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Fetching deployments (request {})", seq);

        let deployments = match self.inner.fetch.list_deployments().await {
            Ok(deployments) => {
                debug!("Request {} returned {} deployments", seq, deployments.len());
                deployments
            }
            Err(e) => {
                warn!("Failed to fetch deployments: {}", e);
                vec![DeploymentRecord::unable_to_connect()]
            }
        };

        match self.apply_refresh(seq, deployments) {
            RefreshOutcome::Applied => {}
            RefreshOutcome::Stale => debug!("Discarding stale response to request {}", seq),
            RefreshOutcome::Stopped => debug!("Discarding request {} after stop", seq),
        }
    }

    pub fn set_pending_name(&self, value: impl Into<String>) {
        let value = value.into();
        self.inner.state.send_if_modified(|state| {
            if state.pending_name == value {
                return false;
            }
            state.pending_name = value;
            true
        });
    }

    /// Write the pending name to the rename target.
    ///
    /// Either way the pending name is cleared; on failure the list is
    /// replaced with a record describing the error. The list itself is not
    /// updated on success: the following push/refresh cycle brings the new
    /// name in.
    pub async fn submit_rename(&self) -> Result<()> {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(SyncError::Lifecycle(
                "submit_rename() called on a stopped controller".to_string(),
            ));
        }

        let name = self.inner.state.borrow().pending_name.clone();
        let id = self.inner.options.rename_target_id;
        info!("Renaming deployment {} to '{}'", id, name);

        match self.inner.fetch.rename_deployment(id, &name).await {
            Ok(()) => {
                self.apply("rename completion", |state| state.pending_name.clear());
            }
            Err(e) => {
                warn!("Rename of deployment {} failed: {}", id, e);
                let status = e.to_string();
                self.apply("rename failure", move |state| {
                    state.pending_name.clear();
                    state.deployments = vec![DeploymentRecord::with_status(status)];
                });
            }
        }
        Ok(())
    }

    /// Disconnect the push subscription and freeze the state.
    ///
    /// Safe in any lifecycle state and safe to repeat.
    pub async fn stop(&self) {
        self.shut_liveness();
        let previous = self.inner.lifecycle.send_replace(Lifecycle::Stopped);

        let running = self.inner.running.lock().await.take();
        if let Some(Running { disconnect, pump }) = running {
            disconnect.disconnect();
            if let Err(e) = pump.await {
                warn!("Push event pump ended abnormally: {}", e);
            }
            info!("Push subscription disconnected");
        }

        if previous != Lifecycle::Stopped {
            info!("Sync controller stopped (was {})", previous);
        }
    }

    fn spawn_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.refresh().await;
        });
    }

    async fn pump(self, mut subscription: Subscription) {
        let live = self.inner.live.clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = live.cancelled() => break,
                event = subscription.recv() => event,
            };
            let Some(event) = event else {
                warn!("Push event stream ended");
                break;
            };
            debug!(
                "Push event '{}' received (payload {:?}), refreshing",
                event.name, event.payload
            );
            self.spawn_refresh();
        }
        debug!("Push event pump finished");
    }

    /// Cancel liveness inside the state's critical section, so any mutation
    /// racing with this call either lands before it or not at all.
    fn shut_liveness(&self) {
        let live = &self.inner.live;
        self.inner.state.send_if_modified(|_| {
            live.cancel();
            false
        });
    }

    fn apply(&self, what: &str, mutate: impl FnOnce(&mut SyncState)) -> bool {
        let live = &self.inner.live;
        let applied = self.inner.state.send_if_modified(|state| {
            if live.is_cancelled() {
                return false;
            }
            mutate(state);
            true
        });
        if !applied {
            debug!("Discarding {} after stop", what);
        }
        applied
    }

    fn apply_refresh(&self, seq: u64, deployments: Vec<DeploymentRecord>) -> RefreshOutcome {
        let inner = &self.inner;
        let mut outcome = RefreshOutcome::Stopped;
        inner.state.send_if_modified(|state| {
            if inner.live.is_cancelled() {
                return false;
            }
            if inner.options.sequence_refreshes && seq < inner.applied.load(Ordering::SeqCst) {
                outcome = RefreshOutcome::Stale;
                return false;
            }
            inner.applied.fetch_max(seq, Ordering::SeqCst);
            state.deployments = deployments;
            outcome = RefreshOutcome::Applied;
            true
        });
        outcome
    }
}
