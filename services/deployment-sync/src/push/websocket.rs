//! Socket.IO push channel over a WebSocket
//!
//! Handles the Engine.IO handshake, namespace connect, heartbeat replies and
//! reconnection. A subscription only fails from `subscribe` when the first
//! connection cannot be set up; once established, dropped connections are
//! retried in the background according to [`ReconnectConfig`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::socketio::{self, Frame};
use super::{PushChannel, PushEvent, Subscription, RECONNECTED_EVENT};
use crate::config::{PushConfig, ReconnectConfig};
use crate::error::{Result, SyncError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push channel speaking Socket.IO to `push.base_url`
#[derive(Debug, Clone)]
pub struct WebSocketPushChannel {
    config: PushConfig,
}

impl WebSocketPushChannel {
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    /// Engine.IO WebSocket endpoint derived from the base URL
    pub fn endpoint(&self) -> String {
        format!(
            "{}/socket.io/?EIO=4&transport=websocket",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PushChannel for WebSocketPushChannel {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let link = Link {
            url: self.endpoint(),
            namespace: socketio::namespace_for(topic),
            event_name: self.config.event_name.clone(),
            connect_timeout: self.config.connect_timeout(),
            reconnect: self.config.reconnect.clone(),
        };

        info!("Subscribing to {} on {}", link.namespace, link.url);
        let session = link.open().await?;

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(run_subscription(session, link, tx, cancel.clone()));

        Ok(Subscription::new(rx, cancel))
    }
}

/// Everything needed to (re)open a session
#[derive(Debug, Clone)]
struct Link {
    url: String,
    namespace: String,
    event_name: String,
    connect_timeout: Duration,
    reconnect: ReconnectConfig,
}

/// A connected socket that has joined the namespace
struct Session {
    socket: Socket,
    heartbeat_timeout: Duration,
}

enum SessionEnd {
    Cancelled,
    Dropped(String),
}

impl Link {
    async fn open(&self) -> Result<Session> {
        tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| {
                SyncError::Connection(format!(
                    "Connection to {} timed out after {:?}",
                    self.url, self.connect_timeout
                ))
            })?
            .map_err(|e| match e {
                SyncError::Connection(_) => e,
                other => SyncError::Connection(format!("Handshake with {} failed: {}", self.url, other)),
            })
    }

    async fn handshake(&self) -> Result<Session> {
        let (mut socket, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            SyncError::Connection(format!("Failed to connect to {}: {}", self.url, e))
        })?;
        debug!("WebSocket established to {}", self.url);

        let open = loop {
            match next_frame(&mut socket).await? {
                Frame::Open(info) => break info,
                other => debug!("Ignoring {:?} before handshake", other),
            }
        };
        debug!("Engine.IO session {} opened", open.sid);

        socket
            .send(Message::Text(socketio::encode_connect(&self.namespace)))
            .await
            .map_err(|e| SyncError::Connection(format!("Failed to join namespace: {}", e)))?;

        loop {
            match next_frame(&mut socket).await? {
                Frame::Connect { namespace, .. } if namespace == self.namespace => break,
                Frame::ConnectError { namespace, data } if namespace == self.namespace => {
                    return Err(SyncError::Connection(format!(
                        "Namespace {} refused: {}",
                        namespace,
                        data.map(|d| d.to_string()).unwrap_or_default()
                    )));
                }
                Frame::Ping => {
                    socket
                        .send(Message::Text(socketio::encode_pong()))
                        .await
                        .map_err(|e| SyncError::Connection(e.to_string()))?;
                }
                other => debug!("Ignoring {:?} while joining namespace", other),
            }
        }

        info!("Joined namespace {}", self.namespace);
        Ok(Session {
            socket,
            heartbeat_timeout: open.heartbeat_timeout(),
        })
    }

    /// Retry until a session is open, retries run out, or `cancel` fires
    async fn reopen(&self, cancel: &CancellationToken) -> Option<Session> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if let Some(max) = self.reconnect.max_retries {
                if attempt > max {
                    warn!("Push reconnection failed: max retries ({}) exceeded", max);
                    return None;
                }
            }

            let delay = self.reconnect.backoff_for(attempt);
            info!(
                "Reconnecting push channel (attempt {}/{}) in {:?}",
                attempt,
                self.reconnect
                    .max_retries
                    .map_or("unlimited".to_string(), |m| m.to_string()),
                delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return None,
            }

            let opened = tokio::select! {
                opened = self.open() => opened,
                _ = cancel.cancelled() => return None,
            };
            match opened {
                Ok(session) => {
                    info!("Push channel reconnected");
                    return Some(session);
                }
                Err(e) => debug!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}

async fn next_frame(socket: &mut Socket) -> Result<Frame> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return socketio::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SyncError::Connection(
                    "Connection closed during handshake".to_string(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SyncError::Connection(format!("Read error: {}", e))),
        }
    }
}

async fn run_subscription(
    mut session: Session,
    link: Link,
    events: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
) {
    loop {
        match pump(&mut session, &link, &events, &cancel).await {
            SessionEnd::Cancelled => {
                debug!("Push subscription on {} disconnected", link.namespace);
                let _ = session.socket.close(None).await;
                return;
            }
            SessionEnd::Dropped(reason) => {
                warn!("Push connection lost: {}", reason);
            }
        }

        if !link.reconnect.enabled {
            debug!("Reconnect disabled, ending push subscription");
            return;
        }

        match link.reopen(&cancel).await {
            Some(reopened) => {
                session = reopened;
                // Updates may have been missed while disconnected
                if events.send(PushEvent::new(RECONNECTED_EVENT)).await.is_err() {
                    let _ = session.socket.close(None).await;
                    return;
                }
            }
            None => return,
        }
    }
}

async fn pump(
    session: &mut Session,
    link: &Link,
    events: &mpsc::Sender<PushEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            _ = tokio::time::sleep(session.heartbeat_timeout) => {
                return SessionEnd::Dropped("heartbeat timed out".to_string());
            }
            message = session.socket.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return SessionEnd::Dropped("connection closed by remote".to_string())
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return SessionEnd::Dropped(format!("read error: {}", e)),
        };

        let frame = match socketio::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Failed to decode push frame {:?}: {}", text, e);
                continue;
            }
        };

        match frame {
            Frame::Ping => {
                if let Err(e) = session
                    .socket
                    .send(Message::Text(socketio::encode_pong()))
                    .await
                {
                    return SessionEnd::Dropped(format!("write error: {}", e));
                }
            }
            Frame::Event {
                namespace,
                name,
                payload,
                ..
            } if namespace == link.namespace && name == link.event_name => {
                debug!("Push event '{}' received: {:?}", name, payload);
                let event = PushEvent { name, payload };
                if events.send(event).await.is_err() {
                    return SessionEnd::Cancelled;
                }
            }
            Frame::Disconnect { namespace } if namespace == link.namespace => {
                return SessionEnd::Dropped(format!("server left namespace {}", namespace));
            }
            Frame::Close => {
                return SessionEnd::Dropped("server closed the session".to_string());
            }
            other => debug!("Ignoring push frame {:?}", other),
        }
    }
}
