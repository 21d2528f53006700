//! Socket.IO v5 / Engine.IO v4 text frame codec
//!
//! Only the subset a subscribing client needs is modelled: the Engine.IO
//! handshake and heartbeat packets, and the Socket.IO namespace connect,
//! disconnect, connect-error and event packets. Everything else decodes to
//! [`Frame::Other`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Engine.IO handshake payload (`0{...}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// How long the connection may stay silent before it is considered dead
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// A decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Connect {
        namespace: String,
        data: Option<serde_json::Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        payload: Option<serde_json::Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<serde_json::Value>,
    },
    Other(String),
}

/// Socket.IO namespace for a topic (`deployments` -> `/deployments`)
pub fn namespace_for(topic: &str) -> String {
    if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{}", topic)
    }
}

/// Namespace CONNECT packet
pub fn encode_connect(namespace: &str) -> String {
    if namespace == "/" {
        "40".to_string()
    } else {
        format!("40{},", namespace)
    }
}

/// Heartbeat reply
pub fn encode_pong() -> String {
    "3".to_string()
}

/// Decode one WebSocket text message
pub fn decode(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let engine_type = chars
        .next()
        .ok_or_else(|| SyncError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_message(rest),
        '5' | '6' => Ok(Frame::Other(text.to_string())),
        other => Err(SyncError::Protocol(format!(
            "unknown Engine.IO packet type '{}'",
            other
        ))),
    }
}

fn decode_message(body: &str) -> Result<Frame> {
    let mut chars = body.chars();
    let packet_type = chars
        .next()
        .ok_or_else(|| SyncError::Protocol("empty Socket.IO packet".to_string()))?;
    let rest = chars.as_str();

    // Binary packets carry an attachment count before the namespace
    if matches!(packet_type, '5' | '6') {
        return Ok(Frame::Other(format!("4{}", body)));
    }

    let (namespace, rest) = split_namespace(rest);
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let (id, data) = rest.split_at(digits);
    let id = if id.is_empty() {
        None
    } else {
        Some(
            id.parse::<u64>()
                .map_err(|e| SyncError::Protocol(format!("bad ack id '{}': {}", id, e)))?,
        )
    };
    let data = if data.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<serde_json::Value>(data)?)
    };

    match packet_type {
        '0' => Ok(Frame::Connect { namespace, data }),
        '1' => Ok(Frame::Disconnect { namespace }),
        '2' => decode_event(namespace, id, data),
        '3' => Ok(Frame::Other(format!("4{}", body))),
        '4' => Ok(Frame::ConnectError { namespace, data }),
        other => Err(SyncError::Protocol(format!(
            "unknown Socket.IO packet type '{}'",
            other
        ))),
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return ("/".to_string(), rest);
    }
    match rest.find(',') {
        Some(comma) => (rest[..comma].to_string(), &rest[comma + 1..]),
        None => (rest.to_string(), ""),
    }
}

fn decode_event(
    namespace: String,
    id: Option<u64>,
    data: Option<serde_json::Value>,
) -> Result<Frame> {
    let mut args = match data {
        Some(serde_json::Value::Array(args)) => args,
        _ => {
            return Err(SyncError::Protocol(
                "event payload is not an array".to_string(),
            ))
        }
    };
    if args.is_empty() {
        return Err(SyncError::Protocol("event without a name".to_string()));
    }

    let name = match args.remove(0) {
        serde_json::Value::String(name) => name,
        other => {
            return Err(SyncError::Protocol(format!(
                "event name is not a string: {}",
                other
            )))
        }
    };
    let payload = match args.len() {
        0 => None,
        1 => args.pop(),
        _ => Some(serde_json::Value::Array(args)),
    };

    Ok(Frame::Event {
        namespace,
        id,
        name,
        payload,
    })
}
