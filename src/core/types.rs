use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias for coordination operations.
pub type RefreshResult<T> = Result<T, RefreshError>;

/// Stable widget identifier.
///
/// Ids are cloned into the registry, the refreshing set and every dispatch report, so they are
/// reference counted rather than owned strings.
pub type WidgetId = Arc<str>;

/// Canonical error surface for the coordination layer.
///
/// None of these reach widget callers: dispatch absorbs failures and the connection actor turns
/// transport failures into status transitions.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Push messages understood by the dispatcher.
///
/// Wire form is a JSON object tagged by `type`:
/// `{"type":"new_data","widget_type":"scale"}`, `{"type":"refresh_all"}`,
/// `{"type":"refresh_widget","widget_id":"weight-trend"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// New data landed for a coarse widget type (usually a device category).
    #[serde(rename = "new_data")]
    NewDataFor {
        #[serde(rename = "widget_type")]
        type_token: String,
    },
    RefreshAll,
    RefreshWidget { widget_id: String },
}

impl InboundMessage {
    pub fn new_data(type_token: impl Into<String>) -> Self {
        Self::NewDataFor {
            type_token: type_token.into(),
        }
    }

    pub fn refresh_widget(widget_id: impl Into<String>) -> Self {
        Self::RefreshWidget {
            widget_id: widget_id.into(),
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::NewDataFor { .. } => "new_data",
            InboundMessage::RefreshAll => "refresh_all",
            InboundMessage::RefreshWidget { .. } => "refresh_widget",
        }
    }
}

/// A delivered message together with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message: InboundMessage,
    pub received_at: SystemTime,
}

/// Lifecycle status of the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error {
        reason: String,
    },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionStatus::Error { .. })
    }

    pub fn error_reason(&self) -> Option<&str> {
        match self {
            ConnectionStatus::Error { reason } => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
            ConnectionStatus::Connecting => f.write_str("Connecting"),
            ConnectionStatus::Connected => f.write_str("Connected"),
            ConnectionStatus::Error { reason } => write!(f, "Error: {reason}"),
        }
    }
}

/// Why a live or pending connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    HandshakeFailed { message: String },
    RemoteClosed { reason: String },
    ReadFailure { error: String },
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::HandshakeFailed { message } => write!(f, "handshake failed: {message}"),
            DisconnectCause::RemoteClosed { reason } => write!(f, "remote closed: {reason}"),
            DisconnectCause::ReadFailure { error } => write!(f, "read error: {error}"),
        }
    }
}

/// Abstract reconnect strategy.
///
/// `next_delay` is consulted once per failure; `reset` runs after every successful handshake.
pub trait ReconnectStrategy: Send + Sync + 'static {
    fn next_delay(&mut self) -> Duration;
    fn reset(&mut self);
    fn should_retry(&self) -> bool;
}

/// Counters surfaced alongside the connection status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub messages_delivered: u64,
    pub frames_rejected: u64,
    pub total_reconnects: u64,
}
