use std::time::{Duration, SystemTime};

use super::history::MessageHistory;
use super::types::{
    ConnectionStats, ConnectionStatus, InboundMessage, ReceivedMessage, ReconnectStrategy,
};

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Monotonic tag for one connection attempt.
///
/// Every handshake, scheduled retry and reader task carries the epoch it was started under.
/// Events whose epoch no longer matches the state machine are stale and ignored, which is how an
/// explicit shutdown stays terminal even while timers and IO tasks are still unwinding.
pub type ConnectionEpoch = u64;

/// Read-only copy of the connection state for observers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub last_connected_at: Option<SystemTime>,
    pub reconnect_attempts: u32,
    pub last_message: Option<ReceivedMessage>,
    /// Oldest first.
    pub message_history: Vec<ReceivedMessage>,
    pub next_retry_delay: Option<Duration>,
    pub stats: ConnectionStats,
    pub epoch: ConnectionEpoch,
}

/// Lifecycle state machine for the single push connection.
///
/// Pure bookkeeping: no IO, no timers. The connection actor feeds it transport callbacks and acts
/// on what it returns (e.g. the backoff delay to sleep before retrying).
#[derive(Debug)]
pub struct ConnectionState<R> {
    status: ConnectionStatus,
    epoch: ConnectionEpoch,
    last_connected_at: Option<SystemTime>,
    reconnect_attempts: u32,
    last_message: Option<ReceivedMessage>,
    history: MessageHistory<ReceivedMessage>,
    next_retry_delay: Option<Duration>,
    stats: ConnectionStats,
    reconnect: R,
}

impl<R: ReconnectStrategy> ConnectionState<R> {
    pub fn new(reconnect: R, history_capacity: usize) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            epoch: 0,
            last_connected_at: None,
            reconnect_attempts: 0,
            last_message: None,
            history: MessageHistory::new(history_capacity),
            next_retry_delay: None,
            stats: ConnectionStats::default(),
            reconnect,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn epoch(&self) -> ConnectionEpoch {
        self.epoch
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn last_connected_at(&self) -> Option<SystemTime> {
        self.last_connected_at
    }

    pub fn last_message(&self) -> Option<&ReceivedMessage> {
        self.last_message.as_ref()
    }

    pub fn history(&self) -> &MessageHistory<ReceivedMessage> {
        &self.history
    }

    /// Caller-initiated start: `Disconnected → Connecting`.
    ///
    /// Returns the epoch of the new attempt, or `None` when a handshake is already in flight or
    /// the connection is up. From `Error` this skips the remaining backoff and connects now.
    pub fn start(&mut self) -> Option<ConnectionEpoch> {
        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => None,
            ConnectionStatus::Disconnected | ConnectionStatus::Error { .. } => {
                Some(self.enter_connecting())
            }
        }
    }

    /// Backoff elapsed: `Error → Connecting`, only for the attempt that scheduled it.
    pub fn retry(&mut self, epoch: ConnectionEpoch) -> Option<ConnectionEpoch> {
        if epoch != self.epoch || !self.status.is_error() {
            return None;
        }
        Some(self.enter_connecting())
    }

    /// Handshake completed: `Connecting → Connected`.
    pub fn on_open(&mut self, epoch: ConnectionEpoch, now: SystemTime) -> bool {
        if epoch != self.epoch || self.status != ConnectionStatus::Connecting {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(now);
        self.next_retry_delay = None;
        self.reconnect.reset();
        true
    }

    /// Handshake failure (`Connecting → Error`) or transport drop (`Connected → Error`).
    ///
    /// Returns the backoff to wait before [`retry`](Self::retry), or `None` when the event is
    /// stale or the strategy gave up.
    pub fn on_failure(&mut self, epoch: ConnectionEpoch, reason: String) -> Option<Duration> {
        if epoch != self.epoch
            || !matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            return None;
        }
        self.status = ConnectionStatus::Error { reason };
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

        if !self.reconnect.should_retry() {
            self.next_retry_delay = None;
            return None;
        }
        let delay = self.reconnect.next_delay();
        self.next_retry_delay = Some(delay);
        self.stats.total_reconnects = self.stats.total_reconnects.saturating_add(1);
        Some(delay)
    }

    /// Record a message. Only delivered while connected and only for the live epoch.
    pub fn on_message(
        &mut self,
        epoch: ConnectionEpoch,
        message: InboundMessage,
        now: SystemTime,
    ) -> bool {
        if epoch != self.epoch || !self.status.is_connected() {
            return false;
        }
        let received = ReceivedMessage {
            message,
            received_at: now,
        };
        self.history.push(received.clone());
        self.last_message = Some(received);
        self.stats.messages_delivered = self.stats.messages_delivered.saturating_add(1);
        true
    }

    pub fn on_rejected_frame(&mut self, epoch: ConnectionEpoch) {
        if epoch == self.epoch {
            self.stats.frames_rejected = self.stats.frames_rejected.saturating_add(1);
        }
    }

    /// Explicit shutdown: any state → `Disconnected`; every in-flight epoch becomes stale.
    pub fn shutdown(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.next_retry_delay = None;
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status.clone(),
            last_connected_at: self.last_connected_at,
            reconnect_attempts: self.reconnect_attempts,
            last_message: self.last_message.clone(),
            message_history: self.history.to_vec(),
            next_retry_delay: self.next_retry_delay,
            stats: self.stats,
            epoch: self.epoch,
        }
    }

    fn enter_connecting(&mut self) -> ConnectionEpoch {
        self.epoch = self.epoch.wrapping_add(1);
        self.status = ConnectionStatus::Connecting;
        self.next_retry_delay = None;
        self.epoch
    }
}
