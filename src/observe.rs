//! Read-only views over connection and dispatch state for status panels and debug tooling.

use std::collections::BTreeSet;
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::debug;

use crate::core::{ConnectionSnapshot, ConnectionStatus, ReceivedMessage, WidgetId};
use crate::dispatch::Dispatcher;

/// Subscription to the connection actor's published snapshots.
///
/// Obtained with `actor_ref.ask(WatchConnection)`. Keeps working after the actor stops; it then
/// reports the last published snapshot.
#[derive(Debug, Clone)]
pub struct ConnectionWatch {
    rx: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionWatch {
    pub(crate) fn new(rx: watch::Receiver<ConnectionSnapshot>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> ConnectionSnapshot {
        self.rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.rx.borrow().status.clone()
    }

    /// Wait for the next published snapshot. Returns `None` once the actor is gone.
    pub async fn changed(&mut self) -> Option<ConnectionSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until `predicate` holds for the published snapshot, checking the current one first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ConnectionSnapshot>
    where
        F: FnMut(&ConnectionSnapshot) -> bool,
    {
        self.rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }
}

/// Everything a status panel shows, captured at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardStatus {
    pub status: ConnectionStatus,
    pub last_connected_at: Option<SystemTime>,
    pub reconnect_attempts: u32,
    pub last_message: Option<ReceivedMessage>,
    pub message_history: Vec<ReceivedMessage>,
    pub registered: usize,
    /// Sorted.
    pub refreshing: Vec<WidgetId>,
}

/// Combines the dispatcher with an optional connection watch.
///
/// Without a connection the status reads as `Disconnected` with empty history. Once the
/// connection actor is gone the view keeps its last snapshot and only refreshing-set changes
/// wake [`StatusView::changed`].
#[derive(Debug, Clone)]
pub struct StatusView {
    dispatcher: Dispatcher,
    refreshing: watch::Receiver<BTreeSet<WidgetId>>,
    connection: Option<ConnectionWatch>,
    connection_live: bool,
}

enum Wake {
    Connection { live: bool },
    Refreshing,
}

impl StatusView {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let refreshing = dispatcher.watch_refreshing();
        Self {
            dispatcher,
            refreshing,
            connection: None,
            connection_live: false,
        }
    }

    pub fn with_connection(mut self, connection: ConnectionWatch) -> Self {
        self.connection = Some(connection);
        self.connection_live = true;
        self
    }

    pub fn snapshot(&self) -> DashboardStatus {
        let connection = self
            .connection
            .as_ref()
            .map(ConnectionWatch::current)
            .unwrap_or_default();
        DashboardStatus {
            status: connection.status,
            last_connected_at: connection.last_connected_at,
            reconnect_attempts: connection.reconnect_attempts,
            last_message: connection.last_message,
            message_history: connection.message_history,
            registered: self.dispatcher.registered_count(),
            refreshing: self.dispatcher.refreshing_ids().into_iter().collect(),
        }
    }

    /// Wait until either the connection or the refreshing set changes, then return a fresh status.
    ///
    /// Changes that landed since the previous call are not lost: the next call returns at once.
    pub async fn changed(&mut self) -> DashboardStatus {
        loop {
            let wake = match self.connection.as_mut() {
                Some(connection) if self.connection_live => {
                    tokio::select! {
                        res = connection.rx.changed() => Wake::Connection { live: res.is_ok() },
                        _ = self.refreshing.changed() => Wake::Refreshing,
                    }
                }
                // The dispatcher owns the sender and this view holds the dispatcher, so this
                // receiver never closes.
                _ => {
                    let _ = self.refreshing.changed().await;
                    Wake::Refreshing
                }
            };
            if let Wake::Connection { live: false } = wake {
                debug!("connection watch closed; status view follows the refreshing set only");
                self.connection_live = false;
                continue;
            }
            return self.snapshot();
        }
    }
}
