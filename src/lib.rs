//! Kameo-based push coordination for dashboard widget refreshes.
//!
//! A single [`push::PushConnectionActor`] keeps the push channel alive and forwards every
//! delivered message to a shared [`dispatch::Dispatcher`], which fans it out to the refresh
//! actions widgets registered for themselves.

pub mod core;
pub mod dispatch;
pub mod observe;
pub mod push;
pub mod testing;
pub mod transport;

pub use crate::core::{
    BackoffReconnect, ConnectionSnapshot, ConnectionStatus, InboundMessage, RefreshError,
    RefreshResult, WidgetId,
};
pub use dispatch::{
    DispatchReport, Dispatcher, DispatcherConfig, OverlapPolicy, RefreshAction, TypeGroupTable,
    WidgetHandle,
};
pub use observe::{ConnectionWatch, DashboardStatus, StatusView};
pub use push::{PushConnectionActor, PushConnectionArgs, PushEvent};
