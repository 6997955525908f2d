use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

use crate::core::{PushFrame, RefreshResult};

pub mod tungstenite;

/// Future returned by [`PushTransport::connect`]; resolves once the handshake completes.
pub type PushConnectFuture<R> = Pin<Box<dyn Future<Output = RefreshResult<R>> + Send>>;

/// Transport boundary for the push channel.
///
/// The read loop lives outside the connection actor; the actor owns lifecycle state and policy.
/// Keeping the trait this small lets tests swap in an in-memory transport without touching the
/// state machine.
pub trait PushTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = RefreshResult<PushFrame>> + Send + Unpin + 'static;

    fn connect(&self, url: String) -> PushConnectFuture<Self::Reader>;
}
