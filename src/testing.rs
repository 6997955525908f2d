//! Reusable test utilities for exercising the coordinator without a real socket.
//!
//! [`MockTransport`] drives `PushConnectionActor` deterministically (handshake failures, pushed
//! frames, server-side socket drops); [`RecordingAction`] stands in for a widget's refresh.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::core::{
    InboundMessage, PushFrame, ReconnectStrategy, RefreshError, RefreshResult, encode_message,
};
use crate::dispatch::{ActionError, RefreshAction};
use crate::transport::{PushConnectFuture, PushTransport};

type FrameSender = mpsc::UnboundedSender<RefreshResult<PushFrame>>;

struct MockState {
    failures: VecDeque<String>,
    socket: Option<FrameSender>,
    connects: usize,
}

/// A transport backed by in-memory channels so tests can emulate the push server.
///
/// Create it with [`MockTransport::channel_pair`] to obtain both:
/// - the transport for `PushConnectionActor`
/// - a [`MockServer`] handle used by tests to fail handshakes, push frames, or drop the socket.
///
/// Every successful connect opens a fresh socket; the previous one is closed.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connects_tx: Arc<watch::Sender<usize>>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let state = Arc::new(Mutex::new(MockState {
            failures: VecDeque::new(),
            socket: None,
            connects: 0,
        }));
        let (connects_tx, connects_rx) = watch::channel(0);
        (
            Self {
                state: state.clone(),
                connects_tx: Arc::new(connects_tx),
            },
            MockServer { state, connects_rx },
        )
    }
}

impl PushTransport for MockTransport {
    type Reader = MockReader;

    fn connect(&self, _url: String) -> PushConnectFuture<Self::Reader> {
        let state = self.state.clone();
        let connects_tx = self.connects_tx.clone();
        Box::pin(async move {
            let (result, connects) = {
                let mut state = state.lock();
                state.connects += 1;
                let result = match state.failures.pop_front() {
                    Some(reason) => Err(RefreshError::ConnectionFailed(reason)),
                    None => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        state.socket = Some(tx);
                        Ok(MockReader { rx })
                    }
                };
                (result, state.connects)
            };
            connects_tx.send_replace(connects);
            result
        })
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// No socket is open (never connected, or dropped).
    NotConnected,
    /// The reader side is gone.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::NotConnected => f.write_str("mock socket is not connected"),
            MockServerError::ChannelClosed => f.write_str("mock reader channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    connects_rx: watch::Receiver<usize>,
}

impl MockServer {
    /// Make the next `count` handshakes fail with `reason`.
    pub fn fail_next_connects(&self, count: usize, reason: &str) {
        let mut state = self.state.lock();
        state
            .failures
            .extend(std::iter::repeat_n(reason.to_string(), count));
    }

    /// Number of handshakes attempted so far.
    pub fn connects(&self) -> usize {
        *self.connects_rx.borrow()
    }

    /// Wait until at least `count` handshakes were attempted.
    pub async fn wait_for_connects(&mut self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.connects_rx.wait_for(|n| *n >= count))
            .await
            .is_ok_and(|res| res.is_ok())
    }

    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .socket
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Push a frame to the open socket.
    pub fn send_frame(&self, frame: PushFrame) -> Result<(), MockServerError> {
        self.send(Ok(frame))
    }

    /// Push a UTF-8 payload as a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_frame(PushFrame::text(text))
    }

    /// Push a message in its JSON wire form.
    pub fn send_message(&self, message: &InboundMessage) -> Result<(), MockServerError> {
        self.send_text(encode_message(message))
    }

    /// Surface a read error on the open socket.
    pub fn send_read_error(&self, error: &str) -> Result<(), MockServerError> {
        self.send(Err(RefreshError::TransportError {
            context: "mock_read",
            error: error.to_string(),
        }))
    }

    /// Simulate a server-side socket drop by closing the frame channel.
    pub fn drop_socket(&self) {
        self.state.lock().socket = None;
    }

    fn send(&self, item: RefreshResult<PushFrame>) -> Result<(), MockServerError> {
        let state = self.state.lock();
        let Some(tx) = state.socket.as_ref() else {
            return Err(MockServerError::NotConnected);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<RefreshResult<PushFrame>>,
}

impl futures_util::Stream for MockReader {
    type Item = RefreshResult<PushFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Reconnect strategy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        false
    }
}

/// Reconnect strategy that always waits the same delay.
#[derive(Clone, Copy, Debug)]
pub struct FixedReconnect {
    pub delay: Duration,
}

impl ReconnectStrategy for FixedReconnect {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        true
    }
}

/// Opens the gate of a [`RecordingAction::gated`] action.
#[derive(Debug)]
pub struct ActionGate {
    tx: watch::Sender<bool>,
}

impl ActionGate {
    /// Release every waiting and future invocation.
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

/// Scriptable widget refresh action that counts its invocations.
///
/// Clones share counters, so a clone can be handed to the dispatcher while the test keeps one
/// for assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingAction {
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
    failure: Option<String>,
    panics: bool,
    gate: Option<watch::Receiver<bool>>,
}

impl RecordingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Invocations block until the returned gate is opened.
    pub fn gated(mut self) -> (Self, ActionGate) {
        let (tx, rx) = watch::channel(false);
        self.gate = Some(rx);
        (self, ActionGate { tx })
    }

    /// Number of invocations started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.calls() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn action(&self) -> RefreshAction {
        let this = self.clone();
        RefreshAction::new(move || {
            let this = this.clone();
            async move { this.run().await }
        })
    }

    async fn run(self) -> Result<(), ActionError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(mut gate) = self.gate.clone() {
            let _ = gate.wait_for(|open| *open).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panics {
            panic!("refresh action panicked");
        }
        match &self.failure {
            Some(reason) => Err(reason.clone().into()),
            None => Ok(()),
        }
    }
}
