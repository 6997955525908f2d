//! Push connection actor.
//!
//! The socket read loop runs outside kameo; the actor owns the connection state machine and
//! policies and receives frames and lifecycle callbacks as messages. Every callback carries the
//! epoch of the attempt that produced it so late results from an abandoned attempt are dropped.

use std::time::{Duration, SystemTime};

use futures_util::StreamExt;
use kameo::error::ActorStopReason;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::core::{
    ConnectionEpoch, ConnectionSnapshot, ConnectionState, DEFAULT_HISTORY_CAPACITY, DecodeAction,
    DisconnectCause, FrameDecoder, InboundMessage, JsonDecoder, PushFrame, ReconnectStrategy,
    RefreshError, RefreshResult,
};
use crate::dispatch::Dispatcher;
use crate::observe::ConnectionWatch;
use crate::transport::PushTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Arguments passed when constructing a push connection actor.
pub struct PushConnectionArgs<R, T = TungsteniteTransport, D = JsonDecoder>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    pub url: String,
    pub transport: T,
    pub reconnect_strategy: R,
    pub decoder: D,
    /// Receives every delivered message.
    pub dispatcher: Dispatcher,
    pub history_capacity: usize,
}

impl<R: ReconnectStrategy> PushConnectionArgs<R> {
    /// Websocket transport, JSON frames and the default history capacity.
    pub fn new(url: impl Into<String>, reconnect_strategy: R, dispatcher: Dispatcher) -> Self {
        Self {
            url: url.into(),
            transport: TungsteniteTransport::default(),
            reconnect_strategy,
            decoder: JsonDecoder,
            dispatcher,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl<R, T, D> PushConnectionArgs<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    pub fn with_transport<T2: PushTransport>(self, transport: T2) -> PushConnectionArgs<R, T2, D> {
        PushConnectionArgs {
            url: self.url,
            transport,
            reconnect_strategy: self.reconnect_strategy,
            decoder: self.decoder,
            dispatcher: self.dispatcher,
            history_capacity: self.history_capacity,
        }
    }

    pub fn with_decoder<D2: FrameDecoder>(self, decoder: D2) -> PushConnectionArgs<R, T, D2> {
        PushConnectionArgs {
            url: self.url,
            transport: self.transport,
            reconnect_strategy: self.reconnect_strategy,
            decoder,
            dispatcher: self.dispatcher,
            history_capacity: self.history_capacity,
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// Lifecycle and inbound events handled by [`PushConnectionActor`].
///
/// Hosts send `Connect` and `Shutdown`; the remaining variants are posted by the actor's own
/// timers and reader task.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connect,
    Shutdown,
    Reconnect {
        epoch: ConnectionEpoch,
    },
    Disconnect {
        epoch: ConnectionEpoch,
        cause: DisconnectCause,
    },
    Inbound {
        epoch: ConnectionEpoch,
        message: InboundMessage,
    },
    Rejected {
        epoch: ConnectionEpoch,
        reason: String,
    },
}

pub(crate) struct ConnectionEstablished<T: PushTransport> {
    epoch: ConnectionEpoch,
    reader: T::Reader,
}

pub(crate) struct ConnectionFailed {
    epoch: ConnectionEpoch,
    error: String,
}

/// Ask for a copy of the current connection state.
#[derive(Debug, Clone, Copy)]
pub struct GetConnectionSnapshot;

/// Ask for a [`ConnectionWatch`] that follows every state transition.
#[derive(Debug, Clone, Copy)]
pub struct WatchConnection;

/// Owns the single push connection of a dashboard session.
pub struct PushConnectionActor<R, T = TungsteniteTransport, D = JsonDecoder>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    url: String,
    transport: T,
    decoder: D,
    state: ConnectionState<R>,
    dispatcher: Dispatcher,
    actor_ref: ActorRef<Self>,
    reader_task: Option<JoinHandle<()>>,
    reader_shutdown: Option<watch::Sender<bool>>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
}

impl<R, T, D> Actor for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Args = PushConnectionArgs<R, T, D>;
    type Error = RefreshError;

    fn name() -> &'static str {
        "PushConnectionActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> RefreshResult<Self> {
        let PushConnectionArgs {
            url,
            transport,
            reconnect_strategy,
            decoder,
            dispatcher,
            history_capacity,
        } = args;

        if url.trim().is_empty() {
            return Err(RefreshError::InvalidConfig(
                "push connection url must not be empty".to_string(),
            ));
        }

        let state = ConnectionState::new(reconnect_strategy, history_capacity);
        let (snapshot_tx, _) = watch::channel(state.snapshot());

        Ok(Self {
            url,
            transport,
            decoder,
            state,
            dispatcher,
            actor_ref,
            reader_task: None,
            reader_shutdown: None,
            snapshot_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> RefreshResult<()> {
        if let Some(reader) = self.stop_reader() {
            reader.abort();
        }
        self.state.shutdown();
        self.publish();
        Ok(())
    }
}

impl<R, T, D> KameoMessage<PushEvent> for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Reply = RefreshResult<()>;

    async fn handle(
        &mut self,
        event: PushEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            PushEvent::Connect => self.handle_connect(),
            PushEvent::Shutdown => self.handle_shutdown(),
            PushEvent::Reconnect { epoch } => self.handle_reconnect(epoch),
            PushEvent::Disconnect { epoch, cause } => self.handle_failure(epoch, cause),
            PushEvent::Inbound { epoch, message } => self.process_inbound(epoch, message),
            PushEvent::Rejected { epoch, reason } => {
                if epoch == self.state.epoch() {
                    warn!(url = %self.url, reason = %reason, "unparseable push frame");
                    self.state.on_rejected_frame(epoch);
                    self.publish();
                }
            }
        }
        Ok(())
    }
}

impl<R, T, D> KameoMessage<ConnectionEstablished<T>> for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Reply = RefreshResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.state.on_open(msg.epoch, SystemTime::now()) {
            debug!(url = %self.url, epoch = msg.epoch, "discarding stale push connection");
            return Ok(());
        }
        info!(url = %self.url, "push connection established");
        self.publish();
        self.start_reader(msg.epoch, msg.reader);
        Ok(())
    }
}

impl<R, T, D> KameoMessage<ConnectionFailed> for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Reply = RefreshResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_failure(
            msg.epoch,
            DisconnectCause::HandshakeFailed { message: msg.error },
        );
        Ok(())
    }
}

impl<R, T, D> KameoMessage<GetConnectionSnapshot> for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Reply = RefreshResult<ConnectionSnapshot>;

    async fn handle(
        &mut self,
        _msg: GetConnectionSnapshot,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state.snapshot())
    }
}

impl<R, T, D> KameoMessage<WatchConnection> for PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    type Reply = RefreshResult<ConnectionWatch>;

    async fn handle(
        &mut self,
        _msg: WatchConnection,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(ConnectionWatch::new(self.snapshot_tx.subscribe()))
    }
}

impl<R, T, D> PushConnectionActor<R, T, D>
where
    R: ReconnectStrategy,
    T: PushTransport,
    D: FrameDecoder,
{
    fn publish(&self) {
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    /// Signal the reader to exit and hand back its task.
    ///
    /// The reader may be parked on a full mailbox, so it is not awaited here; it exits once it
    /// observes the signal, and anything it still delivers carries a stale epoch.
    fn stop_reader(&mut self) -> Option<JoinHandle<()>> {
        if let Some(shutdown) = self.reader_shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.reader_task.take()
    }

    fn handle_connect(&mut self) {
        let Some(epoch) = self.state.start() else {
            debug!(url = %self.url, status = %self.state.status(), "connect ignored");
            return;
        };
        self.publish();
        self.spawn_handshake(epoch);
    }

    fn handle_reconnect(&mut self, epoch: ConnectionEpoch) {
        let Some(epoch) = self.state.retry(epoch) else {
            debug!(url = %self.url, epoch, "stale reconnect timer ignored");
            return;
        };
        self.publish();
        self.spawn_handshake(epoch);
    }

    fn handle_shutdown(&mut self) {
        self.stop_reader();
        self.state.shutdown();
        self.publish();
        info!(url = %self.url, "push connection shut down");
    }

    fn spawn_handshake(&self, epoch: ConnectionEpoch) {
        let actor_ref = self.actor_ref.clone();
        let url = self.url.clone();
        let transport = self.transport.clone();

        tokio::spawn(async move {
            match transport.connect(url).await {
                Ok(reader) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> { epoch, reader })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed {
                            epoch,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        });
    }

    fn handle_failure(&mut self, epoch: ConnectionEpoch, cause: DisconnectCause) {
        if epoch != self.state.epoch() {
            debug!(url = %self.url, epoch, cause = %cause, "stale connection event ignored");
            return;
        }
        self.stop_reader();

        let reason = cause.to_string();
        match self.state.on_failure(epoch, reason.clone()) {
            Some(delay) => {
                self.log_reconnect_plan(&reason, Some(delay));
                self.publish();
                self.schedule_reconnect(epoch, delay);
            }
            None if self.state.status().is_error() => {
                self.log_reconnect_plan(&reason, None);
                self.publish();
            }
            None => {
                debug!(url = %self.url, cause = %cause, "failure ignored in current state");
            }
        }
    }

    fn schedule_reconnect(&self, epoch: ConnectionEpoch, delay: Duration) {
        let actor_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref.tell(PushEvent::Reconnect { epoch }).send().await;
        });
    }

    fn process_inbound(&mut self, epoch: ConnectionEpoch, message: InboundMessage) {
        if !self
            .state
            .on_message(epoch, message.clone(), SystemTime::now())
        {
            debug!(url = %self.url, kind = message.kind(), "push message dropped: not connected");
            return;
        }
        debug!(url = %self.url, kind = message.kind(), "push message received");
        self.publish();
        // Detached: dispatch settles on its own and never reports back to the connection.
        drop(self.dispatcher.dispatch_detached(&message));
    }

    fn start_reader(&mut self, epoch: ConnectionEpoch, mut reader: T::Reader) {
        self.stop_reader();
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        self.reader_shutdown = Some(shutdown_tx);

        let actor_ref = self.actor_ref.clone();
        let url = self.url.clone();
        let mut decoder = self.decoder.clone();

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow_and_update() { break; }
                    }
                    frame = reader.next() => {
                        let event = match frame {
                            Some(Ok(PushFrame::Close(close))) => {
                                info!(url = %url, close = ?close, "received push close frame");
                                let reason = close
                                    .map(|frame| frame.describe())
                                    .unwrap_or_else(|| "remote closed".to_string());
                                PushEvent::Disconnect {
                                    epoch,
                                    cause: DisconnectCause::RemoteClosed { reason },
                                }
                            }
                            Some(Ok(frame)) => match decoder.decode(&frame) {
                                DecodeAction::Ignore => continue,
                                DecodeAction::Deliver(message) => PushEvent::Inbound { epoch, message },
                                DecodeAction::Reject(reason) => PushEvent::Rejected { epoch, reason },
                            },
                            Some(Err(err)) => PushEvent::Disconnect {
                                epoch,
                                cause: DisconnectCause::ReadFailure { error: err.to_string() },
                            },
                            None => PushEvent::Disconnect {
                                epoch,
                                cause: DisconnectCause::RemoteClosed {
                                    reason: "stream ended".to_string(),
                                },
                            },
                        };
                        let terminal = matches!(event, PushEvent::Disconnect { .. });
                        if actor_ref.tell(event).send().await.is_err() || terminal {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// `delay` is `None` when the strategy declined to retry.
    fn log_reconnect_plan(&self, reason: &str, delay: Option<Duration>) {
        let attempt = self.state.reconnect_attempts();
        let Some(delay) = delay else {
            warn!(
                url = %self.url,
                reason = %reason,
                attempt,
                "push connection gave up reconnecting"
            );
            return;
        };
        let stats = self.state.stats();
        warn!(
            url = %self.url,
            reason = %reason,
            attempt,
            delay_ms = delay.as_millis().min(u64::MAX as u128) as u64,
            messages = stats.messages_delivered,
            rejected = stats.frames_rejected,
            "push reconnect plan"
        );
    }
}
