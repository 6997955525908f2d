use std::net::SocketAddr;
use std::time::Duration;

use dashboard_refresh::core::{ConnectionSnapshot, ConnectionStatus, InboundMessage, encode_message};
use dashboard_refresh::dispatch::{Dispatcher, DispatcherConfig, TypeGroupTable};
use dashboard_refresh::observe::ConnectionWatch;
use dashboard_refresh::push::{PushConnectionActor, PushConnectionArgs, PushEvent, WatchConnection};
use dashboard_refresh::testing::{NoReconnect, RecordingAction};
use futures_util::SinkExt;
use kameo::Actor;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Single-connection push server; every message sent on the returned channel is forwarded to the
/// client. Dropping the sender closes the socket.
async fn push_server() -> (SocketAddr, mpsc::UnboundedSender<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(message) = rx.recv().await {
            if ws.send(message).await.is_err() {
                return;
            }
        }
        let _ = ws.close(None).await;
    });

    (addr, tx)
}

async fn wait_until<F>(watch: &mut ConnectionWatch, predicate: F) -> ConnectionSnapshot
where
    F: FnMut(&ConnectionSnapshot) -> bool,
{
    tokio::time::timeout(WAIT, watch.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection actor stopped")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_over_real_websocket_refreshes_widget() {
    let (addr, server) = push_server().await;

    let groups = TypeGroupTable::builder()
        .group("scale", ["weight-trend"])
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(DispatcherConfig::immediate(), groups);
    let weight = RecordingAction::new();
    let steps = RecordingAction::new();
    let _w = dispatcher.register("weight-trend", weight.action());
    let _s = dispatcher.register("steps", steps.action());

    let actor = PushConnectionActor::spawn(PushConnectionArgs::new(
        format!("ws://{addr}/push"),
        NoReconnect,
        dispatcher.clone(),
    ));
    let mut conn = actor.ask(WatchConnection).await.unwrap();

    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;

    server.send(Message::Ping(Default::default())).unwrap();
    server
        .send(Message::text(encode_message(&InboundMessage::new_data("scale"))))
        .unwrap();
    assert!(weight.wait_for_calls(1, WAIT).await);
    assert_eq!(steps.calls(), 0);

    server
        .send(Message::text(encode_message(&InboundMessage::RefreshAll)))
        .unwrap();
    assert!(weight.wait_for_calls(2, WAIT).await);
    assert!(steps.wait_for_calls(1, WAIT).await);

    let snapshot = wait_until(&mut conn, |s| s.stats.messages_delivered == 2).await;
    assert_eq!(snapshot.message_history.len(), 2);

    // Server goes away: no retry with this strategy, so the error sticks.
    drop(server);
    let snapshot = wait_until(&mut conn, |s| s.status.is_error()).await;
    assert_eq!(snapshot.reconnect_attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_handshake_reports_error_status() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let actor = PushConnectionActor::spawn(PushConnectionArgs::new(
        format!("ws://{addr}/push"),
        NoReconnect,
        Dispatcher::default(),
    ));
    let mut conn = actor.ask(WatchConnection).await.unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);

    actor.tell(PushEvent::Connect).send().await.unwrap();
    let snapshot = wait_until(&mut conn, |s| s.status.is_error()).await;
    assert!(
        snapshot
            .status
            .error_reason()
            .is_some_and(|reason| reason.starts_with("handshake failed"))
    );
    assert!(snapshot.last_connected_at.is_none());
}
