use std::time::Duration;

use dashboard_refresh::core::{
    BackoffReconnect, ConnectionSnapshot, ConnectionStatus, InboundMessage, PushFrame,
    ReconnectStrategy,
};
use dashboard_refresh::dispatch::{Dispatcher, DispatcherConfig, TypeGroupTable};
use dashboard_refresh::observe::{ConnectionWatch, StatusView};
use dashboard_refresh::push::{
    GetConnectionSnapshot, PushConnectionActor, PushConnectionArgs, PushEvent, WatchConnection,
};
use dashboard_refresh::testing::{FixedReconnect, MockTransport, NoReconnect, RecordingAction};
use kameo::Actor;
use kameo::prelude::ActorRef;

const WAIT: Duration = Duration::from_secs(2);

type MockActor<R> = PushConnectionActor<R, MockTransport>;

fn dispatcher() -> Dispatcher {
    let groups = TypeGroupTable::builder()
        .group("scale", ["weight-trend", "bmi-summary"])
        .build()
        .unwrap();
    Dispatcher::new(DispatcherConfig::immediate(), groups)
}

fn spawn_actor<R: ReconnectStrategy>(
    transport: MockTransport,
    reconnect: R,
    dispatcher: Dispatcher,
    history_capacity: usize,
) -> ActorRef<MockActor<R>> {
    PushConnectionActor::spawn(
        PushConnectionArgs::new("ws://mock/push", reconnect, dispatcher)
            .with_transport(transport)
            .with_history_capacity(history_capacity),
    )
}

async fn watch<R: ReconnectStrategy>(actor: &ActorRef<MockActor<R>>) -> ConnectionWatch {
    actor.ask(WatchConnection).await.unwrap()
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
async fn delivered_message_refreshes_group_members() {
    let (transport, server) = MockTransport::channel_pair();
    let dispatcher = dispatcher();
    let weight = RecordingAction::new();
    let bmi = RecordingAction::new();
    let _w = dispatcher.register("weight-trend", weight.action());
    let _b = dispatcher.register("bmi-summary", bmi.action());

    let actor = spawn_actor(transport, NoReconnect, dispatcher.clone(), 10);
    let mut conn = watch(&actor).await;
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);

    actor.tell(PushEvent::Connect).send().await.unwrap();
    let snapshot = wait_until(&mut conn, |s| s.status.is_connected()).await;
    assert!(snapshot.last_connected_at.is_some());
    assert_eq!(snapshot.reconnect_attempts, 0);

    server
        .send_message(&InboundMessage::new_data("scale"))
        .unwrap();
    assert!(weight.wait_for_calls(1, WAIT).await);
    assert!(bmi.wait_for_calls(1, WAIT).await);

    let snapshot = actor.ask(GetConnectionSnapshot).await.unwrap();
    assert_eq!(
        snapshot.last_message.map(|m| m.message),
        Some(InboundMessage::new_data("scale"))
    );
    assert_eq!(snapshot.message_history.len(), 1);
    assert_eq!(snapshot.stats.messages_delivered, 1);

    let status = StatusView::new(dispatcher).with_connection(conn).snapshot();
    assert!(status.status.is_connected());
    assert_eq!(status.registered, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_is_single_flight() {
    let (transport, mut server) = MockTransport::channel_pair();
    let actor = spawn_actor(transport, NoReconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    for _ in 0..20 {
        actor.tell(PushEvent::Connect).send().await.unwrap();
    }
    wait_until(&mut conn, |s| s.status.is_connected()).await;
    assert!(server.wait_for_connects(1, WAIT).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connects(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_failures_back_off_and_reset_on_success() {
    let (transport, mut server) = MockTransport::channel_pair();
    server.fail_next_connects(3, "connection refused");
    let reconnect = BackoffReconnect::new(Duration::from_millis(10), Duration::from_millis(40), 2.0);
    let actor = spawn_actor(transport, reconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    let snapshot = wait_until(&mut conn, |s| s.status.is_connected()).await;
    assert!(server.wait_for_connects(4, WAIT).await);
    assert_eq!(server.connects(), 4);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(snapshot.stats.total_reconnects, 3);
    assert!(snapshot.next_retry_delay.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gave_up_strategy_stays_in_error() {
    let (transport, server) = MockTransport::channel_pair();
    server.fail_next_connects(1, "dns failure");
    let actor = spawn_actor(transport, NoReconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    let snapshot = wait_until(&mut conn, |s| s.status.is_error()).await;
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert!(snapshot.next_retry_delay.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connects(), 1);

    // A manual connect still works from Error.
    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;
    assert_eq!(server.connects(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_drop_reconnects() {
    let (transport, mut server) = MockTransport::channel_pair();
    let reconnect = FixedReconnect {
        delay: Duration::from_millis(10),
    };
    let actor = spawn_actor(transport, reconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;

    server.drop_socket();
    assert!(server.wait_for_connects(2, WAIT).await);
    let snapshot = wait_until(&mut conn, |s| s.status.is_connected()).await;
    assert_eq!(snapshot.stats.total_reconnects, 1);
    assert_eq!(snapshot.reconnect_attempts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_frame_surfaces_as_error_reason() {
    let (transport, server) = MockTransport::channel_pair();
    let actor = spawn_actor(transport, NoReconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;

    server
        .send_frame(PushFrame::close(1001, "server restarting"))
        .unwrap();
    let snapshot = wait_until(&mut conn, |s| s.status.is_error()).await;
    assert_eq!(
        snapshot.status.error_reason(),
        Some("remote closed: code=1001 reason=server restarting")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_terminal() {
    let (transport, server) = MockTransport::channel_pair();
    let reconnect = FixedReconnect {
        delay: Duration::from_millis(200),
    };
    let actor = spawn_actor(transport, reconnect, dispatcher(), 10);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;

    // Drop the socket so a reconnect gets scheduled, then shut down before it fires.
    server.drop_socket();
    wait_until(&mut conn, |s| s.status.is_error()).await;
    actor.tell(PushEvent::Shutdown).send().await.unwrap();
    wait_until(&mut conn, |s| s.status == ConnectionStatus::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(server.connects(), 1);
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_are_not_delivered_while_disconnected() {
    let (transport, _server) = MockTransport::channel_pair();
    let dispatcher = dispatcher();
    let weight = RecordingAction::new();
    let _w = dispatcher.register("weight-trend", weight.action());
    let actor = spawn_actor(transport, NoReconnect, dispatcher, 10);

    actor
        .tell(PushEvent::Inbound {
            epoch: 0,
            message: InboundMessage::RefreshAll,
        })
        .send()
        .await
        .unwrap();

    let snapshot = actor.ask(GetConnectionSnapshot).await.unwrap();
    assert!(snapshot.last_message.is_none());
    assert!(snapshot.message_history.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(weight.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_is_bounded_and_bad_frames_are_counted() {
    let (transport, server) = MockTransport::channel_pair();
    let actor = spawn_actor(transport, NoReconnect, dispatcher(), 3);
    let mut conn = watch(&actor).await;

    actor.tell(PushEvent::Connect).send().await.unwrap();
    wait_until(&mut conn, |s| s.status.is_connected()).await;

    server.send_frame(PushFrame::Ping(Default::default())).unwrap();
    server.send_text("{\"type\":\"firmware_update\"}").unwrap();
    for token in ["scale", "sleep", "activity", "blood_pressure", "heart_rate"] {
        server.send_message(&InboundMessage::new_data(token)).unwrap();
    }

    let snapshot = wait_until(&mut conn, |s| s.stats.messages_delivered == 5).await;
    assert_eq!(snapshot.stats.frames_rejected, 1);
    let history: Vec<_> = snapshot
        .message_history
        .into_iter()
        .map(|m| m.message)
        .collect();
    assert_eq!(
        history,
        vec![
            InboundMessage::new_data("activity"),
            InboundMessage::new_data("blood_pressure"),
            InboundMessage::new_data("heart_rate"),
        ]
    );
    assert!(snapshot.status.is_connected());
}
