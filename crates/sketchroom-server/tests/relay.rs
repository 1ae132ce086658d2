use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use sketchroom_core::store::{ChildEventKind, RelayStore, StrokeStore, strokes_path};
use sketchroom_core::stroke::{Brush, Stroke, StrokePatch};
use sketchroom_server::{AppState, app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PATH: &str = "rooms/it/strokes";

async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(Arc::new(AppState::new()))).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, msg: Value) {
    ws.send(Message::text(msg.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_write_is_echoed_to_writer_and_peers() {
    let addr = start_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, json!({"type": "subscribe", "path": PATH})).await;
    send(&mut bob, json!({"type": "subscribe", "path": PATH})).await;
    // Messages are handled in order per connection, so the error reply
    // means bob's subscription is live.
    send(&mut bob, json!({"type": "bogus"})).await;
    assert_eq!(recv(&mut bob).await["type"], "error");

    send(
        &mut alice,
        json!({"type": "write", "path": PATH, "id": "s1", "record": {"color": "#000", "points": []}}),
    )
    .await;

    for ws in [&mut alice, &mut bob] {
        let event = recv(ws).await;
        assert_eq!(event["type"], "child_added");
        assert_eq!(event["id"], "s1");
        assert_eq!(event["path"], PATH);
    }

    send(
        &mut alice,
        json!({"type": "patch", "path": PATH, "id": "s1", "patch": {"points": [{"x": 1.0, "y": 2.0}], "completed": true}}),
    )
    .await;
    let event = recv(&mut bob).await;
    assert_eq!(event["type"], "child_changed");
    assert_eq!(event["record"]["completed"], true);
    assert_eq!(event["record"]["color"], "#000");
}

#[tokio::test]
async fn test_new_subscriber_receives_existing_children() {
    let addr = start_server().await;
    let mut writer = connect(addr).await;
    send(&mut writer, json!({"type": "subscribe", "path": PATH})).await;
    for id in ["a", "b"] {
        send(&mut writer, json!({"type": "write", "path": PATH, "id": id, "record": {"points": []}})).await;
        assert_eq!(recv(&mut writer).await["id"], id);
    }

    let mut late = connect(addr).await;
    send(&mut late, json!({"type": "subscribe", "path": PATH})).await;
    let first = recv(&mut late).await;
    let second = recv(&mut late).await;
    assert_eq!(first["type"], "child_added");
    assert_eq!(first["id"], "a");
    assert_eq!(second["id"], "b");
}

#[tokio::test]
async fn test_delete_all_notifies_subscribers() {
    let addr = start_server().await;
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"type": "subscribe", "path": PATH})).await;
    send(&mut ws, json!({"type": "write", "path": PATH, "id": "a", "record": {}})).await;
    assert_eq!(recv(&mut ws).await["type"], "child_added");

    send(&mut ws, json!({"type": "delete_all", "path": PATH})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "child_removed");
    assert_eq!(event["id"], "a");
}

#[tokio::test]
async fn test_unsubscribe_stops_events() {
    let addr = start_server().await;
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"type": "subscribe", "path": PATH})).await;
    send(&mut ws, json!({"type": "unsubscribe", "path": PATH})).await;
    send(&mut ws, json!({"type": "write", "path": PATH, "id": "a", "record": {}})).await;
    send(&mut ws, json!({"type": "write", "path": PATH, "id": "b", "record": 7})).await;

    // Only the rejection of the non-object record comes back.
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relay_store_round_trip() {
    let addr = start_server().await;
    let path = strokes_path("it");
    let store = RelayStore::connect(&format!("ws://{}/ws", addr)).unwrap();
    let mut sub = store.subscribe_child_events(&path).unwrap();

    let id = store.create_child(&path);
    let stroke = Stroke::begin("me", &Brush::default(), 1, kurbo::Point::new(3.0, 4.0));
    store.write(&path, &id, &stroke).unwrap();
    store
        .patch(&path, &id, &StrokePatch::finalize(vec![kurbo::Point::new(3.0, 4.0), kurbo::Point::new(9.0, 9.0)]))
        .unwrap();

    let mut events = Vec::new();
    for _ in 0..100 {
        events.extend(sub.poll_events());
        if events.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let kinds: Vec<ChildEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChildEventKind::Added, ChildEventKind::Changed]);
    let last = Stroke::from_record(events[1].record.as_ref().unwrap()).unwrap();
    assert!(last.completed);
    assert_eq!(last.points.len(), 2);
}
