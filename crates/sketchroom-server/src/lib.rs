//! SketchRoom WebSocket Relay
//!
//! Hosts stroke collections in memory and relays child events between the
//! clients subscribed to them. Every accepted write is broadcast to all
//! subscribers of its collection, the writer included, and a new subscriber
//! first receives `child_added` for every existing child.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "subscribe", "path": "rooms/abc/strokes" }
//! { "type": "write", "path": "rooms/abc/strokes", "id": "...", "record": { "points": [] } }
//! { "type": "child_changed", "path": "rooms/abc/strokes", "id": "...", "record": { } }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use sketchroom_core::protocol::{ClientMessage, ServerMessage};
use sketchroom_core::stroke::{StrokeId, StrokePatch};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server configuration
pub const CHANNEL_CAPACITY: usize = 256;
/// Bind address used when `SKETCHROOM_ADDR` is unset.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// One stroke collection
struct Collection {
    /// Broadcast channel for child events
    tx: broadcast::Sender<ServerMessage>,
    /// Current children in id order
    children: BTreeMap<StrokeId, Value>,
}

impl Collection {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            children: BTreeMap::new(),
        }
    }

    fn snapshot(&self, path: &str) -> Vec<ServerMessage> {
        self.children
            .iter()
            .map(|(id, record)| ServerMessage::ChildAdded {
                path: path.to_string(),
                id: id.clone(),
                record: record.clone(),
            })
            .collect()
    }

    fn emit(&self, msg: ServerMessage) {
        // No receivers is fine; the record is kept for later subscribers.
        let _ = self.tx.send(msg);
    }

    fn upserted(&self, path: &str, id: &StrokeId, existed: bool) {
        let Some(record) = self.children.get(id).cloned() else {
            return;
        };
        let (path, id) = (path.to_string(), id.clone());
        self.emit(if existed {
            ServerMessage::ChildChanged { path, id, record }
        } else {
            ServerMessage::ChildAdded { path, id, record }
        });
    }
}

/// Shared application state
#[derive(Default)]
pub struct AppState {
    /// Active collections by path
    collections: DashMap<String, Collection>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a collection and subscribe to its changes atomically, so no
    /// event falls between the two.
    pub fn subscribe(&self, path: &str) -> (Vec<ServerMessage>, broadcast::Receiver<ServerMessage>) {
        let collection = self.collections.entry(path.to_string()).or_insert_with(Collection::new);
        (collection.snapshot(path), collection.tx.subscribe())
    }

    /// Current children of a collection as `child_added` messages.
    pub fn snapshot(&self, path: &str) -> Vec<ServerMessage> {
        self.collections
            .get(path)
            .map(|collection| collection.snapshot(path))
            .unwrap_or_default()
    }

    pub fn child_count(&self, path: &str) -> usize {
        self.collections.get(path).map_or(0, |c| c.children.len())
    }

    /// Replace a child record.
    pub fn write(&self, path: &str, id: StrokeId, record: Value) -> Result<(), String> {
        if !record.is_object() {
            return Err(format!("record for {} must be an object", id));
        }
        let mut collection = self.collections.entry(path.to_string()).or_insert_with(Collection::new);
        let existed = collection.children.insert(id.clone(), record).is_some();
        collection.upserted(path, &id, existed);
        Ok(())
    }

    /// Merge a patch into a child record, creating it if absent.
    pub fn patch(&self, path: &str, id: StrokeId, patch: &StrokePatch) -> Result<(), String> {
        let mut collection = self.collections.entry(path.to_string()).or_insert_with(Collection::new);
        let existed = collection.children.contains_key(&id);
        let record = collection.children.entry(id.clone()).or_insert(Value::Null);
        if let Err(e) = patch.merge_into(record) {
            if !existed {
                collection.children.remove(&id);
            }
            return Err(e.to_string());
        }
        collection.upserted(path, &id, existed);
        Ok(())
    }

    pub fn delete(&self, path: &str, id: &StrokeId) {
        if let Some(mut collection) = self.collections.get_mut(path) {
            if collection.children.remove(id).is_some() {
                collection.emit(ServerMessage::ChildRemoved {
                    path: path.to_string(),
                    id: id.clone(),
                });
            }
        }
    }

    pub fn delete_all(&self, path: &str) {
        if let Some(mut collection) = self.collections.get_mut(path) {
            let removed = std::mem::take(&mut collection.children);
            for id in removed.into_keys() {
                collection.emit(ServerMessage::ChildRemoved {
                    path: path.to_string(),
                    id,
                });
            }
        }
    }

    /// Drop a collection nobody watches and nothing is stored in.
    fn prune(&self, path: &str) {
        self.collections
            .remove_if(path, |_, c| c.children.is_empty() && c.tx.receiver_count() == 0);
    }

    /// Apply one client message. Returns a reply for the sender, if any.
    pub fn apply(&self, msg: ClientMessage) -> Option<ServerMessage> {
        let result = match msg {
            ClientMessage::Write { path, id, record } => self.write(&path, id, record),
            ClientMessage::Patch { path, id, patch } => self.patch(&path, id, &patch),
            ClientMessage::Delete { path, id } => {
                self.delete(&path, &id);
                Ok(())
            }
            ClientMessage::DeleteAll { path } => {
                self.delete_all(&path);
                Ok(())
            }
            ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => Ok(()),
        };
        result.err().map(|message| ServerMessage::Error { message })
    }
}

/// Build the relay router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "SketchRoom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward one collection's broadcast into a connection's outbox.
///
/// The outbox is bounded, so a client that stops reading stalls this task,
/// the broadcast receiver falls behind and the lag path replays the
/// collection once the client drains again.
fn spawn_forwarder(
    state: Arc<AppState>,
    path: String,
    mut rx: broadcast::Receiver<ServerMessage>,
    outbox: mpsc::Sender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if outbox.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Replaying the collection is idempotent for clients.
                    warn!("Subscriber of {} lagged by {} events, resending snapshot", path, skipped);
                    for msg in state.snapshot(&path) {
                        if outbox.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Encode and send one message. Returns false once the socket is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            true
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    'conn: loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let replies = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { path }) => {
                                if subscriptions.contains_key(&path) {
                                    state.snapshot(&path)
                                } else {
                                    let (snapshot, rx) = state.subscribe(&path);
                                    let task = spawn_forwarder(state.clone(), path.clone(), rx, outbox.clone());
                                    subscriptions.insert(path.clone(), task);
                                    debug!("{} subscribed to {}", conn_id, path);
                                    snapshot
                                }
                            }
                            Ok(ClientMessage::Unsubscribe { path }) => {
                                if let Some(task) = subscriptions.remove(&path) {
                                    task.abort();
                                    state.prune(&path);
                                    debug!("{} unsubscribed from {}", conn_id, path);
                                }
                                Vec::new()
                            }
                            Ok(client_msg) => state.apply(client_msg).into_iter().collect(),
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn_id, e);
                                vec![ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                }]
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => vec![ServerMessage::Error {
                        message: "Binary frames are not supported".to_string(),
                    }],
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => Vec::new(), // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                };
                // Replies go straight to the socket; the forwarders only
                // queue events that were broadcast after the snapshot.
                for reply in &replies {
                    if !send_message(&mut sender, reply).await {
                        break 'conn;
                    }
                }
            }

            // Deliver queued events to the client
            Some(server_msg) = inbox.recv() => {
                if !send_message(&mut sender, &server_msg).await {
                    break;
                }
            }
        }
    }

    // Cleanup on disconnect
    for (path, task) in subscriptions {
        task.abort();
        state.prune(&path);
    }
    info!("Connection closed: {}", conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use serde_json::json;
    use std::time::Duration;

    const PATH: &str = "rooms/r/strokes";

    #[test]
    fn test_subscribe_replays_existing_children() {
        let state = AppState::new();
        state.write(PATH, StrokeId::from("a"), json!({"points": []})).unwrap();
        state.write(PATH, StrokeId::from("b"), json!({"points": []})).unwrap();

        let (snapshot, _rx) = state.subscribe(PATH);
        let ids: Vec<_> = snapshot
            .iter()
            .map(|msg| match msg {
                ServerMessage::ChildAdded { id, .. } => id.as_str().to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_write_then_rewrite_emits_added_then_changed() {
        let state = AppState::new();
        let (_, mut rx) = state.subscribe(PATH);

        state.write(PATH, StrokeId::from("a"), json!({"size": 4})).unwrap();
        state.write(PATH, StrokeId::from("a"), json!({"size": 8})).unwrap();

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::ChildAdded { .. })));
        match rx.try_recv() {
            Ok(ServerMessage::ChildChanged { record, .. }) => assert_eq!(record["size"], 8),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_patch_merges_points() {
        let state = AppState::new();
        state
            .write(PATH, StrokeId::from("a"), json!({"color": "#000", "points": [], "completed": false}))
            .unwrap();
        state
            .patch(PATH, StrokeId::from("a"), &StrokePatch::finalize(vec![Point::new(1.0, 2.0)]))
            .unwrap();

        match &state.snapshot(PATH)[0] {
            ServerMessage::ChildAdded { record, .. } => {
                assert_eq!(record["color"], "#000");
                assert_eq!(record["completed"], true);
                assert_eq!(record["points"].as_array().map(Vec::len), Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_object_write_is_rejected() {
        let state = AppState::new();
        let reply = state.apply(ClientMessage::Write {
            path: PATH.to_string(),
            id: StrokeId::from("a"),
            record: json!(42),
        });
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
        assert_eq!(state.child_count(PATH), 0);
    }

    #[test]
    fn test_delete_all_removes_every_child() {
        let state = AppState::new();
        state.write(PATH, StrokeId::from("a"), json!({})).unwrap();
        state.write(PATH, StrokeId::from("b"), json!({})).unwrap();
        let (_, mut rx) = state.subscribe(PATH);

        state.delete_all(PATH);
        assert_eq!(state.child_count(PATH), 0);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::ChildRemoved { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::ChildRemoved { .. })));
    }

    #[test]
    fn test_delete_of_missing_child_is_silent() {
        let state = AppState::new();
        let (_, mut rx) = state.subscribe(PATH);
        state.delete(PATH, &StrokeId::from("nope"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stalled_subscriber_queue_is_bounded() {
        let state = Arc::new(AppState::new());
        let (_, rx) = state.subscribe(PATH);
        let (outbox, mut inbox) = mpsc::channel(CHANNEL_CAPACITY);
        let queue = outbox.clone();
        let _task = spawn_forwarder(state.clone(), PATH.to_string(), rx, outbox);

        for i in 0..5000 {
            let id = format!("s{:04}", i);
            state.write(PATH, StrokeId::from(id.as_str()), json!({})).unwrap();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Nothing is received yet: the outbox holds at most its capacity.
        assert_eq!(queue.capacity(), 0);

        // Once the client reads again, the lag path brings it up to date.
        let mut ids = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(200), inbox.recv()).await {
            if let ServerMessage::ChildAdded { id, .. } = msg {
                ids.push(id.as_str().to_string());
            }
        }
        assert!(ids.iter().any(|id| id == "s4999"));
        assert!(ids.iter().any(|id| id == "s0000"));
    }

    #[test]
    fn test_prune_keeps_stored_children() {
        let state = AppState::new();
        state.write(PATH, StrokeId::from("a"), json!({})).unwrap();
        state.prune(PATH);
        assert_eq!(state.child_count(PATH), 1);

        let (_, rx) = state.subscribe("rooms/empty/strokes");
        drop(rx);
        state.prune("rooms/empty/strokes");
        assert!(state.collections.get("rooms/empty/strokes").is_none());
    }
}
