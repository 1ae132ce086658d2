//! Wire protocol between relay clients and the relay server.
//!
//! Messages are JSON text frames:
//! ```json
//! { "type": "subscribe", "path": "rooms/abc/strokes" }
//! { "type": "patch", "path": "rooms/abc/strokes", "id": "...", "patch": { "points": [] } }
//! { "type": "child_added", "path": "rooms/abc/strokes", "id": "...", "record": { } }
//! ```

use crate::store::ChildEvent;
use crate::stroke::{StrokeId, StrokePatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving child events for a collection
    Subscribe { path: String },
    /// Stop receiving child events for a collection
    Unsubscribe { path: String },
    /// Replace a child record
    Write { path: String, id: StrokeId, record: Value },
    /// Merge fields into a child record
    Patch { path: String, id: StrokeId, patch: StrokePatch },
    /// Remove a child
    Delete { path: String, id: StrokeId },
    /// Remove every child of a collection
    DeleteAll { path: String },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ChildAdded { path: String, id: StrokeId, record: Value },
    ChildChanged { path: String, id: StrokeId, record: Value },
    ChildRemoved { path: String, id: StrokeId },
    /// Error message
    Error { message: String },
}

impl ServerMessage {
    /// Split a child notification into its collection path and event.
    pub fn into_child_event(self) -> Option<(String, ChildEvent)> {
        match self {
            ServerMessage::ChildAdded { path, id, record } => Some((path, ChildEvent::added(id, record))),
            ServerMessage::ChildChanged { path, id, record } => {
                Some((path, ChildEvent::changed(id, record)))
            }
            ServerMessage::ChildRemoved { path, id } => Some((path, ChildEvent::removed(id))),
            ServerMessage::Error { .. } => None,
        }
    }
}
