//! Remote shared-state store abstraction.
//!
//! The store is a keyed, ordered, eventually-consistent collection of stroke
//! records per room with child-level add/change/remove notifications.

mod memory;
mod relay;

pub use memory::MemoryStore;
pub use relay::{ConnectionState, RelayStore};

use crate::stroke::{Stroke, StrokeId, StrokePatch};
use serde_json::Value;
use std::fmt;
use std::sync::mpsc::Receiver;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is disconnected")]
    Disconnected,
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store error: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Path of the stroke collection for a room.
pub fn strokes_path(room_id: &str) -> String {
    format!("rooms/{room_id}/strokes")
}

/// Kind of child mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Changed,
    Removed,
}

/// Notification that a child under a watched path was added, changed or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    pub id: StrokeId,
    /// Raw record, absent for removals.
    pub record: Option<Value>,
}

impl ChildEvent {
    pub fn added(id: StrokeId, record: Value) -> Self {
        Self {
            kind: ChildEventKind::Added,
            id,
            record: Some(record),
        }
    }

    pub fn changed(id: StrokeId, record: Value) -> Self {
        Self {
            kind: ChildEventKind::Changed,
            id,
            record: Some(record),
        }
    }

    pub fn removed(id: StrokeId) -> Self {
        Self {
            kind: ChildEventKind::Removed,
            id,
            record: None,
        }
    }
}

/// Live registration for child events under one path.
///
/// Events are buffered until drained with [`Subscription::poll_events`].
/// Dropping the handle unregisters the listener.
pub struct Subscription {
    path: String,
    events: Receiver<ChildEvent>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        path: impl Into<String>,
        events: Receiver<ChildEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Watched collection path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Drain pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<ChildEvent> {
        self.events.try_iter().collect()
    }

    /// Stop receiving events. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Contract the sync protocol needs from the shared store.
///
/// Writes are best-effort: implementations may queue them and report only
/// failures they can detect synchronously. Callers log failures and never
/// roll back local state.
pub trait StrokeStore: Send + Sync {
    /// Allocate a fresh, ordered child key under `path`.
    fn create_child(&self, path: &str) -> StrokeId;

    /// Write a full record.
    fn write(&self, path: &str, id: &StrokeId, record: &Stroke) -> StoreResult<()>;

    /// Merge a partial record.
    fn patch(&self, path: &str, id: &StrokeId, patch: &StrokePatch) -> StoreResult<()>;

    /// Delete one child.
    fn delete(&self, path: &str, id: &StrokeId) -> StoreResult<()>;

    /// Delete every child under `path`.
    fn delete_all(&self, path: &str) -> StoreResult<()>;

    /// Watch child events under `path`. Existing children are reported as
    /// `Added` first.
    fn subscribe_child_events(&self, path: &str) -> StoreResult<Subscription>;
}
