//! In-memory store implementation.

use super::{ChildEvent, StoreError, StoreResult, StrokeStore, Subscription};
use crate::stroke::{Stroke, StrokeId, StrokePatch};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

struct Listener {
    id: u64,
    tx: Sender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<StrokeId, Value>>,
    listeners: HashMap<String, Vec<Listener>>,
    next_listener: u64,
    offline: bool,
}

impl Inner {
    fn dispatch(&mut self, path: &str, event: ChildEvent) {
        if let Some(listeners) = self.listeners.get_mut(path) {
            listeners.retain(|listener| listener.tx.send(event.clone()).is_ok());
        }
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Shared in-process store for tests and single-process sessions.
///
/// Cloning yields another handle to the same data, so several clients can
/// share one store. Writes are echoed to every subscriber, the writer
/// included.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent operations fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.offline = offline;
        }
    }

    /// Stored record for one child.
    pub fn record(&self, path: &str, id: &StrokeId) -> Option<Value> {
        let inner = self.inner.read().ok()?;
        inner.collections.get(path)?.get(id).cloned()
    }

    /// Number of children under `path`.
    pub fn child_count(&self, path: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.collections.get(path).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Number of live listeners on `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.listeners.get(path).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))
    }
}

impl StrokeStore for MemoryStore {
    fn create_child(&self, _path: &str) -> StrokeId {
        StrokeId::generate()
    }

    fn write(&self, path: &str, id: &StrokeId, record: &Stroke) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.ensure_online()?;
        let record = record.to_record();
        let existed = inner
            .collections
            .entry(path.to_string())
            .or_default()
            .insert(id.clone(), record.clone())
            .is_some();
        let event = if existed {
            ChildEvent::changed(id.clone(), record)
        } else {
            ChildEvent::added(id.clone(), record)
        };
        inner.dispatch(path, event);
        Ok(())
    }

    fn patch(&self, path: &str, id: &StrokeId, patch: &StrokePatch) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.ensure_online()?;
        let children = inner.collections.entry(path.to_string()).or_default();
        let existed = children.contains_key(id);
        let record = children.entry(id.clone()).or_insert(Value::Null);
        patch
            .merge_into(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let record = record.clone();
        let event = if existed {
            ChildEvent::changed(id.clone(), record)
        } else {
            ChildEvent::added(id.clone(), record)
        };
        inner.dispatch(path, event);
        Ok(())
    }

    fn delete(&self, path: &str, id: &StrokeId) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.ensure_online()?;
        let removed = inner
            .collections
            .get_mut(path)
            .and_then(|children| children.remove(id))
            .is_some();
        if removed {
            inner.dispatch(path, ChildEvent::removed(id.clone()));
        }
        Ok(())
    }

    fn delete_all(&self, path: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.ensure_online()?;
        let removed = inner.collections.remove(path).unwrap_or_default();
        for id in removed.into_keys() {
            inner.dispatch(path, ChildEvent::removed(id));
        }
        Ok(())
    }

    fn subscribe_child_events(&self, path: &str) -> StoreResult<Subscription> {
        let mut inner = self.lock()?;
        let (tx, rx) = channel();

        if let Some(children) = inner.collections.get(path) {
            for (id, record) in children {
                // The receiver is still in scope, so this send cannot fail.
                let _ = tx.send(ChildEvent::added(id.clone(), record.clone()));
            }
        }

        let listener_id = inner.next_listener;
        inner.next_listener += 1;
        inner
            .listeners
            .entry(path.to_string())
            .or_default()
            .push(Listener { id: listener_id, tx });

        let weak = Arc::downgrade(&self.inner);
        let watched = path.to_string();
        Ok(Subscription::new(path, rx, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Ok(mut inner) = inner.write() {
                if let Some(listeners) = inner.listeners.get_mut(&watched) {
                    listeners.retain(|listener| listener.id != listener_id);
                    if listeners.is_empty() {
                        inner.listeners.remove(&watched);
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChildEventKind;
    use crate::stroke::Brush;
    use kurbo::Point;

    const PATH: &str = "rooms/test/strokes";

    fn stroke() -> Stroke {
        Stroke::begin("me", &Brush::default(), 1, Point::new(1.0, 1.0))
    }

    #[test]
    fn test_write_then_patch_emits_added_then_changed() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe_child_events(PATH).unwrap();
        let id = store.create_child(PATH);

        store.write(PATH, &id, &stroke()).unwrap();
        store
            .patch(PATH, &id, &StrokePatch::finalize(vec![Point::ZERO, Point::new(4.0, 4.0)]))
            .unwrap();

        let kinds: Vec<ChildEventKind> = sub.poll_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChildEventKind::Added, ChildEventKind::Changed]);

        let stored = Stroke::from_record(&store.record(PATH, &id).unwrap()).unwrap();
        assert!(stored.completed);
        assert_eq!(stored.points.len(), 2);
    }

    #[test]
    fn test_new_subscriber_receives_existing_children() {
        let store = MemoryStore::new();
        let id = store.create_child(PATH);
        store.write(PATH, &id, &stroke()).unwrap();

        let mut sub = store.subscribe_child_events(PATH).unwrap();
        let events = sub.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChildEventKind::Added);
        assert_eq!(events[0].id, id);
    }

    #[test]
    fn test_paths_are_isolated() {
        let store = MemoryStore::new();
        let mut other = store.subscribe_child_events("rooms/other/strokes").unwrap();
        let id = store.create_child(PATH);
        store.write(PATH, &id, &stroke()).unwrap();
        assert!(other.poll_events().is_empty());
    }

    #[test]
    fn test_delete_all_removes_every_child() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            let id = store.create_child(PATH);
            store.write(PATH, &id, &stroke()).unwrap();
        }
        let mut sub = store.subscribe_child_events(PATH).unwrap();
        sub.poll_events();

        store.delete_all(PATH).unwrap();
        assert_eq!(store.child_count(PATH), 0);
        let events = sub.poll_events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.kind == ChildEventKind::Removed));
    }

    #[test]
    fn test_dropped_subscription_unregisters_listener() {
        let store = MemoryStore::new();
        let sub = store.subscribe_child_events(PATH).unwrap();
        assert_eq!(store.listener_count(PATH), 1);
        drop(sub);
        assert_eq!(store.listener_count(PATH), 0);
    }

    #[test]
    fn test_offline_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let id = store.create_child(PATH);
        assert!(matches!(store.write(PATH, &id, &stroke()), Err(StoreError::Disconnected)));
        assert_eq!(store.child_count(PATH), 0);
    }
}
