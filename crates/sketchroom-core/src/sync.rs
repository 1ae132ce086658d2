//! Sync protocol between the local stroke map and the shared store.
//!
//! Outbound, gesture progress becomes throttled writes: one create when the
//! gesture starts, point flushes at most once per interval while drawing,
//! and an immediate finalize when it ends. Inbound, child events are merged
//! into the [`StrokeMap`] by id.

use crate::config::SyncConfig;
use crate::store::{ChildEvent, StoreResult, StrokeStore, Subscription, strokes_path};
use crate::stroke::{Stroke, StrokeId, StrokePatch};
use crate::stroke_map::StrokeMap;
use kurbo::Point;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-interval flush timer.
///
/// The first request arms a deadline one interval out. Requests made while
/// armed are absorbed, so at most one flush fires per interval no matter
/// how many points arrive.
#[derive(Debug, Clone)]
pub struct FlushThrottle {
    interval: Duration,
    due: Option<Instant>,
}

impl FlushThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, due: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ask for a flush. Returns true if this call armed the timer.
    pub fn request(&mut self, now: Instant) -> bool {
        if self.due.is_some() {
            return false;
        }
        self.due = Some(now + self.interval);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// Returns true once the armed deadline has passed, disarming the timer.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }
}

/// Outbound writes and inbound merges for one client.
pub struct SyncClient {
    store: Arc<dyn StrokeStore>,
    path: Option<String>,
    throttle: FlushThrottle,
    failed_writes: u64,
}

impl SyncClient {
    pub fn new(store: Arc<dyn StrokeStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            path: None,
            throttle: FlushThrottle::new(config.flush_interval()),
            failed_writes: 0,
        }
    }

    pub fn store(&self) -> &Arc<dyn StrokeStore> {
        &self.store
    }

    /// Point writes at a room's stroke collection, or nowhere.
    pub fn set_room(&mut self, room_id: Option<&str>) {
        self.path = room_id.map(strokes_path);
        self.throttle.cancel();
    }

    /// Collection path of the current room.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Writes rejected by the store since this client was created.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    pub fn throttle(&self) -> &FlushThrottle {
        &self.throttle
    }

    /// Subscribe to child events of the current room.
    pub fn subscribe(&self) -> Option<StoreResult<Subscription>> {
        let path = self.path.as_deref()?;
        Some(self.store.subscribe_child_events(path))
    }

    /// Allocate an id and write the initial record.
    ///
    /// A failed write is logged; the returned id stays valid for local
    /// drawing either way. Returns `None` outside a room.
    pub fn create(&mut self, stroke: &Stroke) -> Option<StrokeId> {
        let path = self.path.clone()?;
        let id = self.store.create_child(&path);
        let result = self.store.write(&path, &id, stroke);
        self.record_result("create", &id, result);
        Some(id)
    }

    /// Ask for a throttled flush of the active stroke.
    pub fn request_flush(&mut self, now: Instant) {
        self.throttle.request(now);
    }

    /// Flush `points` if the throttle deadline has passed.
    /// Returns true if a flush was issued.
    pub fn poll_flush(&mut self, now: Instant, id: &StrokeId, points: &[Point]) -> bool {
        if !self.throttle.poll(now) {
            return false;
        }
        let Some(path) = self.path.clone() else {
            return false;
        };
        let result = self.store.patch(&path, id, &StrokePatch::points(points.to_vec()));
        self.record_result("flush", id, result);
        true
    }

    /// Write the full buffer with `completed = true`, bypassing the throttle.
    pub fn finalize(&mut self, id: &StrokeId, points: &[Point]) {
        self.throttle.cancel();
        let Some(path) = self.path.clone() else {
            return;
        };
        let result = self.store.patch(&path, id, &StrokePatch::finalize(points.to_vec()));
        self.record_result("finalize", id, result);
    }

    /// Delete one stroke remotely and locally.
    pub fn delete(&mut self, strokes: &mut StrokeMap, id: &StrokeId) {
        if let Some(path) = self.path.clone() {
            let result = self.store.delete(&path, id);
            self.record_result("delete", id, result);
        }
        strokes.remove(id);
    }

    /// Delete every stroke in the room remotely and locally.
    pub fn delete_all(&mut self, strokes: &mut StrokeMap) {
        if let Some(path) = self.path.clone() {
            if let Err(e) = self.store.delete_all(&path) {
                self.failed_writes += 1;
                log::warn!("Failed to clear {}: {}", path, e);
            }
        }
        strokes.clear();
    }

    /// Merge one remote child event. Returns true if the map changed.
    pub fn apply_child_event(strokes: &mut StrokeMap, event: &ChildEvent) -> bool {
        strokes.apply(event)
    }

    fn record_result(&mut self, op: &str, id: &StrokeId, result: StoreResult<()>) {
        if let Err(e) = result {
            self.failed_writes += 1;
            log::warn!("Remote {} of stroke {} failed: {}", op, id, e);
        }
    }
}
