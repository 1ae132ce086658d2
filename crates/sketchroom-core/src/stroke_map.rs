//! The merged local view of every stroke in the joined room.

use crate::store::{ChildEvent, ChildEventKind};
use crate::stroke::{Stroke, StrokeId};
use std::collections::BTreeMap;

/// Mapping from stroke id to stroke record, shared by rendering and sync.
///
/// Iteration follows id order, which for store-assigned ids is creation
/// order. Every mutation is an overwrite or removal by id, so replaying the
/// same event leaves the map unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrokeMap {
    strokes: BTreeMap<StrokeId, Stroke>,
}

impl StrokeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a stroke. Returns true if the stored record changed.
    pub fn upsert(&mut self, id: StrokeId, stroke: Stroke) -> bool {
        match self.strokes.get(&id) {
            Some(existing) if *existing == stroke => false,
            _ => {
                self.strokes.insert(id, stroke);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &StrokeId) -> Option<Stroke> {
        self.strokes.remove(id)
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn get(&self, id: &StrokeId) -> Option<&Stroke> {
        self.strokes.get(id)
    }

    pub fn get_mut(&mut self, id: &StrokeId) -> Option<&mut Stroke> {
        self.strokes.get_mut(id)
    }

    pub fn contains(&self, id: &StrokeId) -> bool {
        self.strokes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// Strokes in render order.
    pub fn iter(&self) -> impl Iterator<Item = (&StrokeId, &Stroke)> {
        self.strokes.iter()
    }

    /// Apply a remote child event.
    ///
    /// Records that fail to decode are dropped without touching the map.
    /// Returns true if the map changed.
    pub fn apply(&mut self, event: &ChildEvent) -> bool {
        match event.kind {
            ChildEventKind::Added | ChildEventKind::Changed => {
                let Some(record) = event.record.as_ref() else {
                    log::warn!("Ignoring {:?} event for {} without a record", event.kind, event.id);
                    return false;
                };
                match Stroke::from_record(record) {
                    Ok(stroke) => self.upsert(event.id.clone(), stroke),
                    Err(e) => {
                        log::warn!("Ignoring record for stroke {}: {}", event.id, e);
                        false
                    }
                }
            }
            ChildEventKind::Removed => self.remove(&event.id).is_some(),
        }
    }

    /// The most recently created stroke authored by `owner_id`.
    ///
    /// Ties on `created_at` go to the later id.
    pub fn latest_owned_by(&self, owner_id: &str) -> Option<&StrokeId> {
        self.strokes
            .iter()
            .filter(|(_, stroke)| stroke.owner_id == owner_id)
            .max_by(|(a_id, a), (b_id, b)| a.created_at.cmp(&b.created_at).then_with(|| a_id.cmp(b_id)))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::Brush;
    use kurbo::Point;
    use serde_json::json;

    fn stroke(owner: &str, created_at: i64) -> Stroke {
        Stroke::begin(owner, &Brush::default(), created_at, Point::new(1.0, 1.0))
    }

    fn added(id: &str, stroke: &Stroke) -> ChildEvent {
        ChildEvent::added(StrokeId::from(id), stroke.to_record())
    }

    #[test]
    fn test_applying_same_event_twice_is_idempotent() {
        let event = added("a", &stroke("me", 1));

        let mut once = StrokeMap::new();
        assert!(once.apply(&event));

        let mut twice = StrokeMap::new();
        twice.apply(&event);
        assert!(!twice.apply(&event));

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_changed_overwrites_and_removed_deletes() {
        let mut map = StrokeMap::new();
        let mut s = stroke("me", 1);
        map.apply(&added("a", &s));

        s.points.push(Point::new(9.0, 9.0));
        s.completed = true;
        let changed = ChildEvent::changed(StrokeId::from("a"), s.to_record());
        assert!(map.apply(&changed));
        assert_eq!(map.get(&StrokeId::from("a")), Some(&s));

        assert!(map.apply(&ChildEvent::removed(StrokeId::from("a"))));
        assert!(map.is_empty());
        assert!(!map.apply(&ChildEvent::removed(StrokeId::from("a"))));
    }

    #[test]
    fn test_echo_of_optimistic_write_does_not_duplicate() {
        let mut map = StrokeMap::new();
        let id = StrokeId::from("local");
        let s = stroke("me", 5);
        map.upsert(id.clone(), s.clone());

        map.apply(&ChildEvent::added(id, s.to_record()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_malformed_records_are_ignored() {
        let mut map = StrokeMap::new();
        map.apply(&added("a", &stroke("me", 1)));
        let before = map.clone();

        assert!(!map.apply(&ChildEvent::changed(StrokeId::from("a"), json!(null))));
        assert!(!map.apply(&ChildEvent::changed(StrokeId::from("a"), json!({"points": 3}))));
        assert!(!map.apply(&ChildEvent {
            kind: ChildEventKind::Added,
            id: StrokeId::from("b"),
            record: None,
        }));
        assert_eq!(map, before);
    }

    #[test]
    fn test_latest_owned_by_ignores_other_owners() {
        let mut map = StrokeMap::new();
        map.upsert(StrokeId::from("1"), stroke("me", 10));
        map.upsert(StrokeId::from("2"), stroke("me", 30));
        map.upsert(StrokeId::from("3"), stroke("peer", 50));
        map.upsert(StrokeId::from("4"), stroke("me", 20));

        assert_eq!(map.latest_owned_by("me"), Some(&StrokeId::from("2")));
        assert_eq!(map.latest_owned_by("peer"), Some(&StrokeId::from("3")));
        assert_eq!(map.latest_owned_by("nobody"), None);
    }

    #[test]
    fn test_latest_owned_by_breaks_ties_by_id() {
        let mut map = StrokeMap::new();
        map.upsert(StrokeId::from("b"), stroke("me", 10));
        map.upsert(StrokeId::from("a"), stroke("me", 10));
        assert_eq!(map.latest_owned_by("me"), Some(&StrokeId::from("b")));
    }

    #[test]
    fn test_iteration_follows_id_order() {
        let mut map = StrokeMap::new();
        map.upsert(StrokeId::from("c"), stroke("me", 1));
        map.upsert(StrokeId::from("a"), stroke("me", 2));
        map.upsert(StrokeId::from("b"), stroke("me", 3));
        let ids: Vec<&str> = map.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
