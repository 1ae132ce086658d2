//! Collaboration management for shared freehand canvases.
//!
//! [`CollaborationManager`] ties the local drawing session, the merged
//! stroke map and the store subscription of the joined room together. The
//! host feeds it pointer events and calls [`tick`](CollaborationManager::tick)
//! and [`take_frame`](CollaborationManager::take_frame) from its event loop.

use crate::config::ClientConfig;
use crate::frame::RedrawScheduler;
use crate::identity::{ClientIdentity, random_base36};
use crate::input::{CanvasViewport, CursorIndicator, NoCapture, PointerCapture, PointerEvent};
use crate::session::{DrawingSession, SessionContext};
use crate::store::{ChildEventKind, StoreError, StrokeStore, Subscription};
use crate::stroke::{Brush, StrokeId, parse_hex_color};
use crate::stroke_map::StrokeMap;
use crate::sync::SyncClient;
use kurbo::{Point, Size};
use std::sync::Arc;
use std::time::Instant;

/// Length of generated room ids.
const ROOM_ID_LEN: usize = 7;

/// Owns everything one client needs to draw in a shared room.
pub struct CollaborationManager {
    identity: ClientIdentity,
    brush: Brush,
    strokes: StrokeMap,
    session: DrawingSession,
    sync: SyncClient,
    subscription: Option<Subscription>,
    redraw: RedrawScheduler,
    viewport: CanvasViewport,
    capture: Box<dyn PointerCapture>,
    room: Option<String>,
}

impl CollaborationManager {
    pub fn new(store: Arc<dyn StrokeStore>, identity: ClientIdentity, config: &ClientConfig) -> Self {
        Self {
            identity,
            brush: config.brush.clone(),
            strokes: StrokeMap::new(),
            session: DrawingSession::new(config.sync.min_point_distance),
            sync: SyncClient::new(store, &config.sync),
            subscription: None,
            redraw: RedrawScheduler::new(config.sync.frame_interval()),
            viewport: CanvasViewport::new(
                Point::ZERO,
                Size::new(config.canvas_width, config.canvas_height),
            ),
            capture: Box::new(NoCapture),
            room: None,
        }
    }

    /// Install the host's pointer capture hook.
    pub fn with_capture(mut self, capture: Box<dyn PointerCapture>) -> Self {
        self.capture = capture;
        self
    }

    pub fn client_id(&self) -> &str {
        self.identity.as_str()
    }

    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }

    /// Join `room_id`, or a freshly generated room when `None`.
    ///
    /// Any previous subscription is dropped and the stroke map emptied
    /// before subscribing, so no stroke from the old room survives the
    /// switch. A failed subscription leaves the client in the room with
    /// local-only drawing. Returns the joined room id.
    pub fn join_room(&mut self, room_id: Option<&str>) -> Result<String, StoreError> {
        let room = room_id
            .map(str::to_string)
            .unwrap_or_else(generate_room_id);

        self.detach();
        self.sync.set_room(Some(room.as_str()));
        self.room = Some(room.clone());
        self.redraw.force();

        match self.sync.subscribe() {
            Some(Ok(subscription)) => {
                log::info!("Joined room {}", room);
                self.subscription = Some(subscription);
                Ok(room)
            }
            Some(Err(e)) => {
                log::warn!("Subscribing to room {} failed: {}", room, e);
                Err(e)
            }
            None => Ok(room),
        }
    }

    /// Leave the current room and empty the local view.
    pub fn leave_room(&mut self) {
        if let Some(room) = self.room.take() {
            log::info!("Left room {}", room);
        }
        self.detach();
        self.sync.set_room(None);
        self.redraw.force();
    }

    fn detach(&mut self) {
        self.session.reset();
        self.subscription = None;
        self.strokes.clear();
    }

    /// Feed one pointer event. Returns true if the stroke map changed.
    pub fn pointer_event(&mut self, event: PointerEvent, now: Instant) -> bool {
        let mut ctx = SessionContext {
            strokes: &mut self.strokes,
            sync: &mut self.sync,
            redraw: &mut self.redraw,
            brush: &self.brush,
            owner_id: self.identity.as_str(),
            capture: self.capture.as_mut(),
        };
        self.session.handle(&mut ctx, event, &self.viewport, now)
    }

    /// Merge pending remote events and issue a due flush.
    /// Returns true if the stroke map changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(subscription) = self.subscription.as_mut() {
            let active = self.session.active_id();
            for event in subscription.poll_events() {
                // The local buffer is newer than any echo of the stroke being drawn.
                if event.kind != ChildEventKind::Removed && active == Some(&event.id) {
                    continue;
                }
                changed |= SyncClient::apply_child_event(&mut self.strokes, &event);
            }
        }
        if changed {
            self.redraw.schedule_redraw();
        }
        self.session.tick(&mut self.sync, now);
        changed
    }

    /// True if the host should redraw now.
    pub fn take_frame(&mut self, now: Instant) -> bool {
        self.redraw.take_frame(now)
    }

    /// Delete this client's most recent stroke. Returns its id, or `None`
    /// when the client has no strokes in the room.
    pub fn undo(&mut self) -> Option<StrokeId> {
        let id = self.strokes.latest_owned_by(self.identity.as_str())?.clone();
        if self.session.active_id() == Some(&id) {
            self.session.reset();
        }
        self.sync.delete(&mut self.strokes, &id);
        self.redraw.schedule_redraw();
        log::debug!("Undid stroke {}", id);
        Some(id)
    }

    /// Delete every stroke in the room once `confirm` agrees.
    /// Returns true if the room was cleared.
    pub fn clear(&mut self, confirm: impl FnOnce() -> bool) -> bool {
        if !confirm() {
            return false;
        }
        self.session.reset();
        self.sync.delete_all(&mut self.strokes);
        self.redraw.schedule_redraw();
        true
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Set the paint color. Invalid hex colors are rejected.
    pub fn set_color(&mut self, color: &str) -> bool {
        if parse_hex_color(color).is_none() {
            log::warn!("Ignoring invalid color {:?}", color);
            return false;
        }
        self.brush.color = color.to_string();
        self.brush.eraser = false;
        true
    }

    pub fn set_size(&mut self, size: f64) {
        self.brush.set_size(size);
    }

    pub fn toggle_eraser(&mut self) {
        self.brush.toggle_eraser();
    }

    pub fn strokes(&self) -> &StrokeMap {
        &self.strokes
    }

    pub fn cursor(&self) -> &CursorIndicator {
        self.session.cursor()
    }

    pub fn is_drawing(&self) -> bool {
        self.session.is_drawing()
    }

    pub fn viewport(&self) -> &CanvasViewport {
        &self.viewport
    }

    /// Move or resize the drawing surface. Forces a full redraw.
    pub fn resize_viewport(&mut self, origin: Point, size: Size) {
        self.viewport = CanvasViewport::new(origin, size);
        self.redraw.force();
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }
}

/// Random room id in the same base36 form as client tokens.
pub fn generate_room_id() -> String {
    random_base36(ROOM_ID_LEN)
}
