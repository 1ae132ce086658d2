//! Local drawing session: turns pointer gestures into an optimistic stroke.

use crate::frame::RedrawScheduler;
use crate::input::{CanvasViewport, CursorIndicator, PointerCapture, PointerEvent};
use crate::stroke::{Brush, Stroke, StrokeId, timestamp_millis};
use crate::stroke_map::StrokeMap;
use crate::sync::SyncClient;
use kurbo::Point;
use std::time::Instant;

/// Everything a gesture step reads or mutates besides the session itself.
pub struct SessionContext<'a> {
    pub strokes: &'a mut StrokeMap,
    pub sync: &'a mut SyncClient,
    pub redraw: &'a mut RedrawScheduler,
    pub brush: &'a Brush,
    pub owner_id: &'a str,
    pub capture: &'a mut dyn PointerCapture,
}

#[derive(Debug, Clone)]
struct ActiveStroke {
    id: StrokeId,
    pointer_id: u32,
    points: Vec<Point>,
    last: Point,
}

#[derive(Debug, Clone, Default)]
enum SessionState {
    #[default]
    Idle,
    Drawing(ActiveStroke),
}

/// Per-client `Idle -> Drawing -> Idle` gesture state machine.
#[derive(Debug, Clone)]
pub struct DrawingSession {
    state: SessionState,
    min_distance: f64,
    cursor: CursorIndicator,
    last_created_at: i64,
}

impl DrawingSession {
    /// `min_distance` is the jitter threshold: moves no farther than this
    /// from the last recorded point are dropped.
    pub fn new(min_distance: f64) -> Self {
        Self {
            state: SessionState::Idle,
            min_distance,
            cursor: CursorIndicator::default(),
            last_created_at: 0,
        }
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, SessionState::Drawing(_))
    }

    pub fn active_id(&self) -> Option<&StrokeId> {
        match &self.state {
            SessionState::Drawing(active) => Some(&active.id),
            SessionState::Idle => None,
        }
    }

    /// Point buffer of the active stroke.
    pub fn points(&self) -> &[Point] {
        match &self.state {
            SessionState::Drawing(active) => &active.points,
            SessionState::Idle => &[],
        }
    }

    pub fn cursor(&self) -> &CursorIndicator {
        &self.cursor
    }

    /// Dispatch a pointer event. Returns true if the stroke map changed.
    pub fn handle(
        &mut self,
        ctx: &mut SessionContext<'_>,
        event: PointerEvent,
        viewport: &CanvasViewport,
        now: Instant,
    ) -> bool {
        let pointer_id = event.pointer_id();
        if event.is_end() {
            return self.end(ctx, pointer_id).is_some();
        }
        let local = viewport.to_local(event.position());
        match event {
            PointerEvent::Down { .. } => self.begin(ctx, local, pointer_id, now).is_some(),
            _ => self.extend(ctx, local, pointer_id, now),
        }
    }

    /// Start a stroke at `local`. Ignored outside a room or mid-gesture.
    pub fn begin(
        &mut self,
        ctx: &mut SessionContext<'_>,
        local: Point,
        pointer_id: u32,
        now: Instant,
    ) -> Option<StrokeId> {
        if self.is_drawing() || ctx.sync.path().is_none() {
            return None;
        }

        if let Err(e) = ctx.capture.set_pointer_capture(pointer_id) {
            log::debug!("Pointer capture unavailable: {}", e);
        }
        self.cursor.show(local, ctx.brush);

        let created_at = timestamp_millis().max(self.last_created_at + 1);
        self.last_created_at = created_at;
        let stroke = Stroke::begin(ctx.owner_id, ctx.brush, created_at, local);
        let id = ctx.sync.create(&stroke)?;

        ctx.strokes.upsert(id.clone(), stroke);
        ctx.redraw.schedule_redraw();
        ctx.sync.request_flush(now);

        self.state = SessionState::Drawing(ActiveStroke {
            id: id.clone(),
            pointer_id,
            points: vec![local],
            last: local,
        });
        Some(id)
    }

    /// Move the cursor and, while drawing, append `local` if it clears the
    /// jitter threshold. Returns true if a point was appended.
    pub fn extend(
        &mut self,
        ctx: &mut SessionContext<'_>,
        local: Point,
        pointer_id: u32,
        now: Instant,
    ) -> bool {
        self.cursor.show(local, ctx.brush);

        let SessionState::Drawing(active) = &mut self.state else {
            return false;
        };
        if active.pointer_id != pointer_id || local.distance(active.last) <= self.min_distance {
            return false;
        }

        active.points.push(local);
        active.last = local;

        match ctx.strokes.get_mut(&active.id) {
            Some(stroke) => stroke.points.clone_from(&active.points),
            None => {
                // Removed under us (e.g. a remote clear); keep drawing locally.
                let mut stroke = Stroke::begin(ctx.owner_id, ctx.brush, self.last_created_at, local);
                stroke.points.clone_from(&active.points);
                ctx.strokes.upsert(active.id.clone(), stroke);
            }
        }
        ctx.redraw.schedule_redraw();
        ctx.sync.request_flush(now);
        true
    }

    /// End the gesture: release capture, finalize the stroke, reset state.
    /// Returns the finished stroke id, or `None` when not drawing.
    pub fn end(&mut self, ctx: &mut SessionContext<'_>, pointer_id: u32) -> Option<StrokeId> {
        let SessionState::Drawing(active) = &self.state else {
            return None;
        };
        if active.pointer_id != pointer_id {
            return None;
        }
        let SessionState::Drawing(active) = std::mem::take(&mut self.state) else {
            return None;
        };
        self.cursor.hide();

        if let Err(e) = ctx.capture.release_pointer_capture(pointer_id) {
            log::debug!("Pointer release failed: {}", e);
        }
        ctx.sync.finalize(&active.id, &active.points);
        if let Some(stroke) = ctx.strokes.get_mut(&active.id) {
            stroke.points = active.points;
            stroke.completed = true;
        }
        ctx.redraw.schedule_redraw();
        Some(active.id)
    }

    /// Issue the throttled flush if it is due. Returns true if one was sent.
    pub fn tick(&mut self, sync: &mut SyncClient, now: Instant) -> bool {
        match &self.state {
            SessionState::Drawing(active) => sync.poll_flush(now, &active.id, &active.points),
            SessionState::Idle => false,
        }
    }

    /// Drop any active gesture without writing it.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.cursor.hide();
    }
}

impl Default for DrawingSession {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MIN_POINT_DISTANCE)
    }
}
