//! Pointer input and the cursor indicator.

use crate::stroke::Brush;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest diameter of the cursor indicator.
const MIN_CURSOR_DIAMETER: f64 = 6.0;

/// Unified mouse/touch/pen pointer event in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down { position: Point, pointer_id: u32 },
    Move { position: Point, pointer_id: u32 },
    Up { position: Point, pointer_id: u32 },
    Cancel { position: Point, pointer_id: u32 },
    Leave { position: Point, pointer_id: u32 },
}

impl PointerEvent {
    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position, .. }
            | PointerEvent::Up { position, .. }
            | PointerEvent::Cancel { position, .. }
            | PointerEvent::Leave { position, .. } => position,
        }
    }

    pub fn pointer_id(&self) -> u32 {
        match *self {
            PointerEvent::Down { pointer_id, .. }
            | PointerEvent::Move { pointer_id, .. }
            | PointerEvent::Up { pointer_id, .. }
            | PointerEvent::Cancel { pointer_id, .. }
            | PointerEvent::Leave { pointer_id, .. } => pointer_id,
        }
    }

    /// True for events that end a gesture.
    pub fn is_end(&self) -> bool {
        matches!(
            self,
            PointerEvent::Up { .. } | PointerEvent::Cancel { .. } | PointerEvent::Leave { .. }
        )
    }
}

/// Placement of the drawing surface on screen, in layout units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasViewport {
    /// Screen position of the surface's top-left corner.
    pub origin: Point,
    /// Logical surface size.
    pub size: Size,
}

impl CanvasViewport {
    pub fn new(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    /// Convert a screen position to canvas-local coordinates clamped to the surface.
    pub fn to_local(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.origin.x).clamp(0.0, self.size.width.max(0.0)),
            (screen.y - self.origin.y).clamp(0.0, self.size.height.max(0.0)),
        )
    }
}

impl Default for CanvasViewport {
    fn default() -> Self {
        Self::new(Point::ZERO, Size::new(1280.0, 800.0))
    }
}

/// Pointer capture failures. Drawing continues without capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Pointer capture is not supported by this device")]
    Unsupported,
}

/// Host hook for routing a pointer's events to the canvas while drawing.
pub trait PointerCapture {
    fn set_pointer_capture(&mut self, pointer_id: u32) -> Result<(), CaptureError>;
    fn release_pointer_capture(&mut self, pointer_id: u32) -> Result<(), CaptureError>;
}

/// Capture hook for hosts without pointer capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl PointerCapture for NoCapture {
    fn set_pointer_capture(&mut self, _pointer_id: u32) -> Result<(), CaptureError> {
        Ok(())
    }

    fn release_pointer_capture(&mut self, _pointer_id: u32) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Appearance of the cursor indicator.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorStyle {
    /// Filled disc in the brush color.
    Paint { color: String },
    /// Hollow ring.
    Eraser,
}

/// Brush-sized indicator that follows the pointer over the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorIndicator {
    pub visible: bool,
    /// Canvas-local center.
    pub position: Point,
    pub diameter: f64,
    pub style: CursorStyle,
}

impl Default for CursorIndicator {
    fn default() -> Self {
        Self {
            visible: false,
            position: Point::ZERO,
            diameter: MIN_CURSOR_DIAMETER,
            style: CursorStyle::Eraser,
        }
    }
}

impl CursorIndicator {
    /// Show the indicator at `position` styled after `brush`.
    pub fn show(&mut self, position: Point, brush: &Brush) {
        self.visible = true;
        self.position = position;
        self.diameter = brush.size.max(MIN_CURSOR_DIAMETER);
        self.style = if brush.eraser {
            CursorStyle::Eraser
        } else {
            CursorStyle::Paint {
                color: brush.color.clone(),
            }
        };
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }
}
