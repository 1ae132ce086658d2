//! SketchRoom Core Library
//!
//! Platform-agnostic stroke model, local stroke map and sync protocol for
//! shared freehand canvases.

pub mod collaboration;
pub mod config;
pub mod frame;
pub mod identity;
pub mod input;
pub mod protocol;
pub mod session;
pub mod store;
pub mod stroke;
pub mod stroke_map;
pub mod sync;

pub use collaboration::CollaborationManager;
pub use config::{ClientConfig, ConfigError, SyncConfig};
pub use frame::RedrawScheduler;
pub use identity::{CLIENT_ID_KEY, ClientIdentity, IdentityError};
pub use input::{
    CanvasViewport, CaptureError, CursorIndicator, CursorStyle, NoCapture, PointerCapture, PointerEvent,
};
pub use session::{DrawingSession, SessionContext};
pub use store::{
    ChildEvent, ChildEventKind, MemoryStore, RelayStore, StoreError, StoreResult, StrokeStore,
    Subscription, strokes_path,
};
pub use stroke::{Brush, PaintMode, RecordError, Stroke, StrokeId, StrokePatch, parse_hex_color};
pub use stroke_map::StrokeMap;
pub use sync::{FlushThrottle, SyncClient};
