//! Freehand stroke records and their rendering geometry.

use kurbo::{BezPath, Point};
use peniko::Color;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Default brush color.
pub const DEFAULT_COLOR: &str = "#0b6cf0";
/// Default stroke width, also used for records with a missing or invalid size.
pub const DEFAULT_SIZE: f64 = 4.0;
/// Smallest brush width the toolbar offers.
pub const MIN_SIZE: f64 = 1.0;
/// Largest brush width the toolbar offers.
pub const MAX_SIZE: f64 = 80.0;

/// Errors raised while decoding a stroke record received from the store.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is empty")]
    Empty,
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Store-assigned stroke key.
///
/// Keys are time-ordered, so sorting by id sorts strokes by creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(String);

impl StrokeId {
    /// Allocate a fresh, globally unique, time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StrokeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StrokeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a stroke combines with pixels already on the surface.
#[derive(Debug, Clone, Copy)]
pub enum PaintMode {
    /// Source-over painting with the given color.
    Paint(Color),
    /// Destination-out: removes existing pixels under the stroke.
    Erase,
}

/// Current drawing tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brush {
    pub color: String,
    pub size: f64,
    pub eraser: bool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            size: DEFAULT_SIZE,
            eraser: false,
        }
    }
}

impl Brush {
    /// Set the stroke width, clamped to the toolbar range.
    pub fn set_size(&mut self, size: f64) {
        self.size = if size.is_finite() {
            size.clamp(MIN_SIZE, MAX_SIZE)
        } else {
            DEFAULT_SIZE
        };
    }

    /// Toggle between pen and eraser.
    pub fn toggle_eraser(&mut self) {
        self.eraser = !self.eraser;
    }
}

fn default_size() -> f64 {
    DEFAULT_SIZE
}

fn default_color() -> String {
    "#000".to_string()
}

/// One continuous drawing gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    /// CSS hex color, ignored for eraser strokes.
    #[serde(default = "default_color")]
    pub color: String,
    /// Stroke width in logical pixels.
    #[serde(default = "default_size")]
    pub size: f64,
    #[serde(default)]
    pub eraser: bool,
    /// False while the gesture is still in progress.
    #[serde(default)]
    pub completed: bool,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
    /// Identity of the authoring client.
    #[serde(default, alias = "clientId")]
    pub owner_id: String,
    #[serde(default)]
    pub points: Vec<Point>,
}

impl Stroke {
    /// Start a stroke at `first` using the given brush.
    pub fn begin(owner_id: &str, brush: &Brush, created_at: i64, first: Point) -> Self {
        Self {
            color: brush.color.clone(),
            size: brush.size,
            eraser: brush.eraser,
            completed: false,
            created_at,
            owner_id: owner_id.to_string(),
            points: vec![first],
        }
    }

    /// Decode a record delivered by the store.
    pub fn from_record(record: &Value) -> Result<Self, RecordError> {
        match record {
            Value::Null => Err(RecordError::Empty),
            Value::Object(fields) if fields.is_empty() => Err(RecordError::Empty),
            Value::Object(_) => serde_json::from_value(record.clone())
                .map_err(|e| RecordError::Malformed(e.to_string())),
            other => Err(RecordError::Malformed(format!("expected object, got {other}"))),
        }
    }

    /// Encode as a store record.
    pub fn to_record(&self) -> Value {
        // Every field is plain data, serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Effective line width.
    pub fn width(&self) -> f64 {
        if self.size.is_finite() && self.size > 0.0 {
            self.size
        } else {
            DEFAULT_SIZE
        }
    }

    pub fn paint_mode(&self) -> PaintMode {
        if self.eraser {
            PaintMode::Erase
        } else {
            PaintMode::Paint(parse_hex_color(&self.color).unwrap_or(Color::BLACK))
        }
    }

    /// Build the smoothed outline of the stroke.
    ///
    /// Interior points act as quadratic control points ending at the midpoint
    /// to the next point, which damps pointer jitter. The last segment is a
    /// straight line into the final point. A single point yields a
    /// zero-length segment so round caps render it as a dot.
    pub fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let Some((&first, rest)) = self.points.split_first() else {
            return path;
        };

        path.move_to(first);
        match rest {
            [] => path.line_to(first),
            [only] => path.line_to(*only),
            [.., last] => {
                for pair in rest.windows(2) {
                    let (curr, next) = (pair[0], pair[1]);
                    path.quad_to(curr, curr.midpoint(next));
                }
                path.line_to(*last);
            }
        }
        path
    }
}

/// Partial stroke update sent while a gesture is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePatch {
    pub points: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl StrokePatch {
    pub fn points(points: Vec<Point>) -> Self {
        Self { points, completed: None }
    }

    pub fn finalize(points: Vec<Point>) -> Self {
        Self {
            points,
            completed: Some(true),
        }
    }

    /// Merge the patched fields into a stored record.
    ///
    /// A missing record becomes an object holding just the patched fields.
    pub fn merge_into(&self, record: &mut Value) -> Result<(), RecordError> {
        if record.is_null() {
            *record = Value::Object(serde_json::Map::new());
        }
        let fields = record
            .as_object_mut()
            .ok_or_else(|| RecordError::Malformed("patch target is not an object".to_string()))?;
        let points =
            serde_json::to_value(&self.points).map_err(|e| RecordError::Malformed(e.to_string()))?;
        fields.insert("points".to_string(), points);
        if let Some(completed) = self.completed {
            fields.insert("completed".to_string(), Value::Bool(completed));
        }
        Ok(())
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(input: &str) -> Option<Color> {
    let hex = input.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();

    let (r, g, b, a) = match hex.len() {
        3 => {
            let short = |i: usize| channel(i..i + 1).map(|v| v * 17);
            (short(0)?, short(1)?, short(2)?, 255)
        }
        6 => (channel(0..2)?, channel(2..4)?, channel(4..6)?, 255),
        8 => (channel(0..2)?, channel(2..4)?, channel(4..6)?, channel(6..8)?),
        _ => return None,
    };
    Some(Color::from_rgba8(r, g, b, a))
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
