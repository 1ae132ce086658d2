//! Renderer trait abstraction.

use kurbo::Size;
use peniko::Color;
use sketchroom_core::input::CursorIndicator;
use sketchroom_core::stroke_map::StrokeMap;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),
    #[error("Render failed: {0}")]
    RenderFailed(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// Strokes to draw, in render order.
    pub strokes: &'a StrokeMap,
    /// Viewport size in logical pixels.
    pub viewport_size: Size,
    /// Device pixel ratio (for HiDPI).
    pub scale_factor: f64,
    /// Fill behind the strokes. `None` leaves the surface transparent.
    pub background_color: Option<Color>,
    /// Pointer indicator drawn over the strokes.
    pub cursor: Option<&'a CursorIndicator>,
}

impl<'a> RenderContext<'a> {
    /// Create a new render context.
    pub fn new(strokes: &'a StrokeMap, viewport_size: Size) -> Self {
        Self {
            strokes,
            viewport_size,
            scale_factor: 1.0,
            background_color: None,
            cursor: None,
        }
    }

    /// Set the scale factor for HiDPI.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Set the background color.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = Some(color);
        self
    }

    /// Draw the cursor indicator.
    pub fn with_cursor(mut self, cursor: &'a CursorIndicator) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Something that can draw a stroke map onto a surface.
pub trait Renderer {
    /// Match the surface to a logical size and device scale.
    fn resize(&mut self, size: Size, scale_factor: f64) -> RenderResult<()>;

    /// Clear the surface and draw every stroke in `ctx`.
    fn render(&mut self, ctx: &RenderContext<'_>) -> RenderResult<()>;
}

/// Straight (non-premultiplied) RGBA pixels of a rendered surface.
#[derive(Debug, Clone)]
pub struct RgbaImage {
    /// RGBA pixel data (4 bytes per pixel).
    pub rgba_data: Vec<u8>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl RgbaImage {
    /// Encode as PNG bytes.
    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        let mut png_data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png_data, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);

            let mut writer = encoder
                .write_header()
                .map_err(|e| RendererError::Encode(format!("PNG header: {}", e)))?;
            writer
                .write_image_data(&self.rgba_data)
                .map_err(|e| RendererError::Encode(format!("PNG data: {}", e)))?;
        }
        Ok(png_data)
    }
}
