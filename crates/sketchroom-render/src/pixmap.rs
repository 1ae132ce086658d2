//! CPU renderer drawing into a tiny-skia pixmap.

use crate::renderer::{RenderContext, RenderResult, Renderer, RendererError, RgbaImage};
use kurbo::{BezPath, PathEl, Size};
use peniko::Color;
use sketchroom_core::input::{CursorIndicator, CursorStyle};
use sketchroom_core::stroke::{PaintMode, Stroke, parse_hex_color};
use sketchroom_core::stroke_map::StrokeMap;
use tiny_skia::{
    BlendMode, Color as SkiaColor, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap,
    Stroke as SkiaStroke, Transform,
};

/// Outline width of the eraser cursor ring.
const CURSOR_RING_WIDTH: f32 = 1.5;

/// Draws stroke maps into an in-memory RGBA surface.
///
/// The surface holds `floor(width * scale) x floor(height * scale)` device
/// pixels; strokes are given in logical pixels and scaled on the way in.
pub struct PixmapRenderer {
    pixmap: Pixmap,
    logical_size: Size,
    scale_factor: f64,
}

impl PixmapRenderer {
    pub fn new(size: Size, scale_factor: f64) -> RenderResult<Self> {
        let scale_factor = sanitize_scale(scale_factor);
        Ok(Self {
            pixmap: allocate(size, scale_factor)?,
            logical_size: size,
            scale_factor,
        })
    }

    pub fn logical_size(&self) -> Size {
        self.logical_size
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Device pixel dimensions.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    /// Resize the surface and redraw `strokes` at the new resolution.
    pub fn resize_and_redraw(&mut self, size: Size, scale_factor: f64, strokes: &StrokeMap) -> RenderResult<()> {
        self.resize(size, scale_factor)?;
        self.redraw(strokes);
        Ok(())
    }

    /// Clear to transparent and draw every stroke in order.
    pub fn redraw(&mut self, strokes: &StrokeMap) {
        self.pixmap.fill(SkiaColor::TRANSPARENT);
        let transform = self.transform();
        for (_, stroke) in strokes.iter() {
            draw_stroke(&mut self.pixmap, stroke, transform);
        }
    }

    /// Straight-alpha RGBA at a device pixel, or `None` out of bounds.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let pixel = self.pixmap.pixel(x, y)?.demultiply();
        Some([pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()])
    }

    /// Copy of the surface as straight-alpha RGBA.
    pub fn to_rgba(&self) -> RgbaImage {
        let rgba_data = self
            .pixmap
            .pixels()
            .iter()
            .flat_map(|pixel| {
                let c = pixel.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();
        RgbaImage {
            rgba_data,
            width: self.pixmap.width(),
            height: self.pixmap.height(),
        }
    }

    /// Encode the surface as PNG.
    pub fn to_png(&self) -> RenderResult<Vec<u8>> {
        self.to_rgba().encode_png()
    }

    fn transform(&self) -> Transform {
        let scale = self.scale_factor as f32;
        Transform::from_scale(scale, scale)
    }
}

impl Renderer for PixmapRenderer {
    fn resize(&mut self, size: Size, scale_factor: f64) -> RenderResult<()> {
        let scale_factor = sanitize_scale(scale_factor);
        if size == self.logical_size && scale_factor == self.scale_factor {
            return Ok(());
        }
        self.pixmap = allocate(size, scale_factor)?;
        self.logical_size = size;
        self.scale_factor = scale_factor;
        log::debug!(
            "Resized surface to {}x{} px",
            self.pixmap.width(),
            self.pixmap.height()
        );
        Ok(())
    }

    fn render(&mut self, ctx: &RenderContext<'_>) -> RenderResult<()> {
        self.resize(ctx.viewport_size, ctx.scale_factor)?;
        self.redraw(ctx.strokes);

        if let Some(background) = ctx.background_color {
            // Painted underneath so eraser strokes reveal it.
            let mut under = Pixmap::new(self.pixmap.width(), self.pixmap.height())
                .ok_or_else(|| RendererError::RenderFailed("background allocation".to_string()))?;
            under.fill(to_skia(background));
            under.draw_pixmap(
                0,
                0,
                self.pixmap.as_ref(),
                &tiny_skia::PixmapPaint::default(),
                Transform::identity(),
                None,
            );
            self.pixmap = under;
        }

        if let Some(cursor) = ctx.cursor {
            let transform = self.transform();
            draw_cursor(&mut self.pixmap, cursor, transform);
        }
        Ok(())
    }
}

fn sanitize_scale(scale_factor: f64) -> f64 {
    if scale_factor.is_finite() && scale_factor > 0.0 {
        scale_factor
    } else {
        1.0
    }
}

/// Allocate a pixmap for the logical size. Degenerate sizes get one pixel.
fn allocate(size: Size, scale_factor: f64) -> RenderResult<Pixmap> {
    let width = device_pixels(size.width, scale_factor);
    let height = device_pixels(size.height, scale_factor);
    Pixmap::new(width, height)
        .ok_or_else(|| RendererError::InitFailed(format!("cannot allocate {}x{} pixmap", width, height)))
}

fn device_pixels(logical: f64, scale_factor: f64) -> u32 {
    let pixels = (logical * scale_factor).floor();
    if pixels.is_finite() && pixels >= 1.0 {
        pixels.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

fn draw_stroke(pixmap: &mut Pixmap, stroke: &Stroke, transform: Transform) {
    let mut paint = Paint::default();
    paint.anti_alias = true;
    match stroke.paint_mode() {
        PaintMode::Paint(color) => paint.set_color(to_skia(color)),
        PaintMode::Erase => {
            paint.set_color(SkiaColor::BLACK);
            paint.blend_mode = BlendMode::DestinationOut;
        }
    }

    let width = stroke.width() as f32;
    match stroke.points.as_slice() {
        [] => {}
        [dot] => {
            // A lone point renders as a disc of the stroke width.
            if let Some(circle) = PathBuilder::from_circle(dot.x as f32, dot.y as f32, width / 2.0) {
                pixmap.fill_path(&circle, &paint, FillRule::Winding, transform, None);
            }
        }
        _ => {
            let Some(path) = build_path(&stroke.to_path()) else {
                return;
            };
            let line = SkiaStroke {
                width,
                line_cap: LineCap::Round,
                line_join: LineJoin::Round,
                ..SkiaStroke::default()
            };
            pixmap.stroke_path(&path, &paint, &line, transform, None);
        }
    }
}

fn draw_cursor(pixmap: &mut Pixmap, cursor: &CursorIndicator, transform: Transform) {
    if !cursor.visible {
        return;
    }
    let radius = (cursor.diameter / 2.0) as f32;
    let Some(circle) = PathBuilder::from_circle(cursor.position.x as f32, cursor.position.y as f32, radius) else {
        return;
    };

    let mut paint = Paint::default();
    paint.anti_alias = true;
    match &cursor.style {
        CursorStyle::Paint { color } => {
            paint.set_color(to_skia(parse_hex_color(color).unwrap_or(Color::BLACK)));
            pixmap.fill_path(&circle, &paint, FillRule::Winding, transform, None);
        }
        CursorStyle::Eraser => {
            paint.set_color_rgba8(90, 90, 90, 255);
            let ring = SkiaStroke {
                width: CURSOR_RING_WIDTH,
                ..SkiaStroke::default()
            };
            pixmap.stroke_path(&circle, &paint, &ring, transform, None);
        }
    }
}

fn build_path(path: &BezPath) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();

    for element in path.elements() {
        match *element {
            PathEl::MoveTo(p) => builder.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => builder.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(c, p) => builder.quad_to(c.x as f32, c.y as f32, p.x as f32, p.y as f32),
            PathEl::CurveTo(c1, c2, p) => builder.cubic_to(
                c1.x as f32,
                c1.y as f32,
                c2.x as f32,
                c2.y as f32,
                p.x as f32,
                p.y as f32,
            ),
            PathEl::ClosePath => builder.close(),
        }
    }

    builder.finish()
}

fn to_skia(color: Color) -> SkiaColor {
    let rgba = color.to_rgba8();
    SkiaColor::from_rgba8(rgba.r, rgba.g, rgba.b, rgba.a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use sketchroom_core::stroke::{Brush, StrokeId};

    fn line(id: &str, from: Point, to: Point, size: f64, eraser: bool, color: &str) -> (StrokeId, Stroke) {
        let brush = Brush {
            color: color.to_string(),
            size,
            eraser,
        };
        let mut stroke = Stroke::begin("me", &brush, 0, from);
        stroke.points.push(to);
        (StrokeId::from(id), stroke)
    }

    fn map(strokes: Vec<(StrokeId, Stroke)>) -> StrokeMap {
        let mut map = StrokeMap::new();
        for (id, stroke) in strokes {
            map.upsert(id, stroke);
        }
        map
    }

    #[test]
    fn test_segment_paints_pixels() {
        let strokes = map(vec![line("a", Point::new(0.0, 10.0), Point::new(20.0, 10.0), 4.0, false, "#ff0000")]);
        let mut renderer = PixmapRenderer::new(Size::new(32.0, 32.0), 1.0).unwrap();
        renderer.redraw(&strokes);

        assert_eq!(renderer.pixel_at(10, 10), Some([255, 0, 0, 255]));
        assert_eq!(renderer.pixel_at(10, 25).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_eraser_removes_pixels() {
        let strokes = map(vec![
            line("a", Point::new(0.0, 10.0), Point::new(30.0, 10.0), 8.0, false, "#000000"),
            line("b", Point::new(10.0, 0.0), Point::new(10.0, 30.0), 6.0, true, "#000000"),
        ]);
        let mut renderer = PixmapRenderer::new(Size::new(32.0, 32.0), 1.0).unwrap();
        renderer.redraw(&strokes);

        assert_eq!(renderer.pixel_at(10, 10).map(|p| p[3]), Some(0));
        assert_eq!(renderer.pixel_at(25, 10).map(|p| p[3]), Some(255));
    }

    #[test]
    fn test_resize_scales_to_device_pixels() {
        let mut stroke = Stroke::begin("me", &Brush::default(), 0, Point::new(5.0, 5.0));
        stroke.size = 4.0;
        let strokes = map(vec![(StrokeId::from("a"), stroke)]);

        let mut renderer = PixmapRenderer::new(Size::new(20.0, 20.0), 1.0).unwrap();
        renderer.resize_and_redraw(Size::new(20.5, 20.0), 2.0, &strokes).unwrap();

        assert_eq!(renderer.pixel_size(), (41, 40));
        assert_eq!(renderer.pixel_at(10, 10).map(|p| p[3]), Some(255));
        assert_eq!(renderer.pixel_at(5, 5).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_empty_map_is_transparent() {
        let mut renderer = PixmapRenderer::new(Size::new(8.0, 8.0), 1.0).unwrap();
        renderer.redraw(&StrokeMap::new());
        let image = renderer.to_rgba();
        assert_eq!(image.rgba_data.len(), 8 * 8 * 4);
        assert!(image.rgba_data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_redraw_replaces_previous_frame() {
        let strokes = map(vec![line("a", Point::new(0.0, 4.0), Point::new(16.0, 4.0), 4.0, false, "#000")]);
        let mut renderer = PixmapRenderer::new(Size::new(16.0, 16.0), 1.0).unwrap();
        renderer.redraw(&strokes);
        assert_eq!(renderer.pixel_at(8, 4).map(|p| p[3]), Some(255));

        renderer.redraw(&StrokeMap::new());
        assert_eq!(renderer.pixel_at(8, 4).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_render_with_background_shows_through_eraser() {
        let strokes = map(vec![
            line("a", Point::new(0.0, 8.0), Point::new(16.0, 8.0), 6.0, false, "#000000"),
            line("b", Point::new(8.0, 0.0), Point::new(8.0, 16.0), 4.0, true, "#000000"),
        ]);
        let mut renderer = PixmapRenderer::new(Size::new(16.0, 16.0), 1.0).unwrap();
        let ctx = RenderContext::new(&strokes, Size::new(16.0, 16.0)).with_background(Color::WHITE);
        renderer.render(&ctx).unwrap();

        assert_eq!(renderer.pixel_at(8, 8), Some([255, 255, 255, 255]));
        assert_eq!(renderer.pixel_at(2, 8), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_paint_cursor_is_filled_disc() {
        let mut cursor = CursorIndicator::default();
        let brush = Brush {
            color: "#00ff00".to_string(),
            size: 10.0,
            eraser: false,
        };
        cursor.show(Point::new(10.0, 10.0), &brush);

        let strokes = StrokeMap::new();
        let mut renderer = PixmapRenderer::new(Size::new(20.0, 20.0), 1.0).unwrap();
        renderer
            .render(&RenderContext::new(&strokes, Size::new(20.0, 20.0)).with_cursor(&cursor))
            .unwrap();

        assert_eq!(renderer.pixel_at(10, 10), Some([0, 255, 0, 255]));
        assert_eq!(renderer.pixel_at(1, 1).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_eraser_cursor_is_ring_over_strokes() {
        let mut cursor = CursorIndicator::default();
        let brush = Brush {
            eraser: true,
            size: 20.0,
            ..Brush::default()
        };
        cursor.show(Point::new(16.5, 16.5), &brush);
        let strokes = map(vec![line("a", Point::new(0.0, 16.0), Point::new(32.0, 16.0), 4.0, false, "#ff0000")]);

        let mut renderer = PixmapRenderer::new(Size::new(32.0, 32.0), 1.0).unwrap();
        let ctx = RenderContext::new(&strokes, Size::new(32.0, 32.0))
            .with_background(Color::WHITE)
            .with_cursor(&cursor);
        renderer.render(&ctx).unwrap();

        // The ring is drawn; the stroke under its center is untouched.
        assert_eq!(renderer.pixel_at(16, 16), Some([255, 0, 0, 255]));
        let ring = renderer.pixel_at(16, 6).unwrap();
        assert_eq!(ring[3], 255);
        assert!(ring[0] < 128 && ring[0] == ring[1] && ring[1] == ring[2]);
        assert_eq!(renderer.pixel_at(16, 10), Some([255, 255, 255, 255]));

        cursor.hide();
        renderer
            .render(&RenderContext::new(&strokes, Size::new(32.0, 32.0)).with_cursor(&cursor))
            .unwrap();
        assert_eq!(renderer.pixel_at(16, 6).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_degenerate_size_still_allocates() {
        let renderer = PixmapRenderer::new(Size::new(0.0, 0.0), f64::NAN).unwrap();
        assert_eq!(renderer.pixel_size(), (1, 1));
        assert_eq!(renderer.scale_factor(), 1.0);
    }

    #[test]
    fn test_png_export() {
        let renderer = PixmapRenderer::new(Size::new(4.0, 4.0), 1.0).unwrap();
        let png = renderer.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
