//! SketchRoom Render Library
//!
//! Renderer abstraction and a CPU pixmap implementation that draws stroke
//! maps with round caps and joins, destination-out erasing and HiDPI scaling.

mod pixmap;
mod renderer;

pub use pixmap::PixmapRenderer;
pub use renderer::{RenderContext, RenderResult, Renderer, RendererError, RgbaImage};
