//! Headless SketchRoom client.
//!
//! `sketchroom snapshot` joins a room through a relay and writes the merged
//! canvas to a PNG. `sketchroom draw` plays a scripted gesture into a room.

use clap::{Parser, Subcommand};
use kurbo::{Point, Size};
use peniko::Color;
use sketchroom_core::config::{ClientConfig, ConfigError};
use sketchroom_core::identity::ClientIdentity;
use sketchroom_core::input::PointerEvent;
use sketchroom_core::store::{ConnectionState, RelayStore, StoreError, StrokeStore};
use sketchroom_core::stroke::parse_hex_color;
use sketchroom_core::stroke_map::StrokeMap;
use sketchroom_core::CollaborationManager;
use sketchroom_render::{PixmapRenderer, RenderContext, Renderer, RendererError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long to wait for the relay handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll period while waiting on the relay.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Simulated time between scripted pointer moves.
const GESTURE_STEP: Duration = Duration::from_millis(8);

#[derive(Debug, Error)]
enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Render error: {0}")]
    Render(#[from] RendererError),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Could not reach relay at {0}")]
    Connect(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} writes were rejected by the relay")]
    Sync(u64),
}

#[derive(Parser, Debug)]
#[command(name = "sketchroom", version, about = "Shared freehand canvas client")]
struct Cli {
    /// Client configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a room's current strokes to a PNG file.
    Snapshot {
        /// Relay WebSocket URL; defaults to the configured one.
        #[arg(long)]
        relay: Option<String>,
        #[arg(long)]
        room: String,
        #[arg(long)]
        out: PathBuf,
        /// Logical canvas width.
        #[arg(long)]
        width: Option<f64>,
        /// Logical canvas height.
        #[arg(long)]
        height: Option<f64>,
        /// Device pixels per logical pixel.
        #[arg(long)]
        scale: Option<f64>,
        /// Hex fill behind the strokes; transparent when omitted.
        #[arg(long, value_parser = parse_background)]
        background: Option<Color>,
        /// How long to collect room events before rendering.
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },
    /// Draw one stroke through the given points.
    Draw {
        #[arg(long)]
        relay: Option<String>,
        #[arg(long)]
        room: String,
        /// Space-separated `x,y` pairs in canvas coordinates.
        #[arg(long, value_parser = parse_points)]
        points: PointList,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        size: Option<f64>,
        #[arg(long)]
        eraser: bool,
        /// How long to let queued writes drain before exiting.
        #[arg(long, default_value_t = 300)]
        wait_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct PointList(Vec<Point>);

fn parse_points(val: &str) -> Result<PointList, String> {
    let points = val
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("expected x,y but got {:?}", pair))?;
            let x: f64 = x.trim().parse().map_err(|_| format!("bad x in {:?}", pair))?;
            let y: f64 = y.trim().parse().map_err(|_| format!("bad y in {:?}", pair))?;
            if !x.is_finite() || !y.is_finite() {
                return Err(format!("non-finite coordinate in {:?}", pair));
            }
            Ok(Point::new(x, y))
        })
        .collect::<Result<Vec<_>, String>>()?;
    if points.is_empty() {
        return Err("at least one point is required".to_string());
    }
    Ok(PointList(points))
}

fn parse_background(val: &str) -> Result<Color, String> {
    parse_hex_color(val).ok_or_else(|| format!("expected a hex color but got {:?}", val))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        eprintln!("sketchroom: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    match cli.command {
        Command::Snapshot {
            relay,
            room,
            out,
            width,
            height,
            scale,
            background,
            wait_ms,
        } => {
            let size = Size::new(
                width.unwrap_or(config.canvas_width),
                height.unwrap_or(config.canvas_height),
            );
            let scale = scale.unwrap_or(config.scale_factor);
            let url = relay.unwrap_or_else(|| config.relay_url.clone());

            let store = connect(&url)?;
            let mut manager = CollaborationManager::new(store, identity(), &config);
            manager.join_room(Some(room.as_str()))?;
            collect_events(&mut manager, Duration::from_millis(wait_ms));

            let png = render_png(manager.strokes(), size, scale, background)?;
            fs::write(&out, png)
                .map_err(|e| AppError::Io(format!("Failed to write {}: {}", out.display(), e)))?;
            log::info!(
                "Wrote {} strokes from room {} to {}",
                manager.strokes().len(),
                room,
                out.display()
            );
            Ok(())
        }
        Command::Draw {
            relay,
            room,
            points,
            color,
            size,
            eraser,
            wait_ms,
        } => {
            let url = relay.unwrap_or_else(|| config.relay_url.clone());
            let store = connect(&url)?;
            let mut manager = CollaborationManager::new(store, identity(), &config);
            manager.join_room(Some(room.as_str()))?;

            if let Some(color) = color {
                if !manager.set_color(&color) {
                    return Err(AppError::InvalidArgument(format!("color {:?}", color)));
                }
            }
            if let Some(size) = size {
                manager.set_size(size);
            }
            if eraser != manager.brush().eraser {
                manager.toggle_eraser();
            }

            play_gesture(&mut manager, &points.0, Instant::now());
            thread::sleep(Duration::from_millis(wait_ms));

            match manager.sync().failed_writes() {
                0 => Ok(()),
                failed => Err(AppError::Sync(failed)),
            }
        }
    }
}

fn identity() -> ClientIdentity {
    ClientIdentity::default_location().unwrap_or_else(|e| {
        log::warn!("Using a temporary client id: {}", e);
        ClientIdentity::ephemeral()
    })
}

/// Open a relay connection and wait for the handshake.
fn connect(url: &str) -> Result<Arc<dyn StrokeStore>, AppError> {
    let store = RelayStore::connect(url)?;
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        match store.state() {
            ConnectionState::Connected => return Ok(Arc::new(store)),
            ConnectionState::Error | ConnectionState::Disconnected => {
                return Err(AppError::Connect(url.to_string()));
            }
            ConnectionState::Connecting if Instant::now() >= deadline => {
                return Err(AppError::Connect(url.to_string()));
            }
            ConnectionState::Connecting => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Merge room events for `duration`.
fn collect_events(manager: &mut CollaborationManager, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        manager.tick(Instant::now());
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Feed a down/move/up gesture through `points`, one step apart.
fn play_gesture(manager: &mut CollaborationManager, points: &[Point], start: Instant) {
    let Some((&first, rest)) = points.split_first() else {
        return;
    };
    let pointer_id = 1;
    let mut now = start;

    manager.pointer_event(PointerEvent::Down { position: first, pointer_id }, now);
    let mut last = first;
    for &position in rest {
        now += GESTURE_STEP;
        manager.pointer_event(PointerEvent::Move { position, pointer_id }, now);
        manager.tick(now);
        last = position;
    }
    manager.pointer_event(PointerEvent::Up { position: last, pointer_id }, now);
}

fn render_png(
    strokes: &StrokeMap,
    size: Size,
    scale: f64,
    background: Option<Color>,
) -> Result<Vec<u8>, AppError> {
    let mut renderer = PixmapRenderer::new(size, scale)?;
    let mut ctx = RenderContext::new(strokes, size).with_scale_factor(scale);
    if let Some(color) = background {
        ctx = ctx.with_background(color);
    }
    renderer.render(&ctx)?;
    Ok(renderer.to_png()?)
}
