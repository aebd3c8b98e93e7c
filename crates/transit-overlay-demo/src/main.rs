//! Headless driver for the transit overlay.
//!
//! Runs the overlay against an in-process map host for a simulated duration:
//! a synthetic fleet streams through the entity feed, the camera orbits the
//! map center, a click selects whatever sits there, and the GPU context is
//! lost and restored once halfway through. Lifecycle statistics are logged
//! at the end.

mod fleet;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use glam::{Vec2, Vec3};
use transit_overlay::{
    EntityRecord, FrameOutcome, HeadlessHost, MapHost, Overlay, OverlayConfig, RouteTable, feed,
};

use crate::fleet::Fleet;

/// Orbit radius of the demo camera, in host units.
const ORBIT_RADIUS: f32 = 120.0;
/// Height of the demo camera above the ground plane.
const ORBIT_HEIGHT: f32 = 80.0;
/// Orbit angular speed in radians per second.
const ORBIT_RATE: f32 = 0.2;
/// Simulated seconds between fleet membership changes.
const ROTATE_EVERY_SECS: f64 = 2.0;
/// Frames the context stays lost during the outage.
const OUTAGE_FRAMES: u32 = 10;

#[derive(Parser)]
#[command(about = "Run the transit overlay against a headless map host")]
struct CliArgs {
    /// Number of vehicles in the synthetic fleet.
    #[arg(long, default_value_t = 24)]
    vehicles: usize,

    /// Simulated duration in seconds.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// Simulated host frame rate.
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Seed for the synthetic fleet and vehicle decoration.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Overlay config as JSON; defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial entity snapshot as a JSON array, replacing the synthetic fleet.
    #[arg(long)]
    entities: Option<PathBuf>,

    /// Viewport size as WIDTHxHEIGHT.
    #[arg(long, default_value = "1280x720", value_parser = parse_viewport)]
    viewport: (u32, u32),
}

fn parse_viewport(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let width = w.parse::<u32>().map_err(|e| format!("invalid width: {e}"))?;
    let height = h.parse::<u32>().map_err(|e| format!("invalid height: {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("viewport must be non-empty, got {s}"));
    }
    Ok((width, height))
}

#[derive(Debug, Default)]
struct Stats {
    frames_drawn: u64,
    frames_skipped: u64,
    ticks: u64,
    wraps: usize,
    peak_objects: usize,
}

fn load_config(args: &CliArgs) -> Result<OverlayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => OverlayConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => OverlayConfig::default(),
    };
    if args.config.is_none() {
        config.decoration_seed = args.seed;
    }
    Ok(config)
}

fn load_entities(path: &Path) -> Result<Vec<EntityRecord>, Box<dyn std::error::Error>> {
    let records: Vec<EntityRecord> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    tracing::info!(count = records.len(), path = %path.display(), "loaded entity snapshot");
    Ok(records)
}

fn camera(elapsed: f32, aspect: f32) -> Vec<f32> {
    let angle = elapsed * ORBIT_RATE;
    let eye = Vec3::new(
        angle.cos() * ORBIT_RADIUS,
        angle.sin() * ORBIT_RADIUS,
        ORBIT_HEIGHT,
    );
    HeadlessHost::camera_matrix(eye, Vec3::ZERO, aspect)
        .to_cols_array()
        .to_vec()
}

fn run(args: &CliArgs) -> Result<Stats, Box<dyn std::error::Error>> {
    let config = load_config(args)?;
    let routes = RouteTable::builtin(config.segments_per_edge);
    let mut fleet = Fleet::new(args.seed, args.vehicles, config.free_roam_bounds);
    let static_entities = args.entities.as_deref().map(load_entities).transpose()?;

    let (tx, rx) = feed::channel();
    let mut overlay = Overlay::new(config, routes)?.with_feed(rx);
    overlay.on_select(|id| match id {
        Some(id) => tracing::info!(%id, "vehicle selected"),
        None => tracing::info!("selection cleared"),
    });

    let mut host = HeadlessHost::new();
    overlay.attach(&mut host);
    let (width, height) = args.viewport;
    overlay.resize(&mut host, width, height);
    let aspect = width as f32 / height as f32;

    tx.push(static_entities.unwrap_or_else(|| fleet.snapshot()))?;

    let fps = args.fps.max(1);
    let frame = Duration::from_secs(1) / fps;
    let total_frames = (args.seconds.max(0.0) * f64::from(fps)) as u64;
    let rotate_every = (ROTATE_EVERY_SECS * f64::from(fps)) as u64;
    let click_at = total_frames / 3;
    let outage_at = total_frames / 2;
    let dt = frame.as_secs_f32();

    let mut stats = Stats::default();
    for index in 0..total_frames {
        let elapsed = index as f32 * dt;

        for timer in host.advance(frame) {
            if let Some(report) = overlay.on_timer(&mut host, timer) {
                stats.ticks += 1;
                stats.wraps += report.wrapped;
            }
        }

        if args.entities.is_none() && rotate_every > 0 && index > 0 && index % rotate_every == 0 {
            fleet.rotate();
            tx.push(fleet.snapshot())?;
        }

        if index == outage_at {
            tracing::warn!("simulating gpu context loss");
            host.gpu().lose_context();
        }
        if index == outage_at + u64::from(OUTAGE_FRAMES) {
            tracing::info!("restoring gpu context");
            host.gpu().restore_context();
        }

        let matrix = camera(elapsed, aspect);
        match overlay.render_frame(&mut host, &matrix, dt) {
            FrameOutcome::Drawn { objects, .. } => {
                stats.frames_drawn += 1;
                stats.peak_objects = stats.peak_objects.max(objects);
            }
            FrameOutcome::Skipped(reason) => {
                tracing::debug!(?reason, index, "frame skipped");
                stats.frames_skipped += 1;
            }
            FrameOutcome::Detached => break,
        }

        overlay.pointer_move(&mut host, Vec2::ZERO);
        if index == click_at {
            overlay.pointer_click(&mut host, Vec2::ZERO);
        }
    }

    tracing::info!(
        draw_calls = host.gpu().draw_calls(),
        label_draws = host.gpu().label_draws(),
        allocations = host.gpu().allocations(),
        in_place_updates = host.gpu().updates(),
        repaints = host.repaint_requests(),
        "gpu activity"
    );

    overlay.teardown(&mut host);
    let leaked = host.gpu().live_resources();
    if leaked > 0 || host.active_timers() > 0 {
        tracing::warn!(leaked, timers = host.active_timers(), "resources outlived teardown");
    }
    Ok(stats)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let args = CliArgs::parse();
    tracing::info!(
        vehicles = args.vehicles,
        seconds = args.seconds,
        fps = args.fps,
        seed = args.seed,
        "starting headless run"
    );

    let stats = run(&args)?;
    tracing::info!(
        frames_drawn = stats.frames_drawn,
        frames_skipped = stats.frames_skipped,
        ticks = stats.ticks,
        wraps = stats.wraps,
        peak_objects = stats.peak_objects,
        "run complete"
    );
    Ok(())
}
