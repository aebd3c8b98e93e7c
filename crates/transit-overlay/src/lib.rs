//! Animated 3D vehicle overlay for a host map renderer.
//!
//! Vehicles are placed by converting geodetic coordinates into a local scene
//! frame, moved along routes on a fixed timer and drawn into the host map's
//! camera projection every frame, sharing the host's GPU context.
//!
//! # Design principles
//!
//! - **Host-agnostic**: the host is reached only through [`MapHost`] and
//!   [`GpuContext`]
//! - **Allocation discipline**: GPU resources are created once per entity and
//!   released when the entity disappears
//! - **Non-fatal failures**: bad entities and bad frames are skipped, never
//!   propagated to the host
//!
//! # Example
//!
//! ```ignore
//! use transit_overlay::{HeadlessHost, Overlay, OverlayConfig, RouteTable};
//!
//! let config = OverlayConfig::default();
//! let routes = RouteTable::builtin(config.segments_per_edge);
//! let mut overlay = Overlay::new(config, routes)?;
//! let mut host = HeadlessHost::new();
//!
//! overlay.attach(&mut host);
//! overlay.push_entities(&mut host, records);
//! for timer in host.advance(std::time::Duration::from_millis(100)) {
//!     overlay.on_timer(&mut host, timer);
//! }
//! overlay.on_frame(&mut host, &camera_matrix);
//! overlay.teardown(&mut host);
//! ```

pub mod animation;
pub mod bearing;
pub mod bridge;
mod color;
pub mod config;
pub mod constants;
pub mod coords;
pub mod entity;
mod error;
pub mod feed;
pub mod gpu;
pub mod host;
pub mod mesh;
mod overlay;
pub mod registry;
pub mod route;
pub mod visual;

pub use animation::{AnimationController, TickReport};
pub use bearing::{bearing, try_bearing};
pub use bridge::{AxisCorrection, FrameOutcome, MapHost, RenderBridge, SkipReason, TimerId};
pub use color::Color;
pub use config::{AccessTokenConfig, OverlayConfig};
pub use coords::{CoordinateTransformer, GeoBounds, GeoPoint};
pub use entity::{Entity, EntityId, EntityRecord, EntityStore, Motion, SnapshotReport};
pub use error::{Error, Result};
pub use feed::{FeedReceiver, FeedSender, Snapshot};
pub use gpu::{GpuContext, HeadlessGpu};
pub use host::HeadlessHost;
pub use overlay::Overlay;
pub use registry::{ReconcileReport, SceneObject, SceneObjectRegistry};
pub use route::{Route, RouteDef, RouteId, RouteTable};
pub use visual::{EntityVisual, ScaleDamping};
