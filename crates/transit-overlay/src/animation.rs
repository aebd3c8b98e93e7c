//! Fixed-cadence motion updates.
//!
//! Motion advances on a host timer (100 ms by default), not per rendered
//! frame, so movement speed does not depend on the host's frame rate.

use std::time::Duration;

use crate::bridge::{MapHost, TimerId};
use crate::coords::{GeoBounds, GeoPoint};
use crate::entity::{Entity, Motion};

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entities whose motion state changed.
    pub advanced: usize,
    /// Route-bound entities that wrapped past the end of their route.
    pub wrapped: usize,
    /// Free-roaming entities stopped at the bounds.
    pub clamped: usize,
}

/// Progress this close below a whole lap counts as completing it.
///
/// Repeated `speed * dt` steps accumulate rounding error, so a lap that
/// should end exactly at 1.0 can land a few ulps short.
const WRAP_TOLERANCE: f64 = 1e-9;

/// Advance normalized route progress, wrapping modulo 1.
///
/// Returns the new progress and the number of wraps.
pub fn advance_route_progress(progress: f64, speed: f64, dt: f64) -> (f64, u32) {
    let raw = progress + speed * dt;
    if !raw.is_finite() {
        return (progress, 0);
    }
    let wraps = (raw + WRAP_TOLERANCE).floor();
    ((raw - wraps).max(0.0), wraps.max(0.0) as u32)
}

/// Move `step` degrees along a compass heading, then clamp into `bounds`.
///
/// Returns the new position and whether the clamp changed it.
pub fn advance_free_roam(position: GeoPoint, heading: f64, step: f64, bounds: &GeoBounds) -> (GeoPoint, bool) {
    let radians = heading.to_radians();
    let moved = GeoPoint::new(
        position.lng + step * radians.sin(),
        position.lat + step * radians.cos(),
    );
    if !moved.is_finite() {
        return (position, false);
    }
    let clamped = bounds.clamp(moved);
    (clamped, clamped != moved)
}

/// Owns the periodic timer and applies motion on each tick.
#[derive(Debug)]
pub struct AnimationController {
    interval: Duration,
    bounds: GeoBounds,
    timer: Option<TimerId>,
}

impl AnimationController {
    pub fn new(interval: Duration, bounds: GeoBounds) -> Self {
        Self {
            interval,
            bounds,
            timer: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Whether `timer` is the one this controller registered.
    pub fn owns_timer(&self, timer: TimerId) -> bool {
        self.timer == Some(timer)
    }

    /// Register the periodic timer with the host. Idempotent.
    pub fn start<H: MapHost + ?Sized>(&mut self, host: &mut H) -> TimerId {
        if let Some(timer) = self.timer {
            return timer;
        }
        let timer = host.set_interval(self.interval);
        tracing::info!(?timer, interval_ms = self.interval.as_millis() as u64, "animation started");
        self.timer = Some(timer);
        timer
    }

    /// Cancel the periodic timer. Later ticks are ignored.
    pub fn stop<H: MapHost + ?Sized>(&mut self, host: &mut H) {
        if let Some(timer) = self.timer.take() {
            host.clear_interval(timer);
            tracing::info!(?timer, "animation stopped");
        }
    }

    /// Apply one tick of `dt` seconds to every moving entity.
    ///
    /// Entities with `moving == false` are never touched.
    pub fn tick<'e, I>(&self, entities: I, dt: f64) -> TickReport
    where
        I: IntoIterator<Item = &'e mut Entity>,
    {
        let mut report = TickReport::default();
        if !self.is_running() {
            tracing::debug!("ignoring tick while stopped");
            return report;
        }

        for entity in entities {
            if !entity.moving {
                continue;
            }
            match &mut entity.motion {
                Motion::RouteBound { progress, laps, .. } => {
                    let (next, wraps) = advance_route_progress(*progress, entity.speed, dt);
                    *progress = next;
                    if wraps > 0 {
                        *laps = laps.saturating_add(wraps);
                        report.wrapped += 1;
                    }
                }
                Motion::FreeRoam { position, heading } => {
                    let (next, clamped) = advance_free_roam(*position, *heading, entity.speed, &self.bounds);
                    *position = next;
                    if clamped {
                        report.clamped += 1;
                    }
                }
            }
            report.advanced += 1;
        }
        report
    }
}
