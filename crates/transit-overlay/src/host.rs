//! In-process map host.
//!
//! [`HeadlessHost`] stands in for a real map renderer: it owns a
//! [`HeadlessGpu`], keeps a timer table driven by simulated time and records
//! repaint requests. The demo binary and the tests run the overlay against it.

use std::time::Duration;

use glam::{Mat4, Vec3};

use crate::bridge::{MapHost, TimerId};
use crate::gpu::HeadlessGpu;

/// Vertical field of view of [`HeadlessHost::camera_matrix`].
const CAMERA_FOV_Y: f32 = std::f32::consts::FRAC_PI_4;

#[derive(Debug, Clone, Copy)]
struct Timer {
    id: TimerId,
    interval: Duration,
    /// Time accumulated since the timer last fired.
    elapsed: Duration,
}

/// A [`MapHost`] with no window, driven by explicit time steps.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    gpu: HeadlessGpu,
    access_token: Option<String>,
    timers: Vec<Timer>,
    next_timer: u64,
    repaint_requested: bool,
    repaint_requests: u64,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance simulated time and return the timers that fired, in order.
    ///
    /// A timer fires once per whole interval elapsed, so a long step can fire
    /// the same timer several times.
    pub fn advance(&mut self, dt: Duration) -> Vec<TimerId> {
        let mut fired = Vec::new();
        for timer in &mut self.timers {
            timer.elapsed += dt;
            while timer.elapsed >= timer.interval {
                timer.elapsed -= timer.interval;
                fired.push(timer.id);
            }
        }
        fired
    }

    /// Token passed in by [`MapHost::configure`].
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    /// Whether a repaint was requested since the last call; clears the flag.
    pub fn take_repaint_request(&mut self) -> bool {
        std::mem::take(&mut self.repaint_requested)
    }

    /// Total repaint requests received.
    pub fn repaint_requests(&self) -> u64 {
        self.repaint_requests
    }

    /// A perspective view-projection in the host frame (Z up), looking from
    /// `eye` at `target`, as a real map would pass per frame.
    pub fn camera_matrix(eye: Vec3, target: Vec3, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(eye, target, Vec3::Z);
        let projection = Mat4::perspective_rh_gl(CAMERA_FOV_Y, aspect, 0.1, 100_000.0);
        projection * view
    }
}

impl MapHost for HeadlessHost {
    type Gpu = HeadlessGpu;

    fn gpu(&mut self) -> &mut HeadlessGpu {
        &mut self.gpu
    }

    fn configure(&mut self, access_token: Option<&str>) {
        self.access_token = access_token.map(str::to_string);
    }

    fn request_repaint(&mut self) {
        self.repaint_requested = true;
        self.repaint_requests += 1;
    }

    fn set_interval(&mut self, interval: Duration) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        // A zero interval would fire forever within one advance.
        let interval = interval.max(Duration::from_millis(1));
        self.timers.push(Timer {
            id,
            interval,
            elapsed: Duration::ZERO,
        });
        id
    }

    fn clear_interval(&mut self, timer: TimerId) {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != timer);
        if self.timers.len() == before {
            tracing::warn!(?timer, "clearing unknown timer");
        }
    }
}
