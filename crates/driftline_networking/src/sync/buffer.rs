//! # Snapshot Interpolation Buffer
//!
//! Time-ordered bodies in client-local time, sampled at a delayed render
//! time.
//!
//! ```text
//!   oldest                                newest
//!     │──────┬──────┬──────┬──────┬─────────│ · · · ▶ extrapolate (capped)
//!  clamp     a  Tq  b
//!            └──┬───┘
//!      Hermite position, pre-integrated slerp orientation
//! ```

use std::collections::VecDeque;

use driftline_shared::{BodyState, Vec3};

/// One buffered body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferedState {
    /// Client-local time.
    pub time: f64,
    /// Body in the current local frame.
    pub body: BodyState,
}

/// Bounded, strictly time-ordered snapshot history.
#[derive(Clone, Debug)]
pub struct InterpolationBuffer {
    nodes: VecDeque<BufferedState>,
    window: f64,
}

impl InterpolationBuffer {
    /// Creates a buffer keeping roughly `window` seconds of history.
    #[must_use]
    pub fn new(window: f32) -> Self {
        let window = if window.is_finite() { window.max(0.1) } else { 1.0 };
        Self {
            nodes: VecDeque::new(),
            window: f64::from(window),
        }
    }

    /// Number of buffered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Oldest node.
    #[must_use]
    pub fn oldest(&self) -> Option<&BufferedState> {
        self.nodes.front()
    }

    /// Newest node.
    #[must_use]
    pub fn latest(&self) -> Option<&BufferedState> {
        self.nodes.back()
    }

    /// Appends a body. Refused unless `time` is after the newest node.
    pub fn push(&mut self, time: f64, body: BodyState) -> bool {
        if !time.is_finite() || self.nodes.back().is_some_and(|last| time <= last.time) {
            return false;
        }
        self.nodes.push_back(BufferedState { time, body });
        // Keep one node at or before the window edge so it can still bracket.
        while self.nodes.len() > 2 && time - self.nodes[1].time >= self.window {
            self.nodes.pop_front();
        }
        true
    }

    /// Replaces the history with a single node.
    pub fn reset_to(&mut self, time: f64, body: BodyState) {
        self.nodes.clear();
        self.nodes.push_back(BufferedState { time, body });
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Rebases every buffered position after an origin shift.
    pub fn shift(&mut self, delta: Vec3) {
        for node in &mut self.nodes {
            node.body.position += delta;
        }
    }

    /// Body at local time `t`; `None` when empty.
    #[must_use]
    pub fn sample(&self, t: f64, max_extrapolation: f32) -> Option<BodyState> {
        let oldest = self.nodes.front()?;
        let newest = self.nodes.back()?;
        if t <= oldest.time {
            return Some(oldest.body);
        }
        if t >= newest.time {
            let ahead = ((t - newest.time) as f32).min(max_extrapolation.max(0.0));
            return Some(newest.body.extrapolated(ahead));
        }

        let i = self.nodes.partition_point(|node| node.time <= t);
        let (a, b) = (&self.nodes[i - 1], &self.nodes[i]);
        let h = (b.time - a.time) as f32;
        let s = ((t - a.time) / (b.time - a.time)) as f32;
        Some(interpolate(&a.body, &b.body, h, s))
    }
}

/// Blends two bodies `h` seconds apart at fraction `s`.
fn interpolate(a: &BodyState, b: &BodyState, h: f32, s: f32) -> BodyState {
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    let position = a.position * h00
        + a.velocity * (h10 * h)
        + b.position * h01
        + b.velocity * (h11 * h);

    // Advance each endpoint toward the query time before blending.
    let from = a.orientation.integrate(a.angular_velocity, s * h);
    let to = b.orientation.integrate(b.angular_velocity, -(1.0 - s) * h);

    BodyState {
        position,
        velocity: a.velocity.lerp(b.velocity, s),
        angular_velocity: a.angular_velocity.lerp(b.angular_velocity, s),
        orientation: from.slerp(to, s),
    }
}
