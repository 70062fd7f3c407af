//! Perceptual deadline: how long until a remote copy drifts visibly.
//!
//! The angular error an observer sees after `t` seconds without an update is
//! modelled as
//!
//! ```text
//! θ(t) = 0.5·(a/d)·t² + (v/d + ω)·t
//! ```
//!
//! where `v` is relative tangential speed, `a` relative normal acceleration,
//! `ω` relative angular rate and `d` separation. The deadline is the first
//! `t` with `θ(t) = θ0`.

/// Below this, acceleration is treated as zero and the equation as linear.
const LINEAR_EPSILON: f32 = 1.0e-6;

/// Separation floor; keeps `v/d` finite for coincident entities.
const MIN_DISTANCE: f32 = 1.0e-3;

/// Solver parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerceptualDeadline {
    /// Perceptibility threshold θ0 (radians).
    pub threshold: f32,
    /// Shortest deadline returned (seconds).
    pub min: f32,
    /// Longest deadline returned (seconds).
    pub max: f32,
}

impl Default for PerceptualDeadline {
    fn default() -> Self {
        Self {
            threshold: 0.002,
            min: 0.05,
            max: 2.0,
        }
    }
}

impl PerceptualDeadline {
    /// Creates a solver.
    #[must_use]
    pub const fn new(threshold: f32, min: f32, max: f32) -> Self {
        Self {
            threshold,
            min,
            max,
        }
    }

    /// Clamped bounds `(min, max)` with `0 < min <= max`.
    fn bounds(&self) -> (f32, f32) {
        let min = if self.min.is_finite() { self.min.max(1.0e-3) } else { 1.0e-3 };
        let max = if self.max.is_finite() { self.max.max(min) } else { min };
        (min, max)
    }

    /// Smallest positive root, clamped to `[min, max]`.
    ///
    /// Rates are taken by magnitude. Zero relative motion yields `max`.
    #[must_use]
    pub fn solve(&self, tangential_speed: f32, normal_accel: f32, angular_rate: f32, distance: f32) -> f32 {
        let (min, max) = self.bounds();
        let theta0 = self.threshold;
        if !theta0.is_finite() || theta0 <= 0.0 {
            return min;
        }

        let d = if distance.is_finite() { distance.max(MIN_DISTANCE) } else { return max };
        let sanitize = |x: f32| if x.is_finite() { x.abs() } else { 0.0 };
        let a = 0.5 * sanitize(normal_accel) / d;
        let b = sanitize(tangential_speed) / d + sanitize(angular_rate);

        let t = if a < LINEAR_EPSILON {
            if b < LINEAR_EPSILON {
                return max;
            }
            theta0 / b
        } else {
            // a·t² + b·t − θ0 = 0 with a, θ0 > 0: one positive root.
            // Rationalised form avoids cancellation when b² ≫ a·θ0.
            let disc = b.mul_add(b, 4.0 * a * theta0);
            2.0 * theta0 / (b + disc.sqrt())
        };

        t.clamp(min, max)
    }
}

/// `clamp(since_update / deadline, 0, 1)`.
///
/// A non-positive deadline means the link is always due.
#[inline]
#[must_use]
pub fn urgency(since_update: f32, deadline: f32) -> f32 {
    if deadline <= 0.0 || !deadline.is_finite() {
        return 1.0;
    }
    (since_update / deadline).clamp(0.0, 1.0)
}
