//! Exponential moving averages and per-entity scoring statistics.

use driftline_shared::Vec3;

/// Exponential moving average.
///
/// The first sample initializes the value directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ema {
    value: f32,
    alpha: f32,
    initialized: bool,
}

impl Ema {
    /// Creates an empty average with smoothing factor `alpha` in `(0, 1]`.
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() { alpha.clamp(1.0e-3, 1.0) } else { 1.0 };
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    /// Creates an average seeded with `value`.
    #[must_use]
    pub fn with_initial(alpha: f32, value: f32) -> Self {
        let mut ema = Self::new(alpha);
        ema.value = value;
        ema.initialized = true;
        ema
    }

    /// Folds in a sample and returns the new value. Non-finite samples are ignored.
    pub fn update(&mut self, sample: f32) -> f32 {
        if !sample.is_finite() {
            return self.value;
        }
        if self.initialized {
            self.value += self.alpha * (sample - self.value);
        } else {
            self.value = sample;
            self.initialized = true;
        }
        self.value
    }

    /// Current value (0 before the first sample).
    #[inline]
    #[must_use]
    pub const fn value(&self) -> f32 {
        self.value
    }

    /// Whether any sample has been folded in.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// What one connection has learned about one entity.
#[derive(Clone, Debug)]
pub struct EntityStats {
    /// Encoded bytes per update.
    pub bytes: Ema,
    /// Serialization time per update (milliseconds).
    pub serialize_ms: Ema,
    /// Relative acceleration normal to the line of sight (m/s²).
    pub accel_noise: Ema,
    /// Change of relative acceleration (m/s³).
    pub jerk_noise: Ema,
    /// Scheduler tick this entity was last gathered.
    pub last_seen_tick: u64,
    last_relative_velocity: Option<Vec3>,
    last_relative_accel: Option<Vec3>,
}

impl EntityStats {
    /// Creates statistics with the byte cost seeded to `initial_bytes`.
    #[must_use]
    pub fn new(alpha: f32, initial_bytes: f32) -> Self {
        Self {
            bytes: Ema::with_initial(alpha, initial_bytes),
            serialize_ms: Ema::with_initial(alpha, 0.0),
            accel_noise: Ema::new(alpha),
            jerk_noise: Ema::new(alpha),
            last_seen_tick: 0,
            last_relative_velocity: None,
            last_relative_accel: None,
        }
    }

    /// Records one sent update.
    pub fn record_send(&mut self, bytes: usize, serialize_ms: f32) {
        self.bytes.update(bytes as f32);
        self.serialize_ms.update(serialize_ms.max(0.0));
    }

    /// Per-update cost `EMA(bytes) + k·EMA(serialize_ms)`, floored.
    #[must_use]
    pub fn cost(&self, serialize_weight: f32, floor: f32) -> f32 {
        let cost = self.bytes.value() + serialize_weight * self.serialize_ms.value();
        if cost.is_finite() {
            cost.max(floor)
        } else {
            floor
        }
    }

    /// Folds in the relative velocity observed this scheduler tick.
    ///
    /// `line_of_sight` is the unit vector from viewer to entity.
    pub fn observe_motion(&mut self, relative_velocity: Vec3, line_of_sight: Vec3, dt: f32) {
        if dt <= 0.0 || !relative_velocity.is_finite() {
            return;
        }
        if let Some(previous) = self.last_relative_velocity {
            let accel = (relative_velocity - previous) / dt;
            let normal = accel - line_of_sight * accel.dot(line_of_sight);
            self.accel_noise.update(normal.length());
            if let Some(previous_accel) = self.last_relative_accel {
                self.jerk_noise.update((accel - previous_accel).length() / dt);
            }
            self.last_relative_accel = Some(accel);
        }
        self.last_relative_velocity = Some(relative_velocity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_first_sample_initializes() {
        let mut ema = Ema::new(0.5);
        assert!(!ema.is_initialized());
        assert_eq!(ema.update(10.0), 10.0);
        assert_eq!(ema.update(20.0), 15.0);
        assert_eq!(ema.update(f32::NAN), 15.0);
    }

    #[test]
    fn test_cost_floor_and_weight() {
        let mut stats = EntityStats::new(1.0, 89.0);
        assert_eq!(stats.cost(50.0, 32.0), 89.0);
        stats.record_send(10, 0.1);
        assert!((stats.cost(50.0, 0.0) - 15.0).abs() < 1e-4);
        assert_eq!(stats.cost(50.0, 32.0), 32.0);
    }

    #[test]
    fn test_motion_noise() {
        let mut stats = EntityStats::new(1.0, 89.0);
        let los = Vec3::X;
        stats.observe_motion(Vec3::ZERO, los, 0.2);
        assert!(!stats.accel_noise.is_initialized());

        // Sideways velocity change: 2 m/s over 0.2 s
        stats.observe_motion(Vec3::new(0.0, 2.0, 0.0), los, 0.2);
        assert!((stats.accel_noise.value() - 10.0).abs() < 1e-4);

        // Along the line of sight only: no normal component
        stats.observe_motion(Vec3::new(5.0, 2.0, 0.0), los, 0.2);
        assert_eq!(stats.accel_noise.value(), 0.0);
        assert!(stats.jerk_noise.value() > 0.0);
    }
}
