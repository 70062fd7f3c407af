//! Wandering control input for simulated ships.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded pilot that drifts toward a new random intent every few seconds.
///
/// Output follows the [`Flight`](crate::flight::Flight) control layout:
/// axes `[thrust, strafe, lift, roll]`, look `[yaw, pitch]`.
#[derive(Clone, Debug)]
pub struct WanderPilot {
    rng: ChaCha8Rng,
    axes: [f32; 4],
    look: [f32; 2],
    target_axes: [f32; 4],
    target_look: [f32; 2],
    retarget_in: f32,
    period: f32,
    response: f32,
}

impl WanderPilot {
    /// Creates a pilot that retargets roughly every `period` seconds.
    #[must_use]
    pub fn new(seed: u64, period: f32) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            axes: [0.0; 4],
            look: [0.0; 2],
            target_axes: [0.0; 4],
            target_look: [0.0; 2],
            retarget_in: 0.0,
            period: period.max(0.1),
            response: 2.0,
        }
    }

    /// Current intent.
    #[must_use]
    pub const fn controls(&self) -> ([f32; 4], [f32; 2]) {
        (self.axes, self.look)
    }

    /// Advances the pilot by `dt` and returns the controls to apply.
    pub fn steer(&mut self, dt: f32) -> ([f32; 4], [f32; 2]) {
        if !(dt.is_finite() && dt > 0.0) {
            return self.controls();
        }
        self.retarget_in -= dt;
        if self.retarget_in <= 0.0 {
            self.retarget();
        }

        let blend = (self.response * dt).min(1.0);
        for (axis, target) in self.axes.iter_mut().zip(self.target_axes) {
            *axis += (target - *axis) * blend;
        }
        for (look, target) in self.look.iter_mut().zip(self.target_look) {
            *look += (target - *look) * blend;
        }
        self.controls()
    }

    fn retarget(&mut self) {
        let rng = &mut self.rng;
        // Mostly forward flight with occasional braking.
        let thrust = if rng.gen_bool(0.15) {
            rng.gen_range(-0.5..0.0)
        } else {
            rng.gen_range(0.2..1.0)
        };
        self.target_axes = [
            thrust,
            rng.gen_range(-0.3..0.3),
            rng.gen_range(-0.3..0.3),
            rng.gen_range(-0.2..0.2),
        ];
        self.target_look = [rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5)];
        self.retarget_in = self.period * rng.gen_range(0.5..1.5);
    }
}
