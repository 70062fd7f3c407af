//! # Flight Model Interface
//!
//! The replication stack never integrates motion itself. It hands control
//! inputs to a [`Flight`] implementation and lets it advance a
//! [`BodyState`]. Authority and owner must run the same model for
//! prediction to track.
//!
//! [`SimpleFlight`] is a small reference model used by the simulation
//! harness and the tests.

use driftline_shared::{BodyState, InputRecord, Vec3};
use serde::{Deserialize, Serialize};

/// Body-space forward axis.
pub const FORWARD: Vec3 = Vec3::Z;

/// Motion model collaborator.
pub trait Flight {
    /// Latches control input for subsequent steps.
    fn apply_controls(&mut self, input: &InputRecord);

    /// Advances `body` by `dt` seconds.
    fn step(&mut self, body: &mut BodyState, dt: f32);
}

/// Tuning for [`SimpleFlight`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightParams {
    /// Linear acceleration at full thrust (m/s²).
    pub max_acceleration: f32,
    /// Speed cap (m/s).
    pub max_speed: f32,
    /// Turn rate at full deflection (rad/s).
    pub turn_rate: f32,
    /// Angular velocity approach rate (1/s).
    pub angular_response: f32,
}

impl Default for FlightParams {
    fn default() -> Self {
        Self {
            max_acceleration: 40.0,
            max_speed: 400.0,
            turn_rate: 1.2,
            angular_response: 4.0,
        }
    }
}

/// Thrust-and-turn model without drag.
///
/// Axes map to `[thrust, strafe, lift, roll]`; look deltas to `[yaw, pitch]`.
/// Zero input coasts at constant velocity.
#[derive(Clone, Debug, Default)]
pub struct SimpleFlight {
    params: FlightParams,
    controls: InputRecord,
}

impl SimpleFlight {
    /// Creates a model with the given tuning.
    #[must_use]
    pub fn new(params: FlightParams) -> Self {
        Self {
            params,
            controls: InputRecord::default(),
        }
    }

    /// Current latched controls.
    #[must_use]
    pub const fn controls(&self) -> &InputRecord {
        &self.controls
    }
}

impl Flight for SimpleFlight {
    fn apply_controls(&mut self, input: &InputRecord) {
        self.controls = *input;
    }

    fn step(&mut self, body: &mut BodyState, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let p = &self.params;
        let [thrust, strafe, lift, roll] = self.controls.axes;
        let [yaw, pitch] = self.controls.look.map(|l| l.clamp(-1.0, 1.0));

        // Angular velocity eases toward the commanded body rate.
        let command = body
            .orientation
            .rotate(Vec3::new(pitch, yaw, roll) * p.turn_rate);
        let blend = (p.angular_response * dt).min(1.0);
        body.angular_velocity = body.angular_velocity.lerp(command, blend);
        body.orientation = body.orientation.integrate(body.angular_velocity, dt);

        let thrust_dir = body.orientation.rotate(Vec3::new(strafe, lift, thrust));
        body.velocity += thrust_dir * (p.max_acceleration * dt);
        body.velocity = body.velocity.clamp_length(p.max_speed);
        body.position += body.velocity * dt;
    }
}
