//! Wire payload shapes shared between authority and observers.
//!
//! Both payloads are fixed-size plain-old-data so they can be copied straight
//! into a packet. The snapshot is quantized to fixed steps: this bounds its
//! size and makes visually identical states compare equal.

use crate::math::{BodyState, DVec3, Quaternion, Vec3};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Position step: 1 cm.
pub const POSITION_STEP: f32 = 0.01;

/// Velocity step: 1 cm/s.
pub const VELOCITY_STEP: f32 = 0.01;

/// Angular velocity step: 0.1 degree per second.
pub const ANGULAR_VELOCITY_STEP_DEG: f32 = 0.1;

/// Quaternion component step.
///
/// A component error of `s` rotates by at most `2·asin(s)`, so 0.0009 keeps
/// the orientation within ~0.1°.
pub const ORIENTATION_STEP: f32 = 0.000_9;

/// Identifier of a connection (one viewer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Invalid/null connection ID.
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is a null/invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Wrapping comparison for 16-bit sequence numbers: `a` is at or before `b`.
#[inline]
#[must_use]
pub const fn sequence_at_or_before(a: u16, b: u16) -> bool {
    b.wrapping_sub(a) < 0x8000
}

/// Wrapping comparison for 16-bit sequence numbers: `a` is strictly newer than `b`.
#[inline]
#[must_use]
pub const fn sequence_newer(a: u16, b: u16) -> bool {
    a != b && sequence_at_or_before(b, a)
}

/// Owner → authority control input for one simulation tick.
///
/// Size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct InputRecord {
    /// Simulation step this input covers (seconds).
    pub dt: f32,
    /// Control axes in `[-1, 1]`: thrust, strafe, lift, roll.
    pub axes: [f32; 4],
    /// Look deltas: yaw, pitch.
    pub look: [f32; 2],
    /// Owner-side sequence number.
    pub sequence: u16,
    /// Padding for alignment.
    pub _padding: u16,
}

impl InputRecord {
    /// Size in bytes.
    pub const SIZE: usize = 32;

    /// Creates an input, clamping control axes to `[-1, 1]`.
    #[must_use]
    pub fn new(sequence: u16, dt: f32, axes: [f32; 4], look: [f32; 2]) -> Self {
        Self {
            dt,
            axes: axes.map(|a| if a.is_finite() { a.clamp(-1.0, 1.0) } else { 0.0 }),
            look: look.map(|l| if l.is_finite() { l } else { 0.0 }),
            sequence,
            _padding: 0,
        }
    }
}

/// Authoritative, quantized per-entity state.
///
/// Overwritten wholesale every authority tick. Positions are relative to
/// `origin`, the authority's floating origin at sample time.
///
/// Size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct NetSnapshot {
    /// Authority floating origin (global coordinates) when sampled.
    pub origin: [f64; 3],
    /// Authority clock at sample time (seconds).
    pub server_time: f64,
    /// Local position in [`POSITION_STEP`] units.
    pub position: [i32; 3],
    /// Velocity in [`VELOCITY_STEP`] units.
    pub velocity: [i32; 3],
    /// Angular velocity in [`ANGULAR_VELOCITY_STEP_DEG`] units.
    pub angular_velocity: [i32; 3],
    /// Orientation components in [`ORIENTATION_STEP`] units (x, y, z, w).
    pub orientation: [i16; 4],
    /// Last input sequence the authority processed.
    pub last_ack: u16,
    /// Padding for alignment.
    pub _padding: u16,
}

impl NetSnapshot {
    /// Size in bytes.
    pub const SIZE: usize = 80;

    /// Quantizes a sampled body.
    #[must_use]
    pub fn quantize(body: &BodyState, origin: DVec3, server_time: f64, last_ack: u16) -> Self {
        let deg = ANGULAR_VELOCITY_STEP_DEG.to_radians();
        // Canonical hemisphere so q and -q quantize identically.
        let q = body.orientation.normalize();
        let q = if q.w < 0.0 { -q } else { q };
        Self {
            origin: origin.to_array(),
            server_time,
            position: quantize_vec(body.position, POSITION_STEP),
            velocity: quantize_vec(body.velocity, VELOCITY_STEP),
            angular_velocity: quantize_vec(body.angular_velocity, deg),
            orientation: [q.x, q.y, q.z, q.w].map(|c| quantize_component(c, ORIENTATION_STEP)),
            last_ack,
            _padding: 0,
        }
    }

    /// Reconstructs the body relative to the snapshot's own origin.
    #[must_use]
    pub fn body(&self) -> BodyState {
        let deg = ANGULAR_VELOCITY_STEP_DEG.to_radians();
        let [x, y, z, w] = self.orientation.map(|c| f32::from(c) * ORIENTATION_STEP);
        BodyState {
            position: dequantize_vec(self.position, POSITION_STEP),
            velocity: dequantize_vec(self.velocity, VELOCITY_STEP),
            angular_velocity: dequantize_vec(self.angular_velocity, deg),
            orientation: Quaternion::new(x, y, z, w).normalize(),
        }
    }

    /// Origin reference as a vector.
    #[must_use]
    pub fn origin(&self) -> DVec3 {
        DVec3::from_array(self.origin)
    }

    /// Global position of the entity at sample time.
    #[must_use]
    pub fn global_position(&self) -> DVec3 {
        self.origin() + dequantize_vec(self.position, POSITION_STEP).as_dvec3()
    }
}

#[inline]
fn quantize_scalar(value: f32, step: f32) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    // `as` saturates, so out-of-range values pin to the i32 bounds.
    (value / step).round() as i32
}

#[inline]
fn quantize_component(value: f32, step: f32) -> i16 {
    if !value.is_finite() {
        return 0;
    }
    (value / step).round() as i16
}

fn quantize_vec(v: Vec3, step: f32) -> [i32; 3] {
    [
        quantize_scalar(v.x, step),
        quantize_scalar(v.y, step),
        quantize_scalar(v.z, step),
    ]
}

fn dequantize_vec(q: [i32; 3], step: f32) -> Vec3 {
    Vec3::new(q[0] as f32 * step, q[1] as f32 * step, q[2] as f32 * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sizes() {
        assert_eq!(std::mem::size_of::<InputRecord>(), InputRecord::SIZE);
        assert_eq!(std::mem::size_of::<NetSnapshot>(), NetSnapshot::SIZE);
    }

    #[test]
    fn test_quantization_error_bounds() {
        let body = BodyState {
            position: Vec3::new(1234.567, -89.012, 4.005),
            velocity: Vec3::new(310.123, 0.004, -2.5),
            angular_velocity: Vec3::new(0.0, 1.2345, -0.5),
            orientation: Quaternion::from_axis_angle(Vec3::new(0.3, 1.0, -0.2), 2.2),
        };
        let snap = NetSnapshot::quantize(&body, DVec3::ZERO, 1.0, 3);
        let back = snap.body();

        // Half a step plus f32 noise at ~1 km magnitude.
        assert!(back.position.distance(body.position) < 0.01);
        assert!(back.velocity.distance(body.velocity) < 0.01);
        assert!(back.angular_velocity.distance(body.angular_velocity) < 0.002);
        assert!(back.orientation.angle_to(body.orientation).to_degrees() < 0.15);
    }

    #[test]
    fn test_identical_states_quantize_equal() {
        let a = BodyState::at(Vec3::new(10.001, 0.0, 0.0));
        let b = BodyState::at(Vec3::new(10.002, 0.0, 0.0));
        assert_eq!(
            NetSnapshot::quantize(&a, DVec3::ZERO, 0.0, 0).position,
            NetSnapshot::quantize(&b, DVec3::ZERO, 0.0, 0).position
        );
    }

    #[test]
    fn test_global_position_uses_origin() {
        let body = BodyState::at(Vec3::new(5.0, 0.0, 0.0));
        let snap = NetSnapshot::quantize(&body, DVec3::new(1.0e9, 0.0, 0.0), 0.0, 0);
        assert!((snap.global_position().x - 1_000_000_005.0).abs() < 1e-3);
    }

    #[test]
    fn test_input_axes_are_clamped() {
        let input = InputRecord::new(1, 0.016, [2.0, -3.0, 0.5, f32::NAN], [0.1, 0.2]);
        assert_eq!(input.axes, [1.0, -1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_sequence_wrapping() {
        assert!(sequence_at_or_before(65_530, 4));
        assert!(!sequence_at_or_before(4, 65_530));
        assert!(sequence_newer(2, 65_535));
        assert!(!sequence_newer(7, 7));
    }
}
