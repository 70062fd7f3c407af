//! # Owner Reconciliation
//!
//! Corrects the owner's predicted body toward the authority's, in tiers:
//!
//! | Tier          | Trigger                           | Action                                   |
//! |---------------|-----------------------------------|------------------------------------------|
//! | Negligible    | every error under its epsilon     | nothing                                  |
//! | Soft          | between negligible and soft       | clamped velocity/angular-velocity nudge  |
//! | HardBounded   | above soft, below snap            | clamped position steps over a few ticks  |
//! | HardSnap      | above snap                        | copy the target                          |
//!
//! Thresholds widen by `high_speed_scale` while the owner flies faster than
//! `high_speed`. Both hard tiers discard the pending inputs.

use std::collections::VecDeque;

use driftline_shared::{sequence_at_or_before, BodyState, InputRecord, Vec3};

use crate::config::ReconciliationConfig;

/// Inputs kept awaiting acknowledgment.
pub const PENDING_INPUT_CAPACITY: usize = 256;

/// Correction applied for one authoritative sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CorrectionTier {
    /// Prediction matched.
    Negligible,
    /// Velocity nudged.
    Soft,
    /// Position stepped over several ticks.
    HardBounded,
    /// Replaced outright.
    HardSnap,
}

impl CorrectionTier {
    /// Whether pending inputs must be discarded.
    #[must_use]
    pub const fn is_hard(self) -> bool {
        matches!(self, Self::HardBounded | Self::HardSnap)
    }
}

/// Prediction error magnitudes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Divergence {
    /// Position error (m).
    pub position: f32,
    /// Velocity error (m/s).
    pub velocity: f32,
    /// Orientation error (rad).
    pub angle: f32,
}

impl Divergence {
    /// Error of `local` against `target`.
    #[must_use]
    pub fn between(local: &BodyState, target: &BodyState) -> Self {
        Self {
            position: local.position.distance(target.position),
            velocity: local.velocity.distance(target.velocity),
            angle: local.orientation.angle_to(target.orientation),
        }
    }
}

/// How many corrections of each tier were applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierCounts {
    /// Negligible.
    pub negligible: u64,
    /// Soft.
    pub soft: u64,
    /// Hard, bounded.
    pub hard_bounded: u64,
    /// Hard, snapped.
    pub hard_snap: u64,
}

impl TierCounts {
    fn record(&mut self, tier: CorrectionTier) {
        match tier {
            CorrectionTier::Negligible => self.negligible += 1,
            CorrectionTier::Soft => self.soft += 1,
            CorrectionTier::HardBounded => self.hard_bounded += 1,
            CorrectionTier::HardSnap => self.hard_snap += 1,
        }
    }

    /// Total corrections evaluated.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.negligible + self.soft + self.hard_bounded + self.hard_snap
    }
}

impl std::ops::AddAssign for TierCounts {
    fn add_assign(&mut self, other: Self) {
        self.negligible += other.negligible;
        self.soft += other.soft;
        self.hard_bounded += other.hard_bounded;
        self.hard_snap += other.hard_snap;
    }
}

#[derive(Clone, Copy, Debug)]
struct HardCorrection {
    target: BodyState,
    ticks_left: u32,
}

/// Tiered divergence correction.
#[derive(Clone, Debug)]
pub struct Reconciler {
    config: ReconciliationConfig,
    hard: Option<HardCorrection>,
    counts: TierCounts,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(config: &ReconciliationConfig) -> Self {
        Self {
            config: config.clone(),
            hard: None,
            counts: TierCounts::default(),
        }
    }

    /// Corrections applied so far.
    #[must_use]
    pub const fn counts(&self) -> TierCounts {
        self.counts
    }

    /// Whether a bounded hard correction is still running.
    #[must_use]
    pub const fn is_correcting(&self) -> bool {
        self.hard.is_some()
    }

    /// Tier for `error` at owner `speed`.
    #[must_use]
    pub fn classify(&self, error: &Divergence, speed: f32) -> CorrectionTier {
        let c = &self.config;
        let scale = if speed > c.high_speed {
            c.high_speed_scale.max(1.0)
        } else {
            1.0
        };
        if error.position > c.snap_position * scale || error.angle > c.snap_angle * scale {
            CorrectionTier::HardSnap
        } else if error.position > c.soft_position * scale
            || error.velocity > c.soft_velocity * scale
            || error.angle > c.soft_angle * scale
        {
            CorrectionTier::HardBounded
        } else if error.position <= c.negligible_position * scale
            && error.velocity <= c.negligible_velocity * scale
            && error.angle <= c.negligible_angle * scale
        {
            CorrectionTier::Negligible
        } else {
            CorrectionTier::Soft
        }
    }

    /// Corrects `local` toward `target`, both in the current local frame and
    /// at the same instant.
    pub fn reconcile(&mut self, local: &mut BodyState, target: &BodyState) -> CorrectionTier {
        let error = Divergence::between(local, target);
        let tier = self.classify(&error, local.velocity.length());
        self.counts.record(tier);

        match tier {
            CorrectionTier::Negligible => {}
            CorrectionTier::Soft => {
                // A fresh sample supersedes any running bounded correction.
                self.hard = None;
                self.nudge(local, target);
            }
            CorrectionTier::HardBounded => {
                tracing::debug!(
                    position = error.position,
                    velocity = error.velocity,
                    angle = error.angle,
                    "bounded hard correction"
                );
                self.hard = Some(HardCorrection {
                    target: *target,
                    ticks_left: self.config.hard_correction_ticks.max(1),
                });
                self.step_hard(local);
            }
            CorrectionTier::HardSnap => {
                tracing::debug!(position = error.position, angle = error.angle, "hard snap");
                self.hard = None;
                *local = *target;
            }
        }
        tier
    }

    /// Continues a bounded hard correction after `local` advanced by `dt`.
    pub fn step(&mut self, local: &mut BodyState, dt: f32) {
        if let Some(hard) = self.hard.as_mut() {
            hard.target = hard.target.extrapolated(dt);
            self.step_hard(local);
        }
    }

    /// Rebases the stored target after an origin shift.
    pub fn shift(&mut self, delta: Vec3) {
        if let Some(hard) = self.hard.as_mut() {
            hard.target.position += delta;
        }
    }

    /// Abandons any running correction.
    pub fn reset(&mut self) {
        self.hard = None;
    }

    fn nudge(&self, local: &mut BodyState, target: &BodyState) {
        let c = &self.config;
        let tc = c.time_constant.max(1.0e-3);

        let desired = target.velocity + (target.position - local.position) / tc;
        local.velocity += (desired - local.velocity).clamp_length(c.max_velocity_nudge.max(0.0));

        // World-space rotation taking local to target.
        let rotation = (target.orientation * local.orientation.conjugate()).to_scaled_axis();
        let desired = target.angular_velocity + rotation / tc;
        local.angular_velocity +=
            (desired - local.angular_velocity).clamp_length(c.max_angular_nudge.max(0.0));
    }

    fn step_hard(&mut self, local: &mut BodyState) {
        let Some(hard) = self.hard.as_mut() else {
            return;
        };
        let c = &self.config;
        let target = hard.target;

        local.position += (target.position - local.position).clamp_length(c.hard_step.max(0.0));
        local.velocity += (target.velocity - local.velocity).clamp_length(c.max_velocity_nudge.max(0.0));
        local.angular_velocity = local.angular_velocity.lerp(target.angular_velocity, 0.5);
        local.orientation = local.orientation.slerp(target.orientation, 0.5).normalize();

        hard.ticks_left = hard.ticks_left.saturating_sub(1);
        let settled = local.position.distance(target.position) <= c.negligible_position;
        if hard.ticks_left == 0 || settled {
            self.hard = None;
        }
    }
}

/// Inputs sent but not yet acknowledged, oldest first.
#[derive(Clone, Debug, Default)]
pub struct PendingInputQueue {
    inputs: VecDeque<InputRecord>,
}

impl PendingInputQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: VecDeque::with_capacity(PENDING_INPUT_CAPACITY),
        }
    }

    /// Appends an input, evicting the oldest when full.
    pub fn push(&mut self, input: InputRecord) {
        if self.inputs.len() == PENDING_INPUT_CAPACITY {
            self.inputs.pop_front();
        }
        self.inputs.push_back(input);
    }

    /// Drops every input at or before `ack`. Returns how many were dropped.
    pub fn ack(&mut self, ack: u16) -> usize {
        let before = self.inputs.len();
        self.inputs
            .retain(|input| !sequence_at_or_before(input.sequence, ack));
        before - self.inputs.len()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    /// Number of pending inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Summed `dt` of pending inputs: how far prediction runs ahead.
    #[must_use]
    pub fn lead_time(&self) -> f32 {
        self.inputs.iter().map(|input| input.dt).sum()
    }

    /// Pending inputs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &InputRecord> + '_ {
        self.inputs.iter()
    }
}
