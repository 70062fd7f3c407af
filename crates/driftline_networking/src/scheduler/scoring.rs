//! # Scoring and Admission
//!
//! Pure functions behind one scheduler tick:
//!
//! ```text
//! E = sqrt((θ_pos/θ0)² + (θ_self/θ0)²)          perceptual error over τ
//! U = max(distance_floor, W·E) · class_weight    utility
//! S = U / (C + ε)                                score per byte
//! ```
//!
//! Admission walks the ranked list under the tick budget with enter/exit
//! hysteresis and a one-time header cost per spatial group.

use std::cmp::Ordering;
use std::collections::HashSet;

use driftline_core::{CellKey, EntityId, EntityKind};
use driftline_shared::Vec3;

use crate::config::SchedulerConfig;

/// Keeps the score finite for degenerate costs.
pub const SCORE_EPSILON: f32 = 1.0e-3;

/// Relative motion of one entity as seen from the viewer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Kinematics {
    /// Relative speed perpendicular to the line of sight (m/s).
    pub tangential_speed: f32,
    /// Smoothed normal acceleration noise (m/s²).
    pub accel_noise: f32,
    /// Smoothed jerk noise (m/s³).
    pub jerk_noise: f32,
    /// Own rotation rate (rad/s).
    pub angular_rate: f32,
    /// Bounding radius (m).
    pub radius: f32,
    /// Viewer distance (m).
    pub distance: f32,
}

/// Prediction horizon: one round trip plus one scheduler period.
#[inline]
#[must_use]
pub fn horizon(rtt: f32, scheduler_period: f32) -> f32 {
    rtt.max(0.0) + scheduler_period.max(0.0)
}

/// Angular error accumulated over `tau`, in units of `theta0`.
#[must_use]
pub fn perceptual_error(k: &Kinematics, tau: f32, theta0: f32) -> f32 {
    let d = k.distance.max(1.0e-3);
    let theta0 = theta0.max(1.0e-6);
    let drift = k.tangential_speed * tau
        + 0.5 * k.accel_noise * tau * tau
        + k.jerk_noise * tau * tau * tau / 6.0;
    let theta_pos = drift / d;
    let theta_self = (k.radius / d) * k.angular_rate * tau;
    let e = ((theta_pos / theta0).powi(2) + (theta_self / theta0).powi(2)).sqrt();
    if e.is_finite() {
        e
    } else {
        0.0
    }
}

/// 1 inside the half-angle, falling linearly to `floor` directly behind.
#[must_use]
pub fn fov_weight(forward: Vec3, to_target: Vec3, half_angle: f32, floor: f32) -> f32 {
    let forward = forward.normalize_or_zero();
    let to_target = to_target.normalize_or_zero();
    if forward == Vec3::ZERO || to_target == Vec3::ZERO {
        return 1.0;
    }
    let half_angle = half_angle.clamp(0.0, std::f32::consts::PI - 1.0e-3);
    let angle = forward.dot(to_target).clamp(-1.0, 1.0).acos();
    if angle <= half_angle {
        return 1.0;
    }
    let t = (angle - half_angle) / (std::f32::consts::PI - half_angle);
    1.0 - t.min(1.0) * (1.0 - floor.clamp(0.0, 1.0))
}

/// Angular size relative to `reference`, capped.
#[must_use]
pub fn size_weight(radius: f32, distance: f32, reference: f32, cap: f32) -> f32 {
    let angular = radius.max(0.0) / distance.max(1.0);
    (angular / reference.max(1.0e-6)).min(cap.max(0.0))
}

/// Baseline utility that decays with distance.
#[must_use]
pub fn distance_floor(distance: f32, range: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0) / range.max(1.0))
}

/// Replication class weight.
#[must_use]
pub fn class_weight(kind: EntityKind, config: &SchedulerConfig) -> f32 {
    match kind {
        EntityKind::PlayerShip => config.player_weight,
        EntityKind::AiShip => config.ai_weight,
    }
}

/// `max(floor, W·E) · class_weight`.
#[must_use]
pub fn utility(
    distance: f32,
    visual_weight: f32,
    error: f32,
    kind: EntityKind,
    config: &SchedulerConfig,
) -> f32 {
    let floor = distance_floor(distance, config.distance_floor_range);
    floor.max(visual_weight * error) * class_weight(kind, config)
}

/// Utility per byte.
#[inline]
#[must_use]
pub fn score(utility: f32, cost: f32) -> f32 {
    utility / (cost.max(0.0) + SCORE_EPSILON)
}

/// Spatial group used for header amortization.
#[must_use]
pub fn group_key(position: Vec3, group_cell_size: f32) -> CellKey {
    let size = group_cell_size.max(1.0);
    [
        (position.x / size).floor() as i32,
        (position.y / size).floor() as i32,
        (position.z / size).floor() as i32,
    ]
}

/// One entity considered for a connection this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Entity.
    pub entity: EntityId,
    /// Replication class.
    pub kind: EntityKind,
    /// Viewer distance (m).
    pub distance: f32,
    /// Utility.
    pub utility: f32,
    /// Estimated bytes per update.
    pub cost: f32,
    /// Utility per byte.
    pub score: f32,
    /// Spatial group.
    pub group: CellKey,
    /// Perceptual deadline for pacing (s).
    pub deadline: f32,
}

/// Sorts by descending score; ties break on entity id.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_unstable_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.entity.cmp(&b.entity),
        other => other,
    });
}

/// Limits applied by [`admit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdmissionLimits {
    /// Ceiling for cumulative cost.
    pub tick_budget: f32,
    /// Score a new entity must reach.
    pub enter_threshold: f32,
    /// Score a visible entity must keep.
    pub exit_threshold: f32,
    /// One-time cost per spatial group.
    pub group_header_cost: f32,
}

impl AdmissionLimits {
    /// Limits for `tick_budget` from scheduler settings.
    #[must_use]
    pub fn new(tick_budget: f32, config: &SchedulerConfig) -> Self {
        Self {
            tick_budget,
            enter_threshold: config.enter_threshold,
            exit_threshold: config.exit_threshold,
            group_header_cost: config.group_header_cost.max(0.0),
        }
    }
}

/// Result of [`admit`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Admission {
    /// Selected candidates, forced first, then in rank order.
    pub selected: Vec<Candidate>,
    /// Cumulative cost including group headers.
    pub used: f32,
    /// Forced entities selected.
    pub forced: usize,
    /// Candidates below their hysteresis threshold.
    pub below_threshold: usize,
    /// Candidates that did not fit the budget.
    pub over_budget: usize,
}

/// Selects candidates for one tick.
///
/// `forced` entities bypass scoring and are charged first; if they alone
/// exceed the budget no scored candidate is admitted. Scored candidates are
/// visited in `ranked` order and skipped, not stopped at, when they fail,
/// so a cheaper candidate further down may still fit.
pub fn admit(
    forced: &[Candidate],
    ranked: &[Candidate],
    is_visible: impl Fn(EntityId) -> bool,
    limits: &AdmissionLimits,
) -> Admission {
    let mut admission = Admission::default();
    let mut groups: HashSet<CellKey> = HashSet::new();

    for candidate in forced {
        let header = if groups.insert(candidate.group) {
            limits.group_header_cost
        } else {
            0.0
        };
        admission.used += candidate.cost + header;
        admission.selected.push(*candidate);
    }
    admission.forced = forced.len();

    for candidate in ranked {
        let threshold = if is_visible(candidate.entity) {
            limits.exit_threshold
        } else {
            limits.enter_threshold
        };
        if candidate.score < threshold {
            admission.below_threshold += 1;
            continue;
        }
        let header = if groups.contains(&candidate.group) {
            0.0
        } else {
            limits.group_header_cost
        };
        let total = admission.used + candidate.cost + header;
        if total > limits.tick_budget {
            admission.over_budget += 1;
            continue;
        }
        groups.insert(candidate.group);
        admission.used = total;
        admission.selected.push(*candidate);
    }
    admission
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn candidate(index: u32, score: f32, cost: f32, group: CellKey) -> Candidate {
        Candidate {
            entity: EntityId::new(index, 0),
            kind: EntityKind::AiShip,
            distance: 1_000.0,
            utility: score * cost,
            cost,
            score,
            group,
            deadline: 0.5,
        }
    }

    fn limits(budget: f32) -> AdmissionLimits {
        AdmissionLimits {
            tick_budget: budget,
            enter_threshold: 0.002,
            exit_threshold: 0.001,
            group_header_cost: 16.0,
        }
    }

    #[test]
    fn test_error_grows_with_speed_and_shrinks_with_distance() {
        let base = Kinematics {
            tangential_speed: 10.0,
            distance: 1_000.0,
            ..Kinematics::default()
        };
        let tau = horizon(0.1, 0.2);
        let e = perceptual_error(&base, tau, 0.002);
        let faster = perceptual_error(&Kinematics { tangential_speed: 20.0, ..base }, tau, 0.002);
        let farther = perceptual_error(&Kinematics { distance: 2_000.0, ..base }, tau, 0.002);
        let noisy = perceptual_error(&Kinematics { accel_noise: 5.0, ..base }, tau, 0.002);
        assert!(faster > e);
        assert!(farther < e);
        assert!(noisy > e);
        assert!((e - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_spinning_adds_error() {
        let still = Kinematics {
            radius: 20.0,
            distance: 500.0,
            ..Kinematics::default()
        };
        assert_eq!(perceptual_error(&still, 0.3, 0.002), 0.0);
        let spinning = Kinematics { angular_rate: 1.0, ..still };
        assert!(perceptual_error(&spinning, 0.3, 0.002) > 0.0);
    }

    #[test]
    fn test_fov_weight_is_monotone() {
        let forward = Vec3::Z;
        assert_eq!(fov_weight(forward, Vec3::Z, 0.6, 0.25), 1.0);
        let side = fov_weight(forward, Vec3::X, 0.6, 0.25);
        let behind = fov_weight(forward, -Vec3::Z, 0.6, 0.25);
        assert!(side < 1.0 && side > behind);
        assert!((behind - 0.25).abs() < 1e-4);
        assert_eq!(fov_weight(Vec3::ZERO, Vec3::X, 0.6, 0.25), 1.0);
    }

    #[test]
    fn test_size_and_distance_weights() {
        assert!(size_weight(10.0, 100.0, 0.01, 4.0) <= 4.0);
        assert!(size_weight(10.0, 10_000.0, 0.01, 4.0) < size_weight(10.0, 1_000.0, 0.01, 4.0));
        assert!(distance_floor(5_000.0, 1_000.0) < distance_floor(500.0, 1_000.0));
        assert!((distance_floor(0.0, 1_000.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_player_outranks_ai_at_equal_error() {
        let config = SchedulerConfig::default();
        let ai = utility(2_000.0, 1.0, 3.0, EntityKind::AiShip, &config);
        let player = utility(2_000.0, 1.0, 3.0, EntityKind::PlayerShip, &config);
        assert!(player > ai);
    }

    #[test]
    fn test_group_key_floors() {
        assert_eq!(group_key(Vec3::new(-1.0, 0.0, 249.0), 250.0), [-1, 0, 0]);
        assert_eq!(group_key(Vec3::new(250.0, 0.0, 0.0), 250.0), [1, 0, 0]);
    }

    #[test]
    fn test_rank_orders_by_score() {
        let mut list = vec![
            candidate(1, 0.1, 10.0, [0; 3]),
            candidate(2, 0.5, 10.0, [0; 3]),
            candidate(3, 0.5, 10.0, [0; 3]),
        ];
        rank(&mut list);
        let order: Vec<u32> = list.iter().map(|c| c.entity.index()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_hysteresis() {
        let ranked = [candidate(1, 0.0015, 10.0, [0; 3])];
        let fresh = admit(&[], &ranked, |_| false, &limits(1_000.0));
        assert!(fresh.selected.is_empty());
        assert_eq!(fresh.below_threshold, 1);

        let kept = admit(&[], &ranked, |_| true, &limits(1_000.0));
        assert_eq!(kept.selected.len(), 1);
    }

    #[test]
    fn test_hysteresis_holds_across_ticks() {
        let limits = limits(1_000.0);
        let midpoint = 0.5 * (limits.enter_threshold + limits.exit_threshold);
        let swing = 0.4 * (limits.enter_threshold - limits.exit_threshold);
        let mut rng = ChaCha8Rng::seed_from_u64(0x5717);
        let mut visible = false;
        let mut toggles = 0;

        for tick in 0..120 {
            // One clear entry, then noise around the midpoint.
            let score = if tick == 10 {
                limits.enter_threshold * 1.5
            } else {
                midpoint + rng.gen_range(-swing..swing)
            };
            let ranked = [candidate(1, score, 10.0, [0; 3])];
            let admission = admit(&[], &ranked, |_| visible, &limits);
            let now_visible = !admission.selected.is_empty();
            if now_visible != visible {
                toggles += 1;
            }
            visible = now_visible;
            assert_eq!(visible, tick >= 10, "tick {tick} score {score}");
        }
        assert_eq!(toggles, 1);
    }

    #[test]
    fn test_group_header_charged_once() {
        let ranked = [
            candidate(1, 1.0, 100.0, [0; 3]),
            candidate(2, 0.9, 100.0, [0; 3]),
            candidate(3, 0.8, 100.0, [1, 0, 0]),
        ];
        let admission = admit(&[], &ranked, |_| false, &limits(10_000.0));
        assert_eq!(admission.selected.len(), 3);
        assert!((admission.used - 332.0).abs() < 1e-3);
    }

    #[test]
    fn test_skips_expensive_keeps_walking() {
        let ranked = [
            candidate(1, 1.0, 100.0, [0; 3]),
            candidate(2, 0.9, 500.0, [0; 3]),
            candidate(3, 0.8, 50.0, [0; 3]),
        ];
        let admission = admit(&[], &ranked, |_| false, &limits(200.0));
        let ids: Vec<u32> = admission.selected.iter().map(|c| c.entity.index()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(admission.over_budget, 1);
    }

    #[test]
    fn test_forced_overrun_blocks_scored() {
        let forced = [candidate(1, f32::INFINITY, 300.0, [0; 3])];
        let ranked = [candidate(2, 1.0, 1.0, [0; 3])];
        let admission = admit(&forced, &ranked, |_| false, &limits(200.0));
        assert_eq!(admission.selected.len(), 1);
        assert_eq!(admission.forced, 1);
        assert_eq!(admission.over_budget, 1);
    }

    #[test]
    fn test_budget_conformance_randomized() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xB0D6E7);
        for _ in 0..200 {
            let count = rng.gen_range(0..60);
            let mut ranked: Vec<Candidate> = (0..count)
                .map(|i| {
                    let group = [rng.gen_range(-2..2), rng.gen_range(-2..2), 0];
                    candidate(i, rng.gen_range(0.0..0.01), rng.gen_range(32.0..400.0), group)
                })
                .collect();
            rank(&mut ranked);
            let budget = rng.gen_range(100.0..5_000.0);
            let visible = rng.gen_bool(0.5);
            let admission = admit(&[], &ranked, |_| visible, &limits(budget));
            assert!(admission.used <= budget + 1e-3);

            let mut groups = HashSet::new();
            let recomputed: f32 = admission
                .selected
                .iter()
                .map(|c| c.cost + if groups.insert(c.group) { 16.0 } else { 0.0 })
                .sum();
            assert!((recomputed - admission.used).abs() < 1e-2);
        }
    }
}
