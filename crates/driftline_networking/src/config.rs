//! # Configuration
//!
//! Every tunable of the replication stack, grouped by component and loaded
//! from TOML. All fields are defaulted, so a file only lists overrides:
//!
//! ```toml
//! [scheduler]
//! tick_rate = 8.0
//! enter_threshold = 0.002
//!
//! [budget]
//! initial = 16384
//! ```
//!
//! Fields are plain public values and may be changed at runtime.
//! [`SyncConfig::validate`] rejects inconsistent combinations at load time;
//! accessors clamp out-of-range sizes and rates at the point of use.

use crate::error::{SyncError, SyncResult};
use driftline_core::PerceptualDeadline;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full replication configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Spatial index and grouping.
    pub spatial: SpatialConfig,
    /// Interest scheduler.
    pub scheduler: SchedulerConfig,
    /// Per-connection byte budget.
    pub budget: BudgetConfig,
    /// Observer interpolation.
    pub interpolation: InterpolationConfig,
    /// Owner reconciliation.
    pub reconciliation: ReconciliationConfig,
    /// Floating origin.
    pub origin: OriginConfig,
    /// Simulation cadence.
    pub simulation: SimulationConfig,
}

impl SyncConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SyncError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> SyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> SyncResult<()> {
        let s = &self.scheduler;
        if !(s.enter_threshold > s.exit_threshold) {
            return Err(invalid(format!(
                "scheduler.enter_threshold ({}) must exceed scheduler.exit_threshold ({})",
                s.enter_threshold, s.exit_threshold
            )));
        }
        if s.exit_threshold < 0.0 {
            return Err(invalid("scheduler.exit_threshold must be non-negative"));
        }
        if s.min_deadline > s.max_deadline {
            return Err(invalid("scheduler.min_deadline exceeds scheduler.max_deadline"));
        }
        if s.always_include_radius > s.ai_cull_radius.min(s.player_cull_radius) {
            return Err(invalid("scheduler.always_include_radius exceeds a cull radius"));
        }

        let b = &self.budget;
        if b.min > b.max {
            return Err(invalid("budget.min exceeds budget.max"));
        }
        if !(b.decrease_factor > 0.0 && b.decrease_factor < 1.0) {
            return Err(invalid("budget.decrease_factor must be in (0, 1)"));
        }
        if !(b.safety_factor > 0.0 && b.safety_factor <= 1.0) {
            return Err(invalid("budget.safety_factor must be in (0, 1]"));
        }

        let i = &self.interpolation;
        if i.min_delay > i.max_delay {
            return Err(invalid("interpolation.min_delay exceeds interpolation.max_delay"));
        }

        let r = &self.reconciliation;
        if !(r.negligible_position < r.soft_position && r.soft_position < r.snap_position) {
            return Err(invalid(
                "reconciliation position thresholds must satisfy negligible < soft < snap",
            ));
        }
        if !(r.negligible_angle < r.soft_angle && r.soft_angle < r.snap_angle) {
            return Err(invalid(
                "reconciliation angle thresholds must satisfy negligible < soft < snap",
            ));
        }
        if r.negligible_velocity >= r.soft_velocity {
            return Err(invalid("reconciliation.negligible_velocity must be below soft_velocity"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SyncError {
    SyncError::InvalidConfig(message.into())
}

fn positive_or(value: f32, floor: f32) -> f32 {
    if value.is_finite() && value > floor {
        value
    } else {
        floor
    }
}

/// `[spatial]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// World index cell size (local units).
    pub cell_size: f32,
    /// Fine grid used to group selections for header batching.
    pub group_cell_size: f32,
    /// Seconds between live-entity roster refreshes.
    pub roster_ttl: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: 1_000.0,
            group_cell_size: 250.0,
            roster_ttl: 1.0,
        }
    }
}

impl SpatialConfig {
    /// Group cell size, clamped.
    #[must_use]
    pub fn group_cell_size(&self) -> f32 {
        positive_or(self.group_cell_size, 1.0)
    }
}

/// `[scheduler]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler ticks per second.
    pub tick_rate: f32,
    /// Entities this close are always selected, unscored.
    pub always_include_radius: f32,
    /// Cull radius for player ships.
    pub player_cull_radius: f32,
    /// Cull radius for AI ships.
    pub ai_cull_radius: f32,
    /// Score a new entity must reach to be selected.
    pub enter_threshold: f32,
    /// Score a selected entity must keep to stay selected.
    pub exit_threshold: f32,
    /// Perceptibility threshold θ0 (radians).
    pub perceptibility_angle: f32,
    /// Shortest update deadline (seconds).
    pub min_deadline: f32,
    /// Longest update deadline (seconds).
    pub max_deadline: f32,
    /// Viewer speed above which only the own entity is replicated.
    pub extreme_speed: f32,
    /// Utility multiplier for player ships.
    pub player_weight: f32,
    /// Utility multiplier for AI ships.
    pub ai_weight: f32,
    /// Half-angle of full field-of-view weight (radians).
    pub fov_half_angle: f32,
    /// Weight behind the viewer.
    pub fov_floor: f32,
    /// Apparent size (radius / distance) that maps to weight 1.
    pub size_reference: f32,
    /// Upper bound of the apparent-size weight.
    pub size_weight_cap: f32,
    /// Distance at which the utility floor halves.
    pub distance_floor_range: f32,
    /// Minimum per-update cost (bytes).
    pub cost_floor: f32,
    /// Bytes charged per millisecond of serialization.
    pub serialize_weight: f32,
    /// One-time cost for the first selected member of a group (bytes).
    pub group_header_cost: f32,
    /// Smoothing factor of per-entity statistics.
    pub stats_alpha: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rate: driftline_shared::SCHEDULER_TICK_RATE as f32,
            always_include_radius: 100.0,
            player_cull_radius: 15_000.0,
            ai_cull_radius: 8_000.0,
            enter_threshold: 0.0015,
            exit_threshold: 0.001,
            perceptibility_angle: 0.002,
            min_deadline: 0.05,
            max_deadline: 2.0,
            extreme_speed: 30_000.0,
            player_weight: 2.0,
            ai_weight: 1.0,
            fov_half_angle: 0.6,
            fov_floor: 0.25,
            size_reference: 0.01,
            size_weight_cap: 4.0,
            distance_floor_range: 1_000.0,
            cost_floor: 32.0,
            serialize_weight: 50.0,
            group_header_cost: 16.0,
            stats_alpha: 0.2,
        }
    }
}

impl SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[must_use]
    pub fn tick_period(&self) -> f32 {
        1.0 / positive_or(self.tick_rate, 0.1)
    }

    /// Deadline solver built from the perceptual settings.
    #[must_use]
    pub fn deadline(&self) -> PerceptualDeadline {
        PerceptualDeadline::new(self.perceptibility_angle, self.min_deadline, self.max_deadline)
    }

    /// Statistics smoothing factor, clamped to `(0, 1]`.
    #[must_use]
    pub fn stats_alpha(&self) -> f32 {
        if self.stats_alpha.is_finite() {
            self.stats_alpha.clamp(0.01, 1.0)
        } else {
            0.2
        }
    }
}

/// `[budget]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Starting budget (bytes per scheduler tick).
    pub initial: f32,
    /// Lower bound.
    pub min: f32,
    /// Upper bound.
    pub max: f32,
    /// Additive increase.
    pub increment: f32,
    /// Multiplicative decrease, in `(0, 1)`.
    pub decrease_factor: f32,
    /// Calm ticks required before an increase.
    pub patience: u32,
    /// Share of the budget offered to admission, in `(0, 1]`.
    pub safety_factor: f32,
    /// Utilization above which the budget decreases.
    pub high_water: f32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            initial: 8_192.0,
            min: 1_024.0,
            max: 65_536.0,
            increment: 512.0,
            decrease_factor: 0.7,
            patience: 4,
            safety_factor: 0.9,
            high_water: 0.95,
        }
    }
}

/// `[interpolation]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Smallest interpolation delay (seconds).
    pub min_delay: f32,
    /// Largest interpolation delay (seconds).
    pub max_delay: f32,
    /// Added to the render time; positive values lead.
    pub lead_bias: f32,
    /// Buffered history (seconds).
    pub window: f32,
    /// Longest extrapolation past the newest sample (seconds).
    pub max_extrapolation: f32,
    /// Jump in global position treated as a teleport.
    pub teleport_distance: f64,
    /// Smoothing factor of the clock offset estimate.
    pub clock_alpha: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            min_delay: 0.05,
            max_delay: 0.35,
            lead_bias: 0.0,
            window: 1.0,
            max_extrapolation: 0.25,
            teleport_distance: 2_000.0,
            clock_alpha: 0.1,
        }
    }
}

/// `[reconciliation]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Position error ignored entirely.
    pub negligible_position: f32,
    /// Velocity error ignored entirely.
    pub negligible_velocity: f32,
    /// Orientation error ignored entirely (radians).
    pub negligible_angle: f32,
    /// Upper position error handled by soft blending.
    pub soft_position: f32,
    /// Upper velocity error handled by soft blending.
    pub soft_velocity: f32,
    /// Upper orientation error handled by soft blending (radians).
    pub soft_angle: f32,
    /// Position error that forces an immediate snap.
    pub snap_position: f32,
    /// Orientation error that forces an immediate snap (radians).
    pub snap_angle: f32,
    /// Speed above which every threshold is widened.
    pub high_speed: f32,
    /// Threshold multiplier in high-speed mode.
    pub high_speed_scale: f32,
    /// Position error is closed over this many seconds.
    pub time_constant: f32,
    /// Largest velocity change per tick (m/s).
    pub max_velocity_nudge: f32,
    /// Largest angular velocity change per tick (rad/s).
    pub max_angular_nudge: f32,
    /// Largest position step per tick in a bounded hard correction.
    pub hard_step: f32,
    /// Ticks a bounded hard correction lasts.
    pub hard_correction_ticks: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            negligible_position: 0.02,
            negligible_velocity: 0.05,
            negligible_angle: 0.005,
            soft_position: 5.0,
            soft_velocity: 10.0,
            soft_angle: 0.3,
            snap_position: 100.0,
            snap_angle: 1.5,
            high_speed: 500.0,
            high_speed_scale: 4.0,
            time_constant: 0.25,
            max_velocity_nudge: 5.0,
            max_angular_nudge: 0.5,
            hard_step: 2.0,
            hard_correction_ticks: 6,
        }
    }
}

/// `[origin]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Whether recentring is enabled.
    pub enabled: bool,
    /// Anchor distance that triggers a recentre.
    pub recenter_radius: f32,
    /// Sector edge length for sector coordinates.
    pub sector_size: f64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recenter_radius: 5_000.0,
            sector_size: driftline_shared::DEFAULT_SECTOR_SIZE,
        }
    }
}

/// `[simulation]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulation and transport ticks per second.
    pub tick_rate: f32,
    /// Seconds between RTT probes per connection.
    pub ping_interval: f64,
    /// Ticks executed per frame before the backlog is dropped.
    pub max_steps_per_frame: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: driftline_shared::SIMULATION_TICK_RATE as f32,
            ping_interval: 1.0,
            max_steps_per_frame: 8,
        }
    }
}

impl SimulationConfig {
    /// Seconds per simulation tick.
    #[must_use]
    pub fn tick_period(&self) -> f32 {
        1.0 / positive_or(self.tick_rate, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = SyncConfig::from_toml_str(
            r#"
            [scheduler]
            tick_rate = 8.0

            [budget]
            initial = 4096.0
            "#,
        )
        .expect("valid config");
        assert_eq!(config.scheduler.tick_rate, 8.0);
        assert_eq!(config.budget.initial, 4096.0);
        assert_eq!(config.budget.max, BudgetConfig::default().max);
        assert_eq!(config.spatial, SpatialConfig::default());
    }

    #[test]
    fn test_hysteresis_must_be_ordered() {
        let result = SyncConfig::from_toml_str(
            r#"
            [scheduler]
            enter_threshold = 0.001
            exit_threshold = 0.002
            "#,
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = SyncConfig::from_toml_str("[scheduler]\ntick_rate = \"fast\"");
        assert!(matches!(result, Err(SyncError::ConfigParse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = SyncConfig::load("/nonexistent/driftline.toml");
        assert!(matches!(result, Err(SyncError::ConfigIo { .. })));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SyncConfig::default();
        let text = config.to_toml_string().expect("serializable");
        assert_eq!(SyncConfig::from_toml_str(&text).expect("valid"), config);
    }

    #[test]
    fn test_rates_are_clamped() {
        let mut config = SyncConfig::default();
        config.scheduler.tick_rate = 0.0;
        config.simulation.tick_rate = -3.0;
        config.spatial.group_cell_size = f32::NAN;
        assert!((config.scheduler.tick_period() - 10.0).abs() < 1e-4);
        assert!((config.simulation.tick_period() - 1.0).abs() < 1e-6);
        assert_eq!(config.spatial.group_cell_size(), 1.0);
    }
}
