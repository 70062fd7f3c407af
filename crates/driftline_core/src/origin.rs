//! # Floating Origin
//!
//! Local simulation runs in `f32` relative to a shared origin held in `f64`
//! global coordinates. When the anchor entity drifts beyond the recenter
//! radius the origin jumps onto it and every local-space cache is translated
//! by the returned [`OriginShift`].
//!
//! ```text
//!   before:  origin ─────────────── anchor (|local| > R)
//!   after:               origin' == anchor      delta = -anchor.local
//! ```

use crate::entity::EntityId;
use crate::registry::EntityLookup;
use driftline_shared::{from_global, DVec3, GlobalPosition, Vec3};

/// Smallest recenter radius accepted.
pub const MIN_RECENTER_RADIUS: f32 = 1.0;

/// A recentring event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OriginShift {
    /// Translation every local-space cache must apply.
    pub delta: Vec3,
    /// Origin after the shift, in global coordinates.
    pub new_origin: DVec3,
}

/// Owns the shared world origin.
#[derive(Clone, Debug)]
pub struct FloatingOriginManager {
    origin: DVec3,
    anchor: EntityId,
    enabled: bool,
    recenter_radius: f32,
    sector_size: f64,
    shift_count: u64,
}

impl FloatingOriginManager {
    /// Creates an enabled manager at the global origin with no anchor.
    #[must_use]
    pub fn new(recenter_radius: f32, sector_size: f64) -> Self {
        Self {
            origin: DVec3::ZERO,
            anchor: EntityId::NULL,
            enabled: true,
            recenter_radius,
            sector_size,
            shift_count: 0,
        }
    }

    /// Current origin in global coordinates.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Overrides the origin, e.g. to adopt an authority's reference.
    ///
    /// Returns the shift local caches must apply.
    pub fn set_origin(&mut self, origin: DVec3) -> OriginShift {
        let delta = (self.origin - origin).as_vec3();
        self.origin = origin;
        self.shift_count += 1;
        OriginShift {
            delta,
            new_origin: origin,
        }
    }

    /// Entity tracked for recentring.
    #[inline]
    #[must_use]
    pub const fn anchor(&self) -> Option<EntityId> {
        if self.anchor.is_null() {
            None
        } else {
            Some(self.anchor)
        }
    }

    /// Sets or clears the anchor.
    pub fn set_anchor(&mut self, anchor: Option<EntityId>) {
        self.anchor = anchor.unwrap_or(EntityId::NULL);
    }

    /// Enables or disables recentring.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether recentring is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Recenter radius, clamped to a usable minimum.
    #[must_use]
    pub fn recenter_radius(&self) -> f32 {
        if self.recenter_radius.is_finite() {
            self.recenter_radius.max(MIN_RECENTER_RADIUS)
        } else {
            MIN_RECENTER_RADIUS
        }
    }

    /// Changes the recenter radius.
    pub fn set_recenter_radius(&mut self, radius: f32) {
        self.recenter_radius = radius;
    }

    /// Number of shifts performed so far.
    #[must_use]
    pub const fn shift_count(&self) -> u64 {
        self.shift_count
    }

    /// Recenters onto `anchor_local` if it lies beyond the recenter radius.
    pub fn check(&mut self, anchor_local: Vec3) -> Option<OriginShift> {
        if !self.enabled || !anchor_local.is_finite() {
            return None;
        }
        let radius = self.recenter_radius();
        if anchor_local.length_squared() <= radius * radius {
            return None;
        }

        self.origin += anchor_local.as_dvec3();
        self.shift_count += 1;
        tracing::info!(
            origin = ?self.origin,
            distance = anchor_local.length(),
            "floating origin recentred"
        );
        Some(OriginShift {
            delta: -anchor_local,
            new_origin: self.origin,
        })
    }

    /// Per-tick check against the anchor's current position.
    ///
    /// A dead or missing anchor never triggers a shift.
    pub fn tick(&mut self, lookup: &impl EntityLookup) -> Option<OriginShift> {
        let anchor = self.anchor()?;
        let position = lookup.position(anchor)?;
        self.check(position)
    }

    /// Local position → global coordinates.
    #[inline]
    #[must_use]
    pub fn world_to_global(&self, local: Vec3) -> DVec3 {
        self.origin + local.as_dvec3()
    }

    /// Global coordinates → local position.
    #[inline]
    #[must_use]
    pub fn global_to_world(&self, global: DVec3) -> Vec3 {
        (global - self.origin).as_vec3()
    }

    /// Local position → sector coordinates.
    #[must_use]
    pub fn to_sector(&self, local: Vec3) -> GlobalPosition {
        from_global(self.world_to_global(local), self.sector_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::registry::{EntityRecord, EntityRegistry};
    use driftline_shared::BodyState;

    #[test]
    fn test_no_shift_inside_radius() {
        let mut origin = FloatingOriginManager::new(5_000.0, 10_000.0);
        assert!(origin.check(Vec3::new(4_999.0, 0.0, 0.0)).is_none());
        assert_eq!(origin.origin(), DVec3::ZERO);
    }

    #[test]
    fn test_shift_moves_origin_onto_anchor() {
        let mut origin = FloatingOriginManager::new(5_000.0, 10_000.0);
        let anchor = Vec3::new(6_000.0, -10.0, 3.0);
        let shift = origin.check(anchor).expect("beyond radius");

        assert_eq!(shift.delta, -anchor);
        assert_eq!(origin.origin(), anchor.as_dvec3());
        // Anchor lands at the new local origin
        assert_eq!(origin.global_to_world(DVec3::new(6_000.0, -10.0, 3.0)), Vec3::ZERO);
        assert_eq!(origin.shift_count(), 1);
    }

    #[test]
    fn test_disabled_never_shifts() {
        let mut origin = FloatingOriginManager::new(10.0, 10_000.0);
        origin.set_enabled(false);
        assert!(origin.check(Vec3::new(1.0e6, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_tick_follows_live_anchor() {
        let mut registry = EntityRegistry::new();
        let id = registry.spawn(EntityRecord::new(
            EntityKind::PlayerShip,
            BodyState::at(Vec3::new(0.0, 0.0, 20_000.0)),
            10.0,
        ));
        let mut origin = FloatingOriginManager::new(5_000.0, 10_000.0);
        assert!(origin.tick(&registry).is_none());

        origin.set_anchor(Some(id));
        let shift = origin.tick(&registry).expect("anchor far out");
        registry.apply_origin_shift(shift.delta);
        assert!(origin.tick(&registry).is_none());

        registry.despawn(id);
        assert!(origin.tick(&registry).is_none());
    }

    #[test]
    fn test_global_roundtrip_and_sector() {
        let mut origin = FloatingOriginManager::new(5_000.0, 10_000.0);
        origin.set_origin(DVec3::new(1.0e9, 0.0, -2.5e4));
        let local = Vec3::new(12.5, 0.0, -3.0);
        let global = origin.world_to_global(local);
        assert!((global.x - 1_000_000_012.5).abs() < 1e-6);
        assert_eq!(origin.global_to_world(global), local);

        let sector = origin.to_sector(local);
        assert_eq!(sector.sector, [100_000, 0, -3]);
    }

    #[test]
    fn test_bad_radius_is_clamped() {
        let origin = FloatingOriginManager::new(-4.0, 10_000.0);
        assert_eq!(origin.recenter_radius(), MIN_RECENTER_RADIUS);
    }
}
