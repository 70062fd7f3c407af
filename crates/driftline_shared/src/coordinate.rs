//! # Sector Coordinates
//!
//! A global position is stored as an integer sector index plus a small
//! single-precision offset inside that sector. The pair round-trips through
//! a double-precision global position without meaningful loss for sector
//! indices well beyond ±10⁵ (±10⁹ units at the default sector size).
//!
//! ```text
//! global = sector · sector_size + offset        0 ≤ offset < sector_size
//! ```

use crate::math::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Default edge length of one sector.
pub const DEFAULT_SECTOR_SIZE: f64 = 10_000.0;

/// Smallest sector size accepted; anything below is clamped to this.
pub const MIN_SECTOR_SIZE: f64 = 1.0;

/// Position expressed as sector index + offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalPosition {
    /// Integer sector index per axis.
    pub sector: [i32; 3],
    /// Offset inside the sector, `0 ≤ offset < sector_size` per axis.
    pub offset: Vec3,
}

impl GlobalPosition {
    /// Creates a position from parts. The caller upholds the offset range.
    #[must_use]
    pub const fn new(sector: [i32; 3], offset: Vec3) -> Self {
        Self { sector, offset }
    }

    /// Reconstructs the double-precision global position.
    #[must_use]
    pub fn to_global(&self, sector_size: f64) -> DVec3 {
        to_global(self, sector_size)
    }
}

/// Clamps a configured sector size to a usable value.
#[inline]
#[must_use]
pub fn sanitize_sector_size(sector_size: f64) -> f64 {
    if sector_size.is_finite() && sector_size >= MIN_SECTOR_SIZE {
        sector_size
    } else {
        MIN_SECTOR_SIZE
    }
}

/// `global = sector · sector_size + offset`.
#[must_use]
pub fn to_global(pos: &GlobalPosition, sector_size: f64) -> DVec3 {
    let size = sanitize_sector_size(sector_size);
    DVec3::new(
        f64::from(pos.sector[0]) * size + f64::from(pos.offset.x),
        f64::from(pos.sector[1]) * size + f64::from(pos.offset.y),
        f64::from(pos.sector[2]) * size + f64::from(pos.offset.z),
    )
}

/// Splits a global position into sector index and in-sector offset.
#[must_use]
pub fn from_global(global: DVec3, sector_size: f64) -> GlobalPosition {
    let size = sanitize_sector_size(sector_size);
    let (sx, ox) = split_axis(global.x, size);
    let (sy, oy) = split_axis(global.y, size);
    let (sz, oz) = split_axis(global.z, size);
    GlobalPosition::new([sx, sy, sz], Vec3::new(ox, oy, oz))
}

fn split_axis(value: f64, size: f64) -> (i32, f32) {
    let sector = (value / size).floor();
    let sector = sector.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
    let offset = (value - f64::from(sector) * size) as f32;
    // Narrowing can round an offset just below `size` up to `size` itself.
    if offset >= size as f32 {
        (sector.saturating_add(1), 0.0)
    } else {
        (sector, offset.max(0.0))
    }
}
