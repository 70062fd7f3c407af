//! # Spatial Index
//!
//! Uniform 3D grid mapping entities to cells.
//!
//! ```text
//!   cell = floor((position - bias) / cell_size)
//!
//!   entries: EntityId ─► CellKey        (O(1) remove / update)
//!   cells:   CellKey  ─► [EntityId]     (range scans)
//! ```
//!
//! ## Consistency
//!
//! The index is **eventually consistent**. An entry is correct as of the
//! last time it was touched. Entities move without telling the index, so
//! [`SpatialIndex::query_sphere`] revalidates every entry it visits against
//! the registry: dead handles are dropped and moved entities relocated.
//! Queries therefore take `&mut self`.

mod deadline;

pub use deadline::{urgency, PerceptualDeadline};

use crate::entity::EntityId;
use crate::registry::EntityLookup;
use driftline_shared::Vec3;
use std::collections::HashMap;

/// Integer cell coordinates.
pub type CellKey = [i32; 3];

/// Smallest cell size accepted.
pub const MIN_CELL_SIZE: f32 = 1.0;

/// Housekeeping counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpatialStats {
    /// Entries moved to their true cell during queries.
    pub relocated: u64,
    /// Dead entries removed during queries or sweeps.
    pub dropped: u64,
    /// Full rehashes performed.
    pub rehashes: u64,
}

/// Uniform grid spatial index.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    cell_size: f32,
    bias: Vec3,
    cells: HashMap<CellKey, Vec<EntityId>>,
    entries: HashMap<EntityId, CellKey>,
    stats: SpatialStats,
}

impl SpatialIndex {
    /// Creates an empty index. Non-positive sizes are clamped.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() {
            cell_size.max(MIN_CELL_SIZE)
        } else {
            MIN_CELL_SIZE
        };
        Self {
            cell_size,
            bias: Vec3::ZERO,
            cells: HashMap::new(),
            entries: HashMap::new(),
            stats: SpatialStats::default(),
        }
    }

    /// Effective cell size.
    #[inline]
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Current grid bias, always a multiple of the cell size.
    #[inline]
    #[must_use]
    pub const fn bias(&self) -> Vec3 {
        self.bias
    }

    /// Number of indexed entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is indexed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Housekeeping counters.
    #[must_use]
    pub const fn stats(&self) -> SpatialStats {
        self.stats
    }

    /// Cell an entity is currently filed under.
    #[must_use]
    pub fn cell_of(&self, id: EntityId) -> Option<CellKey> {
        self.entries.get(&id).copied()
    }

    /// Cell a position falls in under the current bias.
    #[must_use]
    pub fn cell_key(&self, position: Vec3) -> CellKey {
        let axis = |p: f32, b: f32| -> i32 {
            let c = ((p - b) / self.cell_size).floor();
            if c.is_finite() {
                c as i32
            } else {
                0
            }
        };
        [
            axis(position.x, self.bias.x),
            axis(position.y, self.bias.y),
            axis(position.z, self.bias.z),
        ]
    }

    /// Inserts an entity, or moves it if already present.
    pub fn insert(&mut self, id: EntityId, position: Vec3) {
        if self.entries.contains_key(&id) {
            self.update_position(id, position);
            return;
        }
        let key = self.cell_key(position);
        self.entries.insert(id, key);
        self.cells.entry(key).or_default().push(id);
    }

    /// Removes an entity. Returns `false` if it was not indexed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(key) = self.entries.remove(&id) else {
            return false;
        };
        self.detach(id, key);
        true
    }

    /// Refiles an entity after it moved. Unknown entities are ignored.
    pub fn update_position(&mut self, id: EntityId, position: Vec3) {
        let new_key = self.cell_key(position);
        let Some(key) = self.entries.get_mut(&id) else {
            return;
        };
        if *key == new_key {
            return;
        }
        let old_key = std::mem::replace(key, new_key);
        self.detach(id, old_key);
        self.cells.entry(new_key).or_default().push(id);
    }

    /// Replaces the grid bias and rehashes every entry. O(n).
    ///
    /// The bias is snapped to the nearest cell multiple. Dead entities are
    /// dropped during the rehash.
    pub fn set_bias(&mut self, bias: Vec3, lookup: &impl EntityLookup) {
        let snap = |b: f32| {
            let s = (b / self.cell_size).round() * self.cell_size;
            if s.is_finite() {
                s
            } else {
                0.0
            }
        };
        self.bias = Vec3::new(snap(bias.x), snap(bias.y), snap(bias.z));
        self.rehash(lookup);
    }

    /// Rebiases the grid to follow an origin shift.
    ///
    /// Positions and bias move together, so cell boundaries stay put in the
    /// global frame up to the snap.
    pub fn apply_origin_shift(&mut self, delta: Vec3, lookup: &impl EntityLookup) {
        self.set_bias(self.bias + delta, lookup);
    }

    /// Recomputes every entry from current positions.
    pub fn rehash(&mut self, lookup: &impl EntityLookup) {
        let ids: Vec<EntityId> = self.entries.keys().copied().collect();
        self.cells.clear();
        self.entries.clear();
        for id in ids {
            match lookup.position(id) {
                Some(position) => self.insert(id, position),
                None => self.stats.dropped += 1,
            }
        }
        self.stats.rehashes += 1;
    }

    /// Entities within `radius` of `center`.
    ///
    /// Entries visited are revalidated first: dead ones are removed and moved
    /// ones refiled. An entity filed in a cell outside the scanned range is
    /// not found until something touches it.
    pub fn query_sphere(
        &mut self,
        center: Vec3,
        radius: f32,
        lookup: &impl EntityLookup,
    ) -> Vec<EntityId> {
        let radius = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
        let extent = Vec3::new(radius, radius, radius);
        let lo = self.cell_key(center - extent);
        let hi = self.cell_key(center + extent);

        let span = |axis: usize| i64::from(hi[axis]) - i64::from(lo[axis]) + 1;
        let range_cells = span(0).saturating_mul(span(1)).saturating_mul(span(2));

        let in_range = |key: &CellKey| (0..3).all(|axis| key[axis] >= lo[axis] && key[axis] <= hi[axis]);

        // Gather filed members of the covered range.
        let mut visited: Vec<(EntityId, CellKey)> = Vec::new();
        if range_cells as usize > self.cells.len() {
            for (key, members) in &self.cells {
                if in_range(key) {
                    visited.extend(members.iter().map(|id| (*id, *key)));
                }
            }
        } else {
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        let key = [x, y, z];
                        if let Some(members) = self.cells.get(&key) {
                            visited.extend(members.iter().map(|id| (*id, key)));
                        }
                    }
                }
            }
        }

        let radius_sq = radius * radius;
        let mut result = Vec::with_capacity(visited.len());
        for (id, filed) in visited {
            let Some(position) = lookup.position(id) else {
                tracing::trace!(entity = %id, "dropping stale index entry");
                self.remove(id);
                self.stats.dropped += 1;
                continue;
            };
            if self.cell_key(position) != filed {
                self.update_position(id, position);
                self.stats.relocated += 1;
            }
            if position.distance_squared(center) <= radius_sq {
                result.push(id);
            }
        }

        result.sort_unstable();
        result.dedup();
        result
    }

    /// Up to `k` nearest entities within `max_radius`, nearest first.
    pub fn query_k_nearest(
        &mut self,
        center: Vec3,
        k: usize,
        max_radius: f32,
        lookup: &impl EntityLookup,
    ) -> Vec<EntityId> {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<(f32, EntityId)> = self
            .query_sphere(center, max_radius, lookup)
            .into_iter()
            .filter_map(|id| lookup.position(id).map(|p| (p.distance_squared(center), id)))
            .collect();

        if hits.len() > k {
            hits.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            hits.truncate(k);
        }
        hits.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Removes every entry whose entity is no longer alive.
    ///
    /// Returns the number of entries removed.
    pub fn remove_invalids(&mut self, lookup: &impl EntityLookup) -> usize {
        let dead: Vec<EntityId> = self
            .entries
            .keys()
            .filter(|id| !lookup.is_alive(**id))
            .copied()
            .collect();
        for id in &dead {
            self.remove(*id);
        }
        self.stats.dropped += dead.len() as u64;
        dead.len()
    }

    fn detach(&mut self, id: EntityId, key: CellKey) {
        if let Some(members) = self.cells.get_mut(&key) {
            if let Some(slot) = members.iter().position(|member| *member == id) {
                members.swap_remove(slot);
            }
            if members.is_empty() {
                self.cells.remove(&key);
            }
        }
    }
}
