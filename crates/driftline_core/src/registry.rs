//! # Entity Registry
//!
//! Owns every replicated entity in one process. Slots are recycled through a
//! free list and guarded by a generation counter, so a handle to a destroyed
//! entity can never resolve to its successor.
//!
//! Consumers that only need to read go through [`EntityLookup`]; the spatial
//! index and the scheduler never hold references into the registry.

use crate::entity::{EntityId, EntityKind};
use driftline_shared::{BodyState, ConnectionId, Vec3};

/// Per-entity state held by the registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityRecord {
    /// Replication class.
    pub kind: EntityKind,
    /// Connection that controls this entity, if any.
    pub owner: Option<ConnectionId>,
    /// Kinematic state in the local (floating origin) frame.
    pub body: BodyState,
    /// Bounding radius, used for apparent size and self-rotation error.
    pub radius: f32,
}

impl EntityRecord {
    /// Creates a record at rest.
    #[must_use]
    pub fn new(kind: EntityKind, body: BodyState, radius: f32) -> Self {
        Self {
            kind,
            owner: None,
            body,
            radius: radius.max(0.0),
        }
    }

    /// Sets the controlling connection.
    #[must_use]
    pub fn with_owner(mut self, owner: ConnectionId) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Read access to live entities.
///
/// Every dereference of an [`EntityId`] goes through here and fails softly
/// for dead or stale handles.
pub trait EntityLookup {
    /// Returns the record if the handle is alive.
    fn get(&self, id: EntityId) -> Option<&EntityRecord>;

    /// Checks liveness.
    fn is_alive(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Current local position of a live entity.
    fn position(&self, id: EntityId) -> Option<Vec3> {
        self.get(id).map(|record| record.body.position)
    }
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    record: Option<EntityRecord>,
}

/// Generational entity storage.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    alive_count: usize,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with room for `capacity` entities before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_indices: Vec::with_capacity(capacity),
            alive_count: 0,
        }
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.alive_count
    }

    /// True when no entity is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.alive_count == 0
    }

    /// Spawns an entity, reusing a free slot when one exists.
    pub fn spawn(&mut self, record: EntityRecord) -> EntityId {
        self.alive_count += 1;

        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            // Bump generation to invalidate old references
            slot.generation = slot.generation.wrapping_add(1);
            slot.record = Some(record);
            return EntityId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        EntityId::new(index, 0)
    }

    /// Destroys an entity.
    ///
    /// Returns `false` if the handle was already dead or stale.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        if slot.record.take().is_none() {
            return false;
        }
        self.alive_count -= 1;
        self.free_indices.push(id.index());
        true
    }

    /// Mutable access to a live entity.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.slot_mut(id).and_then(|slot| slot.record.as_mut())
    }

    /// Iterates live entities.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityRecord)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.record
                .as_ref()
                .map(|record| (EntityId::new(index as u32, slot.generation), record))
        })
    }

    /// Iterates live entities mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut EntityRecord)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.record
                .as_mut()
                .map(|record| (EntityId::new(index as u32, generation), record))
        })
    }

    /// Handles of all live entities.
    #[must_use]
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Entity controlled by `owner`, if any.
    #[must_use]
    pub fn owned_by(&self, owner: ConnectionId) -> Option<EntityId> {
        self.iter()
            .find(|(_, record)| record.owner == Some(owner))
            .map(|(id, _)| id)
    }

    /// Translates every local position by an origin shift delta.
    pub fn apply_origin_shift(&mut self, delta: Vec3) {
        for (_, record) in self.iter_mut() {
            record.body.position += delta;
        }
    }

    fn slot(&self, id: EntityId) -> Option<&Slot> {
        if id.is_null() {
            return None;
        }
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
    }

    fn slot_mut(&mut self, id: EntityId) -> Option<&mut Slot> {
        if id.is_null() {
            return None;
        }
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
    }
}

impl EntityLookup for EntityRegistry {
    fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.slot(id).and_then(|slot| slot.record.as_ref())
    }
}

/// Snapshot of live entity handles refreshed on a fixed time-to-live.
///
/// Sweeps that only need an approximate roster (index cleanup, dropping
/// channels of destroyed entities) read this instead of scanning the
/// registry every tick. Between refreshes the list may contain dead
/// handles; callers still check liveness through [`EntityLookup`].
#[derive(Clone, Debug)]
pub struct CachedRoster {
    ids: Vec<EntityId>,
    ttl: f64,
    refreshed_at: Option<f64>,
    refresh_count: u64,
}

impl CachedRoster {
    /// Creates an empty roster that refreshes every `ttl` seconds.
    #[must_use]
    pub fn new(ttl: f64) -> Self {
        Self {
            ids: Vec::new(),
            ttl: if ttl.is_finite() { ttl.max(0.0) } else { 0.0 },
            refreshed_at: None,
            refresh_count: 0,
        }
    }

    /// True when the roster must be rebuilt at time `now`.
    #[must_use]
    pub fn is_stale(&self, now: f64) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => now - at >= self.ttl || now < at,
        }
    }

    /// Forces a rebuild on the next access.
    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    /// Returns the roster, rebuilding it first if the TTL has elapsed.
    ///
    /// The boolean is true when this call refreshed.
    pub fn ids(&mut self, now: f64, registry: &EntityRegistry) -> (&[EntityId], bool) {
        let refreshed = self.is_stale(now);
        if refreshed {
            self.ids.clear();
            self.ids.extend(registry.iter().map(|(id, _)| id));
            self.refreshed_at = Some(now);
            self.refresh_count += 1;
        }
        (&self.ids, refreshed)
    }

    /// Number of rebuilds so far.
    #[must_use]
    pub const fn refresh_count(&self) -> u64 {
        self.refresh_count
    }
}
