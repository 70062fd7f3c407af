//! # Per-Viewer Connection State
//!
//! Everything the scheduler remembers about one viewer between ticks.
//!
//! ## Link lifecycle
//!
//! ```text
//!            selected               not selected
//! Unknown ───────────▶ Active ─────────────────▶ Dormant
//!                        ▲                          │
//!                        └──────── selected ────────┘
//! ```
//!
//! Links are never destroyed by deselection. They disappear only when the
//! entity itself is despawned.

use std::collections::{BTreeMap, HashMap};

use driftline_core::{urgency, EntityId, EntityKind};
use driftline_shared::{ConnectionId, Vec3};

use super::budget::AimdBudget;
use super::stats::{Ema, EntityStats};
use crate::config::BudgetConfig;

/// Replication phase of a known link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkPhase {
    /// Selected and paced.
    Active,
    /// Known but not replicated.
    Dormant,
}

/// One viewer's view of one entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Link {
    /// Phase.
    pub phase: LinkPhase,
    /// Replication class.
    pub kind: EntityKind,
    /// Perceptual deadline (s).
    pub deadline: f32,
    /// Time since the last snapshot (s).
    pub since_send: f32,
    /// Send on the next pacing pass regardless of urgency.
    pub wake_pending: bool,
}

impl Link {
    fn activated(kind: EntityKind, deadline: f32) -> Self {
        Self {
            phase: LinkPhase::Active,
            kind,
            deadline,
            since_send: 0.0,
            wake_pending: true,
        }
    }

    /// Whether a snapshot is owed.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.phase == LinkPhase::Active
            && (self.wake_pending || urgency(self.since_send, self.deadline) >= 1.0)
    }
}

/// Smoothed viewer motion.
///
/// The position estimate is predicted forward with the smoothed velocity
/// before blending in the measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewerMotion {
    position: Vec3,
    velocity: Vec3,
    initialized: bool,
}

impl ViewerMotion {
    /// Folds in one observation taken `dt` seconds after the previous.
    pub fn observe(&mut self, position: Vec3, velocity: Vec3, dt: f32, alpha: f32) {
        if !(position.is_finite() && velocity.is_finite()) {
            return;
        }
        if !self.initialized {
            self.position = position;
            self.velocity = velocity;
            self.initialized = true;
            return;
        }
        let predicted = self.position + self.velocity * dt.max(0.0);
        self.position = predicted.lerp(position, alpha);
        self.velocity = self.velocity.lerp(velocity, alpha);
    }

    /// Smoothed position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Smoothed velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Whether any observation has been made.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shift(&mut self, delta: Vec3) {
        self.position += delta;
    }
}

/// Scheduler state for one viewer.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    /// Connection.
    pub id: ConnectionId,
    /// Entity the viewer controls, if any.
    pub viewer: Option<EntityId>,
    /// Facing used for the field-of-view weight.
    pub forward: Vec3,
    /// When the connection was registered.
    pub connected_at: f64,
    motion: ViewerMotion,
    rtt: Ema,
    budget: AimdBudget,
    links: BTreeMap<EntityId, Link>,
    stats: HashMap<EntityId, EntityStats>,
    sent_this_interval: f32,
}

impl ConnectionState {
    /// Creates state for a fresh connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        viewer: Option<EntityId>,
        budget: &BudgetConfig,
        rtt_alpha: f32,
        now: f64,
    ) -> Self {
        Self {
            id,
            viewer,
            forward: Vec3::ZERO,
            connected_at: now,
            motion: ViewerMotion::default(),
            // 100ms until the first probe returns
            rtt: Ema::with_initial(rtt_alpha, 0.1),
            budget: AimdBudget::new(budget),
            links: BTreeMap::new(),
            stats: HashMap::new(),
            sent_this_interval: 0.0,
        }
    }

    /// Smoothed viewer motion.
    #[must_use]
    pub const fn motion(&self) -> &ViewerMotion {
        &self.motion
    }

    pub(crate) fn motion_mut(&mut self) -> &mut ViewerMotion {
        &mut self.motion
    }

    /// Smoothed round-trip time (s).
    #[must_use]
    pub const fn rtt(&self) -> f32 {
        self.rtt.value()
    }

    /// Folds in one RTT sample.
    pub fn observe_rtt(&mut self, rtt: f32) {
        if rtt >= 0.0 {
            self.rtt.update(rtt);
        }
    }

    /// Budget controller.
    #[must_use]
    pub const fn budget(&self) -> &AimdBudget {
        &self.budget
    }

    pub(crate) fn budget_mut(&mut self) -> &mut AimdBudget {
        &mut self.budget
    }

    /// Bytes sent since the last scheduler tick.
    #[must_use]
    pub const fn sent_this_interval(&self) -> f32 {
        self.sent_this_interval
    }

    pub(crate) fn take_sent_bytes(&mut self) -> f32 {
        std::mem::take(&mut self.sent_this_interval)
    }

    /// Phase of the link to `entity`; `None` when unknown.
    #[must_use]
    pub fn phase(&self, entity: EntityId) -> Option<LinkPhase> {
        self.links.get(&entity).map(|link| link.phase)
    }

    /// Link to `entity`.
    #[must_use]
    pub fn link(&self, entity: EntityId) -> Option<&Link> {
        self.links.get(&entity)
    }

    /// Whether `entity` is in the visible set.
    #[must_use]
    pub fn is_visible(&self, entity: EntityId) -> bool {
        self.phase(entity) == Some(LinkPhase::Active)
    }

    /// Visible set, in id order.
    pub fn visible(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.links
            .iter()
            .filter(|(_, link)| link.phase == LinkPhase::Active)
            .map(|(id, _)| *id)
    }

    /// Number of visible entities.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.visible().count()
    }

    /// Statistics for `entity`.
    #[must_use]
    pub fn stats(&self, entity: EntityId) -> Option<&EntityStats> {
        self.stats.get(&entity)
    }

    pub(crate) fn stats_entry(&mut self, entity: EntityId, alpha: f32, bytes: f32) -> &mut EntityStats {
        self.stats
            .entry(entity)
            .or_insert_with(|| EntityStats::new(alpha, bytes))
    }

    /// Drops statistics for entities neither linked nor seen since `tick`.
    pub(crate) fn prune_stats(&mut self, tick: u64) {
        let links = &self.links;
        self.stats
            .retain(|id, stats| stats.last_seen_tick >= tick || links.contains_key(id));
    }

    /// Marks `entity` selected. Returns true on a wake transition.
    pub(crate) fn activate(&mut self, entity: EntityId, kind: EntityKind, deadline: f32) -> bool {
        match self.links.get_mut(&entity) {
            Some(link) if link.phase == LinkPhase::Active => {
                link.deadline = deadline;
                link.kind = kind;
                false
            }
            Some(link) => {
                *link = Link::activated(kind, deadline);
                true
            }
            None => {
                self.links.insert(entity, Link::activated(kind, deadline));
                true
            }
        }
    }

    /// Moves every active link not in `selected` to dormant.
    pub(crate) fn deactivate_unselected(
        &mut self,
        selected: &std::collections::HashSet<EntityId>,
    ) -> Vec<EntityId> {
        let mut dormant = Vec::new();
        for (id, link) in &mut self.links {
            if link.phase == LinkPhase::Active && !selected.contains(id) {
                link.phase = LinkPhase::Dormant;
                link.wake_pending = false;
                dormant.push(*id);
            }
        }
        dormant
    }

    /// Advances pacing clocks of active links.
    pub fn advance(&mut self, dt: f32) {
        for link in self.links.values_mut() {
            if link.phase == LinkPhase::Active {
                link.since_send += dt;
            }
        }
    }

    /// Appends entities owed a snapshot.
    pub fn due_entities(&self, out: &mut Vec<EntityId>) {
        out.extend(
            self.links
                .iter()
                .filter(|(_, link)| link.is_due())
                .map(|(id, _)| *id),
        );
    }

    /// Records a snapshot sent to this viewer.
    pub fn mark_sent(&mut self, entity: EntityId, bytes: usize, serialize_ms: f32) {
        if let Some(link) = self.links.get_mut(&entity) {
            link.since_send = 0.0;
            link.wake_pending = false;
        }
        if let Some(stats) = self.stats.get_mut(&entity) {
            stats.record_send(bytes, serialize_ms);
        }
        self.sent_this_interval += bytes as f32;
    }

    /// Records other traffic counted against the budget.
    pub fn record_bytes(&mut self, bytes: usize) {
        self.sent_this_interval += bytes as f32;
    }

    /// Forgets a despawned entity.
    pub fn forget(&mut self, entity: EntityId) -> bool {
        self.stats.remove(&entity);
        if self.viewer == Some(entity) {
            self.viewer = None;
        }
        self.links.remove(&entity).is_some()
    }

    /// Rebases the motion estimate after an origin shift.
    pub fn apply_origin_shift(&mut self, delta: Vec3) {
        self.motion.shift(delta);
    }
}
