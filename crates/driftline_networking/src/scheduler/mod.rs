//! # Interest Scheduler
//!
//! Decides, per viewer and per low-frequency tick, which entities are worth
//! their bytes.
//!
//! ## Tick pipeline
//!
//! ```text
//! viewer motion ─▶ adapt budget ─▶ gather (sphere query, cull)
//!       ─▶ score (error · weight / cost) ─▶ rank ─▶ admit
//!       ─▶ diff links (wake / dormant) ─▶ SchedulerReport
//! ```
//!
//! Between ticks the owner of the scheduler paces snapshots per link with
//! [`InterestScheduler::due_links`] and reports what it sent with
//! [`InterestScheduler::record_send`]. Those bytes drive the next budget
//! adaptation.
//!
//! A viewer moving faster than `extreme_speed` only keeps its own entity.

mod budget;
mod connection;
mod scoring;
mod stats;

pub use budget::{AimdBudget, BudgetChange};
pub use connection::{ConnectionState, Link, LinkPhase, ViewerMotion};
pub use scoring::{
    admit, class_weight, distance_floor, fov_weight, group_key, horizon, perceptual_error, rank,
    score, size_weight, utility, Admission, AdmissionLimits, Candidate, Kinematics, SCORE_EPSILON,
};
pub use stats::{Ema, EntityStats};

use std::collections::{BTreeMap, HashSet};

use driftline_core::{EntityId, EntityKind, EntityLookup, PerceptualDeadline, SpatialIndex};
use driftline_shared::{ConnectionId, Vec3};

use crate::config::{BudgetConfig, SchedulerConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::flight::FORWARD;
use crate::protocol::MessageTag;

/// Byte cost assumed before any snapshot has been measured.
pub const INITIAL_SNAPSHOT_COST: usize = MessageTag::Snapshot.encoded_size();

/// Outcome of one connection's scheduler tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulerReport {
    /// Connection.
    pub connection: ConnectionId,
    /// Scheduler tick number.
    pub tick: u64,
    /// Entities inside their cull radius.
    pub gathered: usize,
    /// Entities that bypassed scoring.
    pub forced: usize,
    /// Total selected.
    pub selected: usize,
    /// Admitted cost including group headers.
    pub used_bytes: f32,
    /// Admission ceiling.
    pub tick_budget: f32,
    /// Budget after adaptation.
    pub budget: f32,
    /// Utilization of the previous interval.
    pub utilization: f32,
    /// Viewer exceeded the extreme speed.
    pub extreme: bool,
    /// Links that became active.
    pub woken: Vec<(EntityId, EntityKind)>,
    /// Links that became dormant.
    pub dormant: Vec<EntityId>,
}

/// Per-connection relevance selection under an adaptive byte budget.
pub struct InterestScheduler {
    scheduler: SchedulerConfig,
    budget: BudgetConfig,
    group_cell_size: f32,
    deadline: PerceptualDeadline,
    connections: BTreeMap<ConnectionId, ConnectionState>,
    tick_count: u64,
}

impl InterestScheduler {
    /// Creates a scheduler with no connections.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            scheduler: config.scheduler.clone(),
            budget: config.budget.clone(),
            group_cell_size: config.spatial.group_cell_size(),
            deadline: config.scheduler.deadline(),
            connections: BTreeMap::new(),
            tick_count: 0,
        }
    }

    /// Applies new settings. Existing budgets keep their current value.
    pub fn reconfigure(&mut self, config: &SyncConfig) {
        self.scheduler = config.scheduler.clone();
        self.budget = config.budget.clone();
        self.group_cell_size = config.spatial.group_cell_size();
        self.deadline = config.scheduler.deadline();
    }

    /// Active settings.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// Scheduler ticks run so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Registers a viewer.
    pub fn connect(
        &mut self,
        id: ConnectionId,
        viewer: Option<EntityId>,
        now: f64,
    ) -> SyncResult<()> {
        if self.connections.contains_key(&id) {
            return Err(SyncError::AlreadyConnected(id));
        }
        let state = ConnectionState::new(id, viewer, &self.budget, self.scheduler.stats_alpha(), now);
        self.connections.insert(id, state);
        tracing::debug!(connection = id.0, "viewer registered");
        Ok(())
    }

    /// Drops a viewer and all of its links.
    pub fn disconnect(&mut self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.remove(&id)
    }

    /// Changes the entity a viewer controls.
    pub fn set_viewer(&mut self, id: ConnectionId, viewer: Option<EntityId>) -> SyncResult<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(SyncError::UnknownConnection(id))?;
        conn.viewer = viewer;
        Ok(())
    }

    /// State of one viewer.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(&id)
    }

    /// All viewers in id order.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionState> + '_ {
        self.connections.values()
    }

    /// Number of viewers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no viewer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Folds in one RTT sample.
    pub fn observe_rtt(&mut self, id: ConnectionId, rtt: f32) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.observe_rtt(rtt);
        }
    }

    /// Advances pacing clocks by `dt` and collects due `(connection, entity)` pairs.
    pub fn due_links(&mut self, dt: f32, out: &mut Vec<(ConnectionId, EntityId)>) {
        let mut due = Vec::new();
        for (id, conn) in &mut self.connections {
            conn.advance(dt);
            due.clear();
            conn.due_entities(&mut due);
            out.extend(due.iter().map(|entity| (*id, *entity)));
        }
    }

    /// Records a snapshot sent to `id`.
    pub fn record_send(&mut self, id: ConnectionId, entity: EntityId, bytes: usize, serialize_ms: f32) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.mark_sent(entity, bytes, serialize_ms);
        }
    }

    /// Records non-snapshot traffic sent to `id`.
    pub fn record_bytes(&mut self, id: ConnectionId, bytes: usize) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.record_bytes(bytes);
        }
    }

    /// Removes every link to a despawned entity. Returns the viewers that knew it.
    pub fn forget_entity(&mut self, entity: EntityId) -> Vec<ConnectionId> {
        self.connections
            .iter_mut()
            .filter_map(|(id, conn)| conn.forget(entity).then_some(*id))
            .collect()
    }

    /// Rebases smoothed viewer positions after an origin shift.
    pub fn apply_origin_shift(&mut self, delta: Vec3) {
        for conn in self.connections.values_mut() {
            conn.apply_origin_shift(delta);
        }
    }

    /// Runs one scheduler tick for every viewer.
    pub fn tick(
        &mut self,
        index: &mut SpatialIndex,
        lookup: &impl EntityLookup,
    ) -> Vec<SchedulerReport> {
        self.tick_count += 1;
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.tick_connection(id, index, lookup))
            .collect()
    }

    fn tick_connection(
        &mut self,
        id: ConnectionId,
        index: &mut SpatialIndex,
        lookup: &impl EntityLookup,
    ) -> Option<SchedulerReport> {
        let Self {
            scheduler: cfg,
            group_cell_size,
            deadline,
            connections,
            tick_count,
            ..
        } = self;
        let tick = *tick_count;
        let conn = connections.get_mut(&id)?;
        let period = cfg.tick_period();
        let alpha = cfg.stats_alpha();

        let viewer_record = conn.viewer.and_then(|viewer| lookup.get(viewer));
        if let Some(record) = viewer_record {
            conn.motion_mut()
                .observe(record.body.position, record.body.velocity, period, alpha);
            conn.forward = record.body.orientation.rotate(FORWARD);
        }

        let sent = conn.take_sent_bytes();
        let change = conn.budget_mut().adapt(sent);
        if change.changed() {
            tracing::debug!(
                connection = id.0,
                utilization = change.utilization,
                before = change.before,
                after = change.after,
                "budget adapted"
            );
        }
        let tick_budget = conn.budget().tick_budget();

        let viewer_pos = conn.motion().position();
        let viewer_vel = conn.motion().velocity();
        let extreme = viewer_vel.length() > cfg.extreme_speed;
        let tau = horizon(conn.rtt(), period);

        let mut forced = Vec::new();
        if let Some((own, record)) = viewer_record.and_then(|r| conn.viewer.map(|v| (v, r))) {
            let stats = conn.stats_entry(own, alpha, INITIAL_SNAPSHOT_COST as f32);
            stats.last_seen_tick = tick;
            let cost = stats.cost(cfg.serialize_weight, cfg.cost_floor);
            forced.push(Candidate {
                entity: own,
                kind: record.kind,
                distance: 0.0,
                utility: f32::INFINITY,
                cost,
                score: f32::INFINITY,
                group: group_key(record.body.position, *group_cell_size),
                deadline: deadline.min,
            });
        }

        let mut ranked = Vec::new();
        let mut gathered = 0;
        if !extreme {
            let radius = cfg.player_cull_radius.max(cfg.ai_cull_radius);
            for entity in index.query_sphere(viewer_pos, radius, lookup) {
                if Some(entity) == conn.viewer {
                    continue;
                }
                let Some(record) = lookup.get(entity) else {
                    continue;
                };
                let offset = record.body.position - viewer_pos;
                let distance = offset.length();
                let cull = match record.kind {
                    EntityKind::PlayerShip => cfg.player_cull_radius,
                    EntityKind::AiShip => cfg.ai_cull_radius,
                };
                if distance > cull {
                    continue;
                }
                gathered += 1;

                let line_of_sight = offset.normalize_or_zero();
                let relative_velocity = record.body.velocity - viewer_vel;
                let tangential = relative_velocity - line_of_sight * relative_velocity.dot(line_of_sight);

                let stats = conn.stats_entry(entity, alpha, INITIAL_SNAPSHOT_COST as f32);
                stats.observe_motion(relative_velocity, line_of_sight, period);
                stats.last_seen_tick = tick;
                let kinematics = Kinematics {
                    tangential_speed: tangential.length(),
                    accel_noise: stats.accel_noise.value(),
                    jerk_noise: stats.jerk_noise.value(),
                    angular_rate: record.body.angular_velocity.length(),
                    radius: record.radius,
                    distance,
                };
                let cost = stats.cost(cfg.serialize_weight, cfg.cost_floor);
                let apparent_spin = kinematics.angular_rate * record.radius / distance.max(1.0);
                let mut candidate = Candidate {
                    entity,
                    kind: record.kind,
                    distance,
                    utility: 0.0,
                    cost,
                    score: 0.0,
                    group: group_key(record.body.position, *group_cell_size),
                    deadline: deadline.solve(
                        kinematics.tangential_speed,
                        kinematics.accel_noise,
                        apparent_spin,
                        distance,
                    ),
                };

                if distance <= cfg.always_include_radius {
                    candidate.utility = f32::INFINITY;
                    candidate.score = f32::INFINITY;
                    forced.push(candidate);
                    continue;
                }

                let error = perceptual_error(&kinematics, tau, cfg.perceptibility_angle);
                let weight = fov_weight(conn.forward, offset, cfg.fov_half_angle, cfg.fov_floor)
                    * size_weight(record.radius, distance, cfg.size_reference, cfg.size_weight_cap);
                candidate.utility = utility(distance, weight, error, record.kind, cfg);
                candidate.score = score(candidate.utility, cost);
                ranked.push(candidate);
            }
        }
        conn.prune_stats(tick);

        rank(&mut ranked);
        let limits = AdmissionLimits::new(tick_budget, cfg);
        let admission = admit(&forced, &ranked, |e| conn.is_visible(e), &limits);

        let mut woken = Vec::new();
        let mut selected = HashSet::with_capacity(admission.selected.len());
        for candidate in &admission.selected {
            selected.insert(candidate.entity);
            if conn.activate(candidate.entity, candidate.kind, candidate.deadline) {
                woken.push((candidate.entity, candidate.kind));
            }
        }
        let dormant = conn.deactivate_unselected(&selected);

        if extreme {
            tracing::trace!(connection = id.0, speed = viewer_vel.length(), "extreme viewer speed");
        }
        tracing::trace!(
            connection = id.0,
            gathered,
            selected = admission.selected.len(),
            used = admission.used,
            tick_budget,
            "scheduler tick"
        );

        Some(SchedulerReport {
            connection: id,
            tick,
            gathered,
            forced: admission.forced,
            selected: admission.selected.len(),
            used_bytes: admission.used,
            tick_budget,
            budget: conn.budget().budget(),
            utilization: change.utilization,
            extreme,
            woken,
            dormant,
        })
    }
}
