//! # Replication Server
//!
//! Authority host: owns the entity registry, runs every flight model, and
//! replicates to connected viewers through a [`Transport`].
//!
//! ## Frame
//!
//! ```text
//! advance(frame_dt)
//!   ├─ simulation tick × N (high rate)
//!   │    receive inputs/pongs ─▶ step flights ─▶ origin check
//!   │    ─▶ pace due links ─▶ send snapshots ─▶ pings
//!   └─ scheduler tick × M (low rate)
//!        refile index ─▶ InterestScheduler::tick ─▶ wake/dormant ─▶ acks
//! ```
//!
//! Nothing here fails a frame: transport and decode errors are logged and
//! counted, and the offending message is skipped.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use driftline_core::{
    CachedRoster, EntityId, EntityKind, EntityLookup, EntityRecord, EntityRegistry,
    FloatingOriginManager, OriginShift, SpatialIndex,
};
use driftline_shared::{sequence_newer, BodyState, ConnectionId, DVec3, InputRecord, Vec3};

use crate::cadence::{CadenceClock, TickStats};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::flight::Flight;
use crate::protocol::{MessageWriter, PingPayload, SyncMessage};
use crate::scheduler::{InterestScheduler, SchedulerReport};
use crate::sync::EntitySyncChannel;
use crate::transport::Transport;

/// Server traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Snapshots sent.
    pub snapshots_sent: u64,
    /// Snapshot bytes sent.
    pub snapshot_bytes: u64,
    /// Wake notices sent.
    pub wakes_sent: u64,
    /// Dormant notices sent.
    pub dormants_sent: u64,
    /// Acks sent.
    pub acks_sent: u64,
    /// Inputs accepted.
    pub inputs_received: u64,
    /// Inputs for entities the sender does not own.
    pub inputs_rejected: u64,
    /// Datagrams that failed to decode.
    pub decode_errors: u64,
    /// Sends the transport refused.
    pub send_errors: u64,
    /// Origin shifts applied.
    pub origin_shifts: u64,
}

struct ServerEntity {
    channel: EntitySyncChannel,
    flight: Box<dyn Flight>,
    acked: Option<u16>,
}

#[derive(Clone, Copy, Debug)]
struct PingState {
    next_at: f64,
    nonce: u32,
}

/// Authoritative replication host.
pub struct ReplicationServer<T: Transport> {
    config: SyncConfig,
    transport: T,
    registry: EntityRegistry,
    index: SpatialIndex,
    origin: FloatingOriginManager,
    scheduler: InterestScheduler,
    entities: HashMap<EntityId, ServerEntity>,
    pings: BTreeMap<ConnectionId, PingState>,
    cadence: CadenceClock,
    roster: CachedRoster,
    writer: MessageWriter,
    due: Vec<(ConnectionId, EntityId)>,
    stats: ServerStats,
    simulation_timing: TickStats,
    scheduler_timing: TickStats,
    last_reports: Vec<SchedulerReport>,
}

impl<T: Transport> ReplicationServer<T> {
    /// Creates an empty world.
    #[must_use]
    pub fn new(config: SyncConfig, transport: T) -> Self {
        let mut origin =
            FloatingOriginManager::new(config.origin.recenter_radius, config.origin.sector_size);
        origin.set_enabled(config.origin.enabled);
        let cadence = CadenceClock::new(
            config.simulation.tick_rate,
            config.scheduler.tick_rate,
            config.simulation.max_steps_per_frame,
        );
        Self {
            transport,
            registry: EntityRegistry::new(),
            index: SpatialIndex::new(config.spatial.cell_size),
            origin,
            scheduler: InterestScheduler::new(&config),
            entities: HashMap::new(),
            pings: BTreeMap::new(),
            simulation_timing: TickStats::new(cadence.simulation_dt()),
            scheduler_timing: TickStats::new(cadence.scheduler_dt()),
            cadence,
            roster: CachedRoster::new(config.spatial.roster_ttl),
            writer: MessageWriter::new(),
            due: Vec::new(),
            stats: ServerStats::default(),
            last_reports: Vec::new(),
            config,
        }
    }

    /// Server clock (s).
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.cadence.now()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Live entities.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Interest scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &InterestScheduler {
        &self.scheduler
    }

    /// Floating origin.
    #[must_use]
    pub const fn origin(&self) -> &FloatingOriginManager {
        &self.origin
    }

    /// Spatial index.
    #[must_use]
    pub const fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Simulation tick timing.
    #[must_use]
    pub const fn simulation_timing(&self) -> &TickStats {
        &self.simulation_timing
    }

    /// Scheduler tick timing.
    #[must_use]
    pub const fn scheduler_timing(&self) -> &TickStats {
        &self.scheduler_timing
    }

    /// Reports from the most recent scheduler tick.
    #[must_use]
    pub fn last_reports(&self) -> &[SchedulerReport] {
        &self.last_reports
    }

    /// Global position of a live entity.
    #[must_use]
    pub fn global_position(&self, entity: EntityId) -> Option<DVec3> {
        self.registry
            .get(entity)
            .map(|record| self.origin.world_to_global(record.body.position))
    }

    /// Applies new settings to the scheduler and sync channels created later.
    pub fn reconfigure(&mut self, config: SyncConfig) {
        self.scheduler.reconfigure(&config);
        self.origin.set_enabled(config.origin.enabled);
        self.origin.set_recenter_radius(config.origin.recenter_radius);
        self.config = config;
    }

    /// Spawns an entity at a global position.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        global: DVec3,
        mut body: BodyState,
        radius: f32,
        flight: Box<dyn Flight>,
        owner: Option<ConnectionId>,
    ) -> EntityId {
        body.position = self.origin.global_to_world(global);
        let mut record = EntityRecord::new(kind, body, radius);
        if let Some(owner) = owner {
            record = record.with_owner(owner);
        }
        let id = self.registry.spawn(record);
        self.index.insert(id, body.position);
        self.entities.insert(
            id,
            ServerEntity {
                channel: EntitySyncChannel::authority(id, &self.config),
                flight,
                acked: None,
            },
        );
        self.roster.invalidate();
        if let Some(owner) = owner {
            if self.scheduler.set_viewer(owner, Some(id)).is_err() {
                tracing::debug!(connection = owner.0, entity = %id, "owner not connected yet");
            }
        }
        tracing::debug!(entity = %id, ?kind, "spawned");
        id
    }

    /// Destroys an entity and tells every viewer that knew it.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.registry.despawn(entity) {
            return false;
        }
        self.index.remove(entity);
        self.entities.remove(&entity);
        self.roster.invalidate();
        let now = self.now();
        for conn in self.scheduler.forget_entity(entity) {
            if self.send(now, conn, &SyncMessage::Dormant { entity }).is_some() {
                self.stats.dormants_sent += 1;
            }
        }
        tracing::debug!(entity = %entity, "despawned");
        true
    }

    /// Registers a viewer, bound to the entity it owns if one exists.
    pub fn connect(&mut self, conn: ConnectionId) -> SyncResult<()> {
        let viewer = self.registry.owned_by(conn);
        self.scheduler.connect(conn, viewer, self.now())?;
        self.pings.insert(
            conn,
            PingState {
                next_at: self.now(),
                nonce: 0,
            },
        );
        tracing::info!(connection = conn.0, viewer = ?viewer, "viewer connected");
        Ok(())
    }

    /// Discards all state for a viewer.
    pub fn disconnect(&mut self, conn: ConnectionId) -> bool {
        self.pings.remove(&conn);
        let known = self.scheduler.disconnect(conn).is_some();
        if known {
            tracing::info!(connection = conn.0, "viewer disconnected");
        }
        known
    }

    /// Moves the floating origin to `global` and shifts every local cache.
    pub fn set_origin(&mut self, global: DVec3) {
        let shift = self.origin.set_origin(global);
        self.apply_origin_shift(shift);
    }

    fn apply_origin_shift(&mut self, shift: OriginShift) {
        self.registry.apply_origin_shift(shift.delta);
        self.index.apply_origin_shift(shift.delta, &self.registry);
        self.scheduler.apply_origin_shift(shift.delta);
        for server_entity in self.entities.values_mut() {
            server_entity.channel.apply_origin_shift(shift.delta);
        }
        self.stats.origin_shifts += 1;
        tracing::debug!(delta = ?shift.delta, "local caches shifted");
    }

    /// Anchors the floating origin on an entity.
    pub fn set_origin_anchor(&mut self, anchor: Option<EntityId>) {
        self.origin.set_anchor(anchor);
    }

    /// Drives an unowned entity's flight model directly.
    pub fn set_controls(&mut self, entity: EntityId, axes: [f32; 4], look: [f32; 2]) -> bool {
        let dt = self.cadence.simulation_dt();
        match self.entities.get_mut(&entity) {
            Some(server_entity) => {
                server_entity
                    .flight
                    .apply_controls(&InputRecord::new(0, dt, axes, look));
                true
            }
            None => false,
        }
    }

    /// Advances the server clock, running every tick that falls due.
    pub fn advance(&mut self, frame_dt: f64) {
        let steps = self.cadence.advance(frame_dt);
        for _ in 0..steps.simulation {
            let start = self.simulation_timing.begin();
            self.simulation_tick();
            self.simulation_timing.end(start);
        }
        for _ in 0..steps.scheduler {
            let start = self.scheduler_timing.begin();
            self.scheduler_tick();
            self.scheduler_timing.end(start);
        }
    }

    /// One high-rate tick.
    pub fn simulation_tick(&mut self) {
        let now = self.now();
        let dt = self.cadence.simulation_dt();

        self.receive_all(now);

        for (id, server_entity) in &mut self.entities {
            if let Some(record) = self.registry.get_mut(*id) {
                server_entity
                    .channel
                    .authority_step(server_entity.flight.as_mut(), &mut record.body, dt);
            }
        }

        if let Some(shift) = self.origin.tick(&self.registry) {
            self.apply_origin_shift(shift);
        }

        self.send_due_snapshots(now, dt);
        self.send_pings(now);
    }

    /// One low-rate tick.
    pub fn scheduler_tick(&mut self) {
        let now = self.now();

        // Touch every entity at the roster cadence so ones that crossed into
        // an unscanned cell are refiled.
        let (ids, refreshed) = self.roster.ids(now, &self.registry);
        if refreshed {
            for id in ids {
                if let Some(position) = self.registry.get(*id).map(|r| r.body.position) {
                    self.index.update_position(*id, position);
                }
            }
            let swept = self.index.remove_invalids(&self.registry);
            if swept > 0 {
                tracing::trace!(swept, "dead index entries swept");
            }
        }

        let reports = self.scheduler.tick(&mut self.index, &self.registry);
        for report in &reports {
            for (entity, kind) in &report.woken {
                let message = SyncMessage::Wake {
                    entity: *entity,
                    kind: *kind,
                };
                if let Some(bytes) = self.send(now, report.connection, &message) {
                    self.scheduler.record_bytes(report.connection, bytes);
                    self.stats.wakes_sent += 1;
                }
            }
            for entity in &report.dormant {
                let message = SyncMessage::Dormant { entity: *entity };
                if let Some(bytes) = self.send(now, report.connection, &message) {
                    self.scheduler.record_bytes(report.connection, bytes);
                    self.stats.dormants_sent += 1;
                }
            }
        }
        self.last_reports = reports;
        self.send_acks(now);
    }

    fn receive_all(&mut self, now: f64) {
        while let Some((from, bytes)) = self.transport.receive(now) {
            let message = match SyncMessage::decode(&bytes) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(connection = from.0, %err, "undecodable datagram");
                    self.stats.decode_errors += 1;
                    continue;
                }
            };
            match message {
                SyncMessage::Input { entity, input } => {
                    let owned = self
                        .registry
                        .get(entity)
                        .is_some_and(|record| record.owner == Some(from));
                    match self.entities.get_mut(&entity) {
                        Some(server_entity) if owned => {
                            server_entity.channel.receive_input(input);
                            self.stats.inputs_received += 1;
                        }
                        _ => {
                            tracing::trace!(connection = from.0, entity = %entity, "input rejected");
                            self.stats.inputs_rejected += 1;
                        }
                    }
                }
                SyncMessage::Pong(payload) => {
                    let rtt = (now - payload.sent_at) as f32;
                    self.scheduler.observe_rtt(from, rtt);
                }
                SyncMessage::Ping(payload) => {
                    self.send(now, from, &SyncMessage::Pong(payload));
                }
                other => {
                    tracing::trace!(connection = from.0, tag = ?other.tag(), "unexpected message");
                }
            }
        }
    }

    fn send_due_snapshots(&mut self, now: f64, dt: f32) {
        let mut due = std::mem::take(&mut self.due);
        due.clear();
        self.scheduler.due_links(dt, &mut due);
        let origin = self.origin.origin();

        for &(conn, entity) in &due {
            let (Some(record), Some(server_entity)) =
                (self.registry.get(entity), self.entities.get(&entity))
            else {
                continue;
            };
            let start = Instant::now();
            let message = SyncMessage::Snapshot {
                entity,
                snapshot: server_entity.channel.publish(&record.body, origin, now),
            };
            let encoded = message.encode(&mut self.writer);
            let serialize_ms = start.elapsed().as_secs_f32() * 1_000.0;

            let bytes = match encoded {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(%err, "snapshot encoding failed");
                    continue;
                }
            };
            match self
                .transport
                .send(now, conn, message.delivery(), self.writer.as_slice())
            {
                Ok(()) => {
                    self.scheduler.record_send(conn, entity, bytes, serialize_ms);
                    self.stats.snapshots_sent += 1;
                    self.stats.snapshot_bytes += bytes as u64;
                }
                Err(err) => {
                    tracing::warn!(connection = conn.0, %err, "snapshot send failed");
                    self.stats.send_errors += 1;
                }
            }
        }
        self.due = due;
    }

    fn send_pings(&mut self, now: f64) {
        let interval = self.config.simulation.ping_interval.max(0.01);
        let due: Vec<(ConnectionId, u32)> = self
            .pings
            .iter_mut()
            .filter(|(_, ping)| now >= ping.next_at)
            .map(|(conn, ping)| {
                ping.next_at = now + interval;
                ping.nonce = ping.nonce.wrapping_add(1);
                (*conn, ping.nonce)
            })
            .collect();
        for (conn, nonce) in due {
            if let Some(bytes) = self.send(now, conn, &SyncMessage::Ping(PingPayload::new(nonce, now))) {
                self.scheduler.record_bytes(conn, bytes);
            }
        }
    }

    fn send_acks(&mut self, now: f64) {
        let mut acks = Vec::new();
        for (entity, server_entity) in &mut self.entities {
            let Some(sequence) = server_entity.channel.last_processed() else {
                continue;
            };
            let advanced = server_entity
                .acked
                .map_or(true, |acked| sequence_newer(sequence, acked));
            let owner = self.registry.get(*entity).and_then(|record| record.owner);
            if let (true, Some(owner)) = (advanced, owner) {
                server_entity.acked = Some(sequence);
                acks.push((owner, *entity, sequence));
            }
        }
        for (owner, entity, sequence) in acks {
            if let Some(bytes) = self.send(now, owner, &SyncMessage::Ack { entity, sequence }) {
                self.scheduler.record_bytes(owner, bytes);
                self.stats.acks_sent += 1;
            }
        }
    }

    fn send(&mut self, now: f64, to: ConnectionId, message: &SyncMessage) -> Option<usize> {
        let result = message.encode(&mut self.writer).and_then(|bytes| {
            self.transport
                .send(now, to, message.delivery(), self.writer.as_slice())
                .map(|()| bytes)
        });
        match result {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(connection = to.0, tag = ?message.tag(), %err, "send failed");
                self.stats.send_errors += 1;
                None
            }
        }
    }

    /// Moves an entity for tests and tools, bypassing its flight model.
    pub fn teleport(&mut self, entity: EntityId, global: DVec3) -> bool {
        let position = self.origin.global_to_world(global);
        match self.registry.get_mut(entity) {
            Some(record) => {
                record.body.position = position;
                self.index.update_position(entity, position);
                true
            }
            None => false,
        }
    }

    /// Local-frame position of a live entity.
    #[must_use]
    pub fn local_position(&self, entity: EntityId) -> Option<Vec3> {
        self.registry.get(entity).map(|record| record.body.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::SimpleFlight;
    use crate::simulation::NetworkConditions;
    use crate::transport::LoopbackHub;

    fn server() -> ReplicationServer<LoopbackHub> {
        ReplicationServer::new(SyncConfig::default(), LoopbackHub::new())
    }

    #[test]
    fn test_spawn_despawn() {
        let mut server = server();
        let id = server.spawn(
            EntityKind::AiShip,
            DVec3::new(10.0, 0.0, 0.0),
            BodyState::default(),
            5.0,
            Box::<SimpleFlight>::default(),
            None,
        );
        assert!(server.registry().get(id).is_some());
        assert_eq!(server.index().len(), 1);
        assert!(server.despawn(id));
        assert!(!server.despawn(id));
        assert!(server.index().is_empty());
    }

    #[test]
    fn test_connect_binds_owned_entity() {
        let mut server = server();
        let _client = server
            .transport_mut()
            .connect(ConnectionId(1), NetworkConditions::PERFECT, 1)
            .expect("fresh link");
        let ship = server.spawn(
            EntityKind::PlayerShip,
            DVec3::ZERO,
            BodyState::default(),
            10.0,
            Box::<SimpleFlight>::default(),
            Some(ConnectionId(1)),
        );
        server.connect(ConnectionId(1)).expect("fresh viewer");
        assert!(server.connect(ConnectionId(1)).is_err());
        let viewer = server.scheduler().connection(ConnectionId(1)).and_then(|c| c.viewer);
        assert_eq!(viewer, Some(ship));
    }

    #[test]
    fn test_set_origin_keeps_global_positions() {
        let mut server = server();
        let global = DVec3::new(2.0e9, -3.0e8, 5.0e7);
        server.set_origin(global);
        let id = server.spawn(
            EntityKind::AiShip,
            global + DVec3::new(120.0, 0.0, 0.0),
            BodyState::default(),
            5.0,
            Box::<SimpleFlight>::default(),
            None,
        );
        assert_eq!(server.local_position(id), Some(Vec3::new(120.0, 0.0, 0.0)));

        server.set_origin(global + DVec3::new(100.0, 0.0, 0.0));
        assert_eq!(server.local_position(id), Some(Vec3::new(20.0, 0.0, 0.0)));
        let back = server.global_position(id).expect("alive");
        assert!((back.x - (global.x + 120.0)).abs() < 1e-3);
        assert_eq!(server.stats().origin_shifts, 2);
    }

    #[test]
    fn test_cadence_drives_both_ticks() {
        let mut server = server();
        for _ in 0..30 {
            server.advance(1.0 / 30.0);
        }
        assert!(server.simulation_timing().total_ticks >= 29);
        assert!(server.scheduler_timing().total_ticks >= 4);
    }

    #[test]
    fn test_send_to_unknown_connection_is_counted() {
        let mut server = server();
        server.scheduler.connect(ConnectionId(7), None, 0.0).expect("fresh");
        server.pings.insert(ConnectionId(7), PingState { next_at: 0.0, nonce: 0 });
        server.simulation_tick();
        assert_eq!(server.stats().send_errors, 1);
    }
}
