//! # Replication Client
//!
//! Viewer host: predicts its own ship, renders everyone else from
//! interpolation buffers, and keeps a floating origin anchored on the ship.
//!
//! ```text
//! tick(dt, controls)
//!   receive ─▶ Snapshot: own ─▶ reconcile | other ─▶ buffer
//!           ─▶ Wake / Dormant ─▶ create / drop observer
//!           ─▶ Ack ─▶ prune pending   Ping ─▶ Pong
//!   owner_tick ─▶ send Input
//!   origin check ─▶ shift own body and every observer buffer
//! ```

use std::collections::{BTreeMap, HashMap};

use driftline_core::{EntityId, EntityKind, FloatingOriginManager};
use driftline_shared::{BodyState, ConnectionId, DVec3};

use crate::config::SyncConfig;
use crate::flight::Flight;
use crate::protocol::{MessageWriter, SyncMessage};
use crate::sync::{EntitySyncChannel, SnapshotOutcome, TierCounts};
use crate::transport::{Transport, SERVER_CONNECTION};

/// Client traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Snapshots received.
    pub snapshots_received: u64,
    /// Snapshots discarded as stale.
    pub stale_snapshots: u64,
    /// Snapshots for entities never woken or already dormant.
    pub unsolicited_snapshots: u64,
    /// Observer discontinuities.
    pub teleports: u64,
    /// Inputs sent.
    pub inputs_sent: u64,
    /// Datagrams that failed to decode.
    pub decode_errors: u64,
    /// Sends the transport refused.
    pub send_errors: u64,
    /// Origin shifts applied.
    pub origin_shifts: u64,
}

struct OwnedShip {
    entity: EntityId,
    channel: EntitySyncChannel,
    body: BodyState,
    flight: Box<dyn Flight>,
}

/// One viewer's replication endpoint.
pub struct ReplicationClient<T: Transport> {
    id: ConnectionId,
    config: SyncConfig,
    transport: T,
    origin: FloatingOriginManager,
    owned: Option<OwnedShip>,
    observers: BTreeMap<EntityId, EntitySyncChannel>,
    kinds: HashMap<EntityId, EntityKind>,
    writer: MessageWriter,
    now: f64,
    stats: ClientStats,
}

impl<T: Transport> ReplicationClient<T> {
    /// Creates a client with no ship.
    #[must_use]
    pub fn new(id: ConnectionId, config: SyncConfig, transport: T) -> Self {
        let mut origin =
            FloatingOriginManager::new(config.origin.recenter_radius, config.origin.sector_size);
        origin.set_enabled(config.origin.enabled);
        Self {
            id,
            transport,
            origin,
            owned: None,
            observers: BTreeMap::new(),
            kinds: HashMap::new(),
            writer: MessageWriter::new(),
            now: 0.0,
            stats: ClientStats::default(),
            config,
        }
    }

    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Local clock (s).
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Sets the local clock, for hosts that share a clock with the server.
    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> ClientStats {
        self.stats
    }

    /// Floating origin.
    #[must_use]
    pub const fn origin(&self) -> &FloatingOriginManager {
        &self.origin
    }

    /// Transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Takes control of `entity`, which the server placed at `global`.
    ///
    /// The floating origin is moved onto the ship.
    pub fn adopt(&mut self, entity: EntityId, global: DVec3, mut body: BodyState, flight: Box<dyn Flight>) {
        self.origin.set_origin(global);
        body.position = driftline_shared::Vec3::ZERO;
        self.observers.remove(&entity);
        self.owned = Some(OwnedShip {
            entity,
            channel: EntitySyncChannel::owner(entity, &self.config),
            body,
            flight,
        });
    }

    /// Owned entity, if any.
    #[must_use]
    pub fn owned_entity(&self) -> Option<EntityId> {
        self.owned.as_ref().map(|ship| ship.entity)
    }

    /// Predicted body of the owned ship, local frame.
    #[must_use]
    pub fn owned_body(&self) -> Option<&BodyState> {
        self.owned.as_ref().map(|ship| &ship.body)
    }

    /// Predicted global position of the owned ship.
    #[must_use]
    pub fn owned_global(&self) -> Option<DVec3> {
        self.owned
            .as_ref()
            .map(|ship| self.origin.world_to_global(ship.body.position))
    }

    /// Reconciliation tier counts of the owned ship.
    #[must_use]
    pub fn corrections(&self) -> TierCounts {
        self.owned
            .as_ref()
            .map(|ship| ship.channel.correction_counts())
            .unwrap_or_default()
    }

    /// Inputs awaiting acknowledgment.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.owned.as_ref().map_or(0, |ship| ship.channel.pending_inputs())
    }

    /// Entities currently observed, in id order.
    pub fn observed(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.observers.keys().copied()
    }

    /// Replication class announced for `entity`.
    #[must_use]
    pub fn kind_of(&self, entity: EntityId) -> Option<EntityKind> {
        self.kinds.get(&entity).copied()
    }

    /// Interpolated body of an observed entity, local frame.
    #[must_use]
    pub fn observed_state(&self, entity: EntityId) -> Option<BodyState> {
        self.observers.get(&entity)?.sample(self.now)
    }

    /// Interpolated global position of an observed entity.
    #[must_use]
    pub fn observed_global(&self, entity: EntityId) -> Option<DVec3> {
        self.observed_state(entity)
            .map(|body| self.origin.world_to_global(body.position))
    }

    /// Observer channel for `entity`.
    #[must_use]
    pub fn observer(&self, entity: EntityId) -> Option<&EntitySyncChannel> {
        self.observers.get(&entity)
    }

    /// Advances the local clock by `dt`: drains the transport, predicts and
    /// sends this tick's input, then recentres if the ship drifted too far.
    pub fn tick(&mut self, dt: f32, axes: [f32; 4], look: [f32; 2]) {
        self.now += f64::from(dt.max(0.0));
        self.receive_all();

        let now = self.now;
        let input = self.owned.as_mut().and_then(|ship| {
            ship.channel
                .owner_tick(axes, look, dt, ship.flight.as_mut(), &mut ship.body)
                .map(|input| (ship.entity, input))
        });
        if let Some((entity, input)) = input {
            if self.send(now, &SyncMessage::Input { entity, input }) {
                self.stats.inputs_sent += 1;
            }
        }

        let anchor = self.owned.as_ref().map(|ship| ship.body.position);
        if let Some(shift) = anchor.and_then(|position| self.origin.check(position)) {
            if let Some(ship) = self.owned.as_mut() {
                ship.body.position += shift.delta;
                ship.channel.apply_origin_shift(shift.delta);
            }
            for channel in self.observers.values_mut() {
                channel.apply_origin_shift(shift.delta);
            }
            self.stats.origin_shifts += 1;
        }
    }

    fn receive_all(&mut self) {
        let now = self.now;
        while let Some((_, bytes)) = self.transport.receive(now) {
            match SyncMessage::decode(&bytes) {
                Ok(message) => self.handle(now, message),
                Err(err) => {
                    tracing::warn!(connection = self.id.0, %err, "undecodable datagram");
                    self.stats.decode_errors += 1;
                }
            }
        }
    }

    fn handle(&mut self, now: f64, message: SyncMessage) {
        let origin = self.origin.origin();
        match message {
            SyncMessage::Snapshot { entity, snapshot } => {
                self.stats.snapshots_received += 1;
                let outcome = match self.owned.as_mut() {
                    Some(ship) if ship.entity == entity => {
                        ship.channel
                            .owner_receive_snapshot(&snapshot, origin, &mut ship.body)
                    }
                    // A snapshot may overtake its wake notice or trail a dormant one.
                    _ if !self.kinds.contains_key(&entity) => {
                        self.stats.unsolicited_snapshots += 1;
                        return;
                    }
                    _ => {
                        let config = &self.config;
                        self.observers
                            .entry(entity)
                            .or_insert_with(|| EntitySyncChannel::observer(entity, config))
                            .observer_receive_snapshot(&snapshot, now, origin)
                    }
                };
                match outcome {
                    SnapshotOutcome::Stale => self.stats.stale_snapshots += 1,
                    SnapshotOutcome::Teleported => self.stats.teleports += 1,
                    SnapshotOutcome::Appended | SnapshotOutcome::Reconciled(_) => {}
                }
            }
            SyncMessage::Wake { entity, kind } => {
                self.kinds.insert(entity, kind);
                if self.owned_entity() != Some(entity) {
                    let config = &self.config;
                    self.observers
                        .entry(entity)
                        .or_insert_with(|| EntitySyncChannel::observer(entity, config));
                }
            }
            SyncMessage::Dormant { entity } => {
                self.observers.remove(&entity);
                self.kinds.remove(&entity);
            }
            SyncMessage::Ack { entity, sequence } => {
                if let Some(ship) = self.owned.as_mut().filter(|ship| ship.entity == entity) {
                    ship.channel.receive_ack(sequence);
                }
            }
            SyncMessage::Ping(payload) => {
                self.send(now, &SyncMessage::Pong(payload));
            }
            other => {
                tracing::trace!(connection = self.id.0, tag = ?other.tag(), "unexpected message");
            }
        }
    }

    fn send(&mut self, now: f64, message: &SyncMessage) -> bool {
        let result = message.encode(&mut self.writer).and_then(|_| {
            self.transport
                .send(now, SERVER_CONNECTION, message.delivery(), self.writer.as_slice())
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(connection = self.id.0, %err, "send failed");
                self.stats.send_errors += 1;
                false
            }
        }
    }
}
