//! Per-entity synchronization endpoint in one of three roles.

use driftline_core::EntityId;
use driftline_shared::{sequence_newer, BodyState, DVec3, InputRecord, NetSnapshot, Vec3};

use super::buffer::InterpolationBuffer;
use super::clock::ClockSync;
use super::reconcile::{CorrectionTier, PendingInputQueue, Reconciler, TierCounts};
use crate::config::{InterpolationConfig, SyncConfig};
use crate::flight::Flight;

/// Role of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncRole {
    /// Ground truth; consumes inputs and publishes snapshots.
    Authority,
    /// Locally controlled copy that predicts and reconciles.
    Owner,
    /// Remote copy rendered by interpolation.
    Observer,
}

/// What happened to an incoming snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Older than or equal to one already applied.
    Stale,
    /// Appended to the interpolation buffer.
    Appended,
    /// Discontinuity: buffer reset to this sample.
    Teleported,
    /// Used for owner reconciliation.
    Reconciled(CorrectionTier),
}

#[derive(Clone, Debug, Default)]
struct AuthorityState {
    latched: Option<InputRecord>,
    fresh: bool,
    last_processed: Option<u16>,
    inputs_received: u64,
}

#[derive(Clone, Debug)]
struct OwnerState {
    next_sequence: u16,
    pending: PendingInputQueue,
    reconciler: Reconciler,
    last_server_time: f64,
}

#[derive(Clone, Debug)]
struct ObserverState {
    clock: ClockSync,
    buffer: InterpolationBuffer,
    last_server_time: f64,
    last_global: Option<(DVec3, Vec3)>,
    teleports: u64,
}

#[derive(Clone, Debug)]
enum RoleState {
    Authority(AuthorityState),
    Owner(OwnerState),
    Observer(ObserverState),
}

/// Synchronization state for one entity on one host.
///
/// Role-specific calls made in the wrong role are ignored.
#[derive(Clone, Debug)]
pub struct EntitySyncChannel {
    entity: EntityId,
    interpolation: InterpolationConfig,
    state: RoleState,
}

impl EntitySyncChannel {
    /// Authority endpoint.
    #[must_use]
    pub fn authority(entity: EntityId, config: &SyncConfig) -> Self {
        Self {
            entity,
            interpolation: config.interpolation.clone(),
            state: RoleState::Authority(AuthorityState::default()),
        }
    }

    /// Owner endpoint.
    #[must_use]
    pub fn owner(entity: EntityId, config: &SyncConfig) -> Self {
        Self {
            entity,
            interpolation: config.interpolation.clone(),
            state: RoleState::Owner(OwnerState {
                next_sequence: 0,
                pending: PendingInputQueue::new(),
                reconciler: Reconciler::new(&config.reconciliation),
                last_server_time: f64::NEG_INFINITY,
            }),
        }
    }

    /// Observer endpoint.
    #[must_use]
    pub fn observer(entity: EntityId, config: &SyncConfig) -> Self {
        Self {
            entity,
            interpolation: config.interpolation.clone(),
            state: RoleState::Observer(ObserverState {
                clock: ClockSync::new(&config.interpolation),
                buffer: InterpolationBuffer::new(config.interpolation.window),
                last_server_time: f64::NEG_INFINITY,
                last_global: None,
                teleports: 0,
            }),
        }
    }

    /// Entity this channel replicates.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// Current role.
    #[must_use]
    pub const fn role(&self) -> SyncRole {
        match self.state {
            RoleState::Authority(_) => SyncRole::Authority,
            RoleState::Owner(_) => SyncRole::Owner,
            RoleState::Observer(_) => SyncRole::Observer,
        }
    }

    // ---- authority ----

    /// Latches an arrived input. The most recent arrival wins regardless of
    /// sequence; the acknowledged sequence only moves forward.
    pub fn receive_input(&mut self, input: InputRecord) {
        let RoleState::Authority(state) = &mut self.state else {
            return;
        };
        state.latched = Some(input);
        state.fresh = true;
        state.inputs_received += 1;
        state.last_processed = match state.last_processed {
            Some(last) if !sequence_newer(input.sequence, last) => Some(last),
            _ => Some(input.sequence),
        };
    }

    /// Advances the authoritative body one simulation step.
    pub fn authority_step(&mut self, flight: &mut dyn Flight, body: &mut BodyState, dt: f32) {
        if let RoleState::Authority(state) = &mut self.state {
            if state.fresh {
                if let Some(input) = &state.latched {
                    flight.apply_controls(input);
                }
                state.fresh = false;
            }
        }
        flight.step(body, dt);
    }

    /// Highest input sequence applied.
    #[must_use]
    pub fn last_processed(&self) -> Option<u16> {
        match &self.state {
            RoleState::Authority(state) => state.last_processed,
            _ => None,
        }
    }

    /// Inputs received so far.
    #[must_use]
    pub fn inputs_received(&self) -> u64 {
        match &self.state {
            RoleState::Authority(state) => state.inputs_received,
            _ => 0,
        }
    }

    /// Quantized snapshot of `body`, stamped for publication.
    #[must_use]
    pub fn publish(&self, body: &BodyState, origin: DVec3, server_time: f64) -> NetSnapshot {
        NetSnapshot::quantize(body, origin, server_time, self.last_processed().unwrap_or(0))
    }

    // ---- owner ----

    /// Packages controls for this tick, queues them and predicts locally.
    ///
    /// Returns the input to send; `None` outside the owner role.
    pub fn owner_tick(
        &mut self,
        axes: [f32; 4],
        look: [f32; 2],
        dt: f32,
        flight: &mut dyn Flight,
        body: &mut BodyState,
    ) -> Option<InputRecord> {
        let RoleState::Owner(state) = &mut self.state else {
            return None;
        };
        let input = InputRecord::new(state.next_sequence, dt, axes, look);
        state.next_sequence = state.next_sequence.wrapping_add(1);
        state.pending.push(input);

        flight.apply_controls(&input);
        flight.step(body, dt);
        state.reconciler.step(body, dt);
        Some(input)
    }

    /// Prunes pending inputs at or before `sequence`.
    pub fn receive_ack(&mut self, sequence: u16) -> usize {
        match &mut self.state {
            RoleState::Owner(state) => state.pending.ack(sequence),
            _ => 0,
        }
    }

    /// Reconciles the predicted `body` against an authoritative snapshot.
    ///
    /// The snapshot is moved into the local frame in double precision and
    /// advanced by the lead time of the inputs it has not yet seen.
    pub fn owner_receive_snapshot(
        &mut self,
        snapshot: &NetSnapshot,
        client_origin: DVec3,
        body: &mut BodyState,
    ) -> SnapshotOutcome {
        let RoleState::Owner(state) = &mut self.state else {
            return SnapshotOutcome::Stale;
        };
        if snapshot.server_time <= state.last_server_time {
            return SnapshotOutcome::Stale;
        }
        state.last_server_time = snapshot.server_time;
        state.pending.ack(snapshot.last_ack);

        let target = localize(snapshot, client_origin).extrapolated(state.pending.lead_time());
        let tier = state.reconciler.reconcile(body, &target);
        if tier.is_hard() {
            state.pending.clear();
        }
        SnapshotOutcome::Reconciled(tier)
    }

    /// Inputs awaiting acknowledgment.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        match &self.state {
            RoleState::Owner(state) => state.pending.len(),
            _ => 0,
        }
    }

    /// Reconciliation tier counts.
    #[must_use]
    pub fn correction_counts(&self) -> TierCounts {
        match &self.state {
            RoleState::Owner(state) => state.reconciler.counts(),
            _ => TierCounts::default(),
        }
    }

    // ---- observer ----

    /// Buffers an authoritative snapshot received at `local_now`.
    pub fn observer_receive_snapshot(
        &mut self,
        snapshot: &NetSnapshot,
        local_now: f64,
        client_origin: DVec3,
    ) -> SnapshotOutcome {
        let teleport_distance = self.interpolation.teleport_distance;
        let RoleState::Observer(state) = &mut self.state else {
            return SnapshotOutcome::Stale;
        };
        if snapshot.server_time <= state.last_server_time {
            return SnapshotOutcome::Stale;
        }
        state.clock.observe(snapshot.server_time, local_now);
        let time = state.clock.to_local(snapshot.server_time);
        let body = localize(snapshot, client_origin);
        let global = snapshot.global_position();

        // Compare against the previous sample carried forward, in the global frame.
        let jump = state.last_global.map(|(position, velocity)| {
            let elapsed = snapshot.server_time - state.last_server_time;
            global.distance(position + velocity.as_dvec3() * elapsed)
        });
        state.last_server_time = snapshot.server_time;
        state.last_global = Some((global, body.velocity));

        if jump.is_some_and(|jump| jump > teleport_distance) {
            state.buffer.reset_to(time, body);
            state.teleports += 1;
            tracing::debug!(entity = %self.entity, jump = jump.unwrap_or_default(), "teleport");
            return SnapshotOutcome::Teleported;
        }
        if state.buffer.push(time, body) {
            SnapshotOutcome::Appended
        } else {
            SnapshotOutcome::Stale
        }
    }

    /// Render-time body: `Tq = now − delay + lead_bias`.
    #[must_use]
    pub fn sample(&self, local_now: f64) -> Option<BodyState> {
        let RoleState::Observer(state) = &self.state else {
            return None;
        };
        let delay = state.clock.delay();
        let tq = local_now - f64::from(delay) + f64::from(self.interpolation.lead_bias);
        state.buffer.sample(tq, self.interpolation.max_extrapolation)
    }

    /// Current adaptive interpolation delay (s).
    #[must_use]
    pub fn interpolation_delay(&self) -> Option<f32> {
        match &self.state {
            RoleState::Observer(state) => Some(state.clock.delay()),
            _ => None,
        }
    }

    /// Discontinuities seen.
    #[must_use]
    pub fn teleports(&self) -> u64 {
        match &self.state {
            RoleState::Observer(state) => state.teleports,
            _ => 0,
        }
    }

    /// Buffered snapshots.
    #[must_use]
    pub fn buffered(&self) -> usize {
        match &self.state {
            RoleState::Observer(state) => state.buffer.len(),
            _ => 0,
        }
    }

    // ---- all roles ----

    /// Rebases stored local positions after an origin shift.
    pub fn apply_origin_shift(&mut self, delta: Vec3) {
        match &mut self.state {
            RoleState::Authority(_) => {}
            RoleState::Owner(state) => state.reconciler.shift(delta),
            RoleState::Observer(state) => state.buffer.shift(delta),
        }
    }
}

/// Snapshot body with its position rebased onto `client_origin`.
fn localize(snapshot: &NetSnapshot, client_origin: DVec3) -> BodyState {
    let mut body = snapshot.body();
    body.position = (snapshot.global_position() - client_origin).as_vec3();
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::SimpleFlight;

    fn entity() -> EntityId {
        EntityId::new(1, 0)
    }

    fn moving(x: f32, vx: f32) -> BodyState {
        BodyState {
            velocity: Vec3::new(vx, 0.0, 0.0),
            ..BodyState::at(Vec3::new(x, 0.0, 0.0))
        }
    }

    #[test]
    fn test_authority_latest_arrival_wins() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::authority(entity(), &config);
        channel.receive_input(InputRecord::new(5, 0.033, [1.0, 0.0, 0.0, 0.0], [0.0; 2]));
        channel.receive_input(InputRecord::new(3, 0.033, [0.0; 4], [0.0; 2]));
        assert_eq!(channel.last_processed(), Some(5));

        let mut flight = SimpleFlight::default();
        let mut body = BodyState::default();
        channel.authority_step(&mut flight, &mut body, 0.1);
        assert_eq!(flight.controls().sequence, 3);
        assert_eq!(channel.publish(&body, DVec3::ZERO, 1.0).last_ack, 5);
    }

    #[test]
    fn test_owner_queues_and_predicts() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::owner(entity(), &config);
        let mut flight = SimpleFlight::default();
        let mut body = BodyState::default();
        for expected in 0..3u16 {
            let input = channel
                .owner_tick([1.0, 0.0, 0.0, 0.0], [0.0; 2], 0.1, &mut flight, &mut body)
                .expect("owner role");
            assert_eq!(input.sequence, expected);
        }
        assert_eq!(channel.pending_inputs(), 3);
        assert!(body.velocity.z > 0.0);
        assert_eq!(channel.receive_ack(1), 2);
        assert_eq!(channel.pending_inputs(), 1);
    }

    #[test]
    fn test_owner_snapshot_reconciles_and_prunes() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::owner(entity(), &config);
        let mut flight = SimpleFlight::default();
        let mut body = BodyState::default();
        channel.owner_tick([0.0; 4], [0.0; 2], 0.1, &mut flight, &mut body);

        let far = NetSnapshot::quantize(&BodyState::at(Vec3::new(500.0, 0.0, 0.0)), DVec3::ZERO, 1.0, 0);
        assert_eq!(
            channel.owner_receive_snapshot(&far, DVec3::ZERO, &mut body),
            SnapshotOutcome::Reconciled(CorrectionTier::HardSnap)
        );
        assert!((body.position.x - 500.0).abs() < 0.01);
        assert_eq!(channel.pending_inputs(), 0);
        assert_eq!(
            channel.owner_receive_snapshot(&far, DVec3::ZERO, &mut body),
            SnapshotOutcome::Stale
        );
    }

    #[test]
    fn test_owner_reconciles_in_global_frame() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::owner(entity(), &config);
        let mut body = BodyState::at(Vec3::new(10.0, 0.0, 0.0));
        // Authority sampled the same point relative to a different origin.
        let snapshot = NetSnapshot::quantize(
            &BodyState::at(Vec3::new(-990.0, 0.0, 0.0)),
            DVec3::new(1.0e9 + 1_000.0, 0.0, 0.0),
            1.0,
            0,
        );
        let outcome = channel.owner_receive_snapshot(&snapshot, DVec3::new(1.0e9, 0.0, 0.0), &mut body);
        assert_eq!(outcome, SnapshotOutcome::Reconciled(CorrectionTier::Negligible));
    }

    #[test]
    fn test_observer_appends_then_teleports() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::observer(entity(), &config);
        let origin = DVec3::ZERO;
        for i in 0..5 {
            let t = f64::from(i) * 0.1;
            let snapshot = NetSnapshot::quantize(&moving(t as f32 * 100.0, 100.0), origin, t, 0);
            assert_eq!(
                channel.observer_receive_snapshot(&snapshot, t + 0.05, origin),
                SnapshotOutcome::Appended
            );
        }
        let stale = NetSnapshot::quantize(&moving(0.0, 0.0), origin, 0.2, 0);
        assert_eq!(channel.observer_receive_snapshot(&stale, 0.6, origin), SnapshotOutcome::Stale);

        let jump = NetSnapshot::quantize(&moving(1.0e6, 0.0), origin, 0.5, 0);
        assert_eq!(
            channel.observer_receive_snapshot(&jump, 0.55, origin),
            SnapshotOutcome::Teleported
        );
        assert_eq!(channel.buffered(), 1);
        assert_eq!(channel.teleports(), 1);
    }

    #[test]
    fn test_teleport_threshold_edges() {
        let config = SyncConfig::default();
        let threshold = config.interpolation.teleport_distance as f32;
        let mut channel = EntitySyncChannel::observer(entity(), &config);
        let origin = DVec3::ZERO;
        let at = |x: f32, t: f64| NetSnapshot::quantize(&moving(x, 0.0), origin, t, 0);

        channel.observer_receive_snapshot(&at(0.0, 0.0), 0.05, origin);
        assert_eq!(
            channel.observer_receive_snapshot(&at(threshold + 1.0, 0.1), 0.15, origin),
            SnapshotOutcome::Teleported
        );
        assert_eq!(channel.buffered(), 1);

        // Just under the threshold from the new resting point.
        let next = threshold + 1.0 + (threshold - 1.0);
        assert_eq!(
            channel.observer_receive_snapshot(&at(next, 0.2), 0.25, origin),
            SnapshotOutcome::Appended
        );
        assert_eq!(channel.buffered(), 2);
        assert_eq!(channel.teleports(), 1);

        // Between the two nodes the body is blended, not snapped.
        let delay = f64::from(channel.interpolation_delay().expect("observer"));
        let now = 0.2 + delay - f64::from(config.interpolation.lead_bias);
        let mid = channel.sample(now).expect("buffered");
        assert!(mid.position.x > threshold + 1.0 && mid.position.x < next);
    }

    #[test]
    fn test_origin_change_is_not_a_teleport() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::observer(entity(), &config);
        let first = NetSnapshot::quantize(&moving(4_000.0, 0.0), DVec3::ZERO, 0.0, 0);
        channel.observer_receive_snapshot(&first, 0.05, DVec3::ZERO);

        // Authority recentred: same global point, new origin and local offset.
        let second = NetSnapshot::quantize(&moving(0.0, 0.0), DVec3::new(4_000.0, 0.0, 0.0), 0.1, 0);
        assert_eq!(
            channel.observer_receive_snapshot(&second, 0.15, DVec3::ZERO),
            SnapshotOutcome::Appended
        );
    }

    #[test]
    fn test_observer_sample_and_shift() {
        let config = SyncConfig::default();
        let mut channel = EntitySyncChannel::observer(entity(), &config);
        let origin = DVec3::ZERO;
        for i in 0..10 {
            let t = f64::from(i) * 0.1;
            let snapshot = NetSnapshot::quantize(&moving(t as f32 * 10.0, 10.0), origin, t, 0);
            channel.observer_receive_snapshot(&snapshot, t + 0.05, origin);
        }
        let delay = f64::from(channel.interpolation_delay().expect("observer"));
        let now = 1.0;
        let sampled = channel.sample(now).expect("buffered");
        // Render time maps back to server time now − 0.05 − delay.
        let expected = (now - 0.05 - delay) * 10.0;
        assert!((f64::from(sampled.position.x) - expected).abs() < 0.05);

        channel.apply_origin_shift(Vec3::new(-5.0, 0.0, 0.0));
        let shifted = channel.sample(now).expect("buffered");
        assert!((shifted.position.x - (sampled.position.x - 5.0)).abs() < 1e-3);
    }
}
