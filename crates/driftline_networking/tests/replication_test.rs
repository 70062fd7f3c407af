//! # Replication Integration Tests
//!
//! A real server and client talking over loopback links: selection, owner
//! prediction, origin shifts on both hosts, despawn and lossy links.

use driftline_core::{EntityId, EntityKind};
use driftline_networking::{
    FlightParams, LoopbackEndpoint, LoopbackHub, NetworkConditions, ReplicationClient, ReplicationServer,
    SimpleFlight, SyncConfig, Transport,
};
use driftline_networking::sync::PENDING_INPUT_CAPACITY;
use driftline_shared::{BodyState, ConnectionId, DVec3, Vec3};

const VIEWER: ConnectionId = ConnectionId(1);
const FRAME: f32 = 1.0 / 60.0;

struct Harness {
    server: ReplicationServer<LoopbackHub>,
    client: ReplicationClient<LoopbackEndpoint>,
    ship: EntityId,
}

impl Harness {
    fn new(config: SyncConfig, conditions: NetworkConditions, global: DVec3, body: BodyState) -> Self {
        Self::with_flight(config, conditions, global, body, FlightParams::default())
    }

    fn with_flight(
        config: SyncConfig,
        conditions: NetworkConditions,
        global: DVec3,
        body: BodyState,
        params: FlightParams,
    ) -> Self {
        let mut hub = LoopbackHub::new();
        let endpoint = hub.connect(VIEWER, conditions, 11).expect("fresh link");
        let mut server = ReplicationServer::new(config.clone(), hub);
        server.set_origin(global);
        let ship = server.spawn(
            EntityKind::PlayerShip,
            global,
            body,
            10.0,
            Box::new(SimpleFlight::new(params)),
            Some(VIEWER),
        );
        server.set_origin_anchor(Some(ship));
        server.connect(VIEWER).expect("fresh viewer");

        let mut client = ReplicationClient::new(VIEWER, config, endpoint);
        client.adopt(ship, global, body, Box::new(SimpleFlight::new(params)));
        Self { server, client, ship }
    }

    fn ai(&mut self, global: DVec3) -> EntityId {
        self.server.spawn(
            EntityKind::AiShip,
            global,
            BodyState::default(),
            8.0,
            Box::<SimpleFlight>::default(),
            None,
        )
    }

    fn run(&mut self, seconds: f32, axes: [f32; 4]) {
        let frames = (seconds / FRAME).round() as usize;
        for _ in 0..frames {
            self.server.advance(f64::from(FRAME));
            self.client.tick(FRAME, axes, [0.0; 2]);
        }
        // Every route is live for the whole run.
        assert_eq!(self.server.stats().send_errors, 0, "server sends refused");
        assert_eq!(self.client.stats().send_errors, 0, "client sends refused");
    }
}

#[test]
fn test_selection_by_distance() {
    let mut h = Harness::new(SyncConfig::default(), NetworkConditions::PERFECT, DVec3::ZERO, BodyState::default());
    let near = h.ai(DVec3::new(50.0, 0.0, 0.0));
    let mid = h.ai(DVec3::new(0.0, 0.0, 5_000.0));
    let far = h.ai(DVec3::new(50_000.0, 0.0, 0.0));

    h.run(2.0, [0.0; 4]);

    let seen: Vec<EntityId> = h.client.observed().collect();
    assert!(seen.contains(&near), "always-include ship must be observed");
    assert!(!seen.contains(&far), "ship beyond every cull radius must not be observed");
    assert_eq!(h.client.kind_of(far), None);
    assert_eq!(h.client.kind_of(near), Some(EntityKind::AiShip));

    let position = h.client.observed_global(near).expect("buffered");
    assert!(position.distance(DVec3::new(50.0, 0.0, 0.0)) < 0.05, "{position:?}");

    assert!(h.server.stats().snapshots_sent > 0);
    assert!(h.server.stats().wakes_sent >= 1);
    assert!(h.client.stats().snapshots_received > 0);

    // The mid ship is scored; whichever way it goes, both hosts agree.
    let report = h.server.last_reports().first().expect("one viewer");
    assert!(report.gathered >= 2);
    assert_eq!(seen.contains(&mid), h.client.kind_of(mid).is_some());
}

#[test]
fn test_owner_prediction_tracks_authority() {
    let mut h = Harness::new(SyncConfig::default(), NetworkConditions::GOOD, DVec3::ZERO, BodyState::default());
    h.run(2.0, [1.0, 0.0, 0.0, 0.0]);

    let stats = h.server.stats();
    assert!(stats.inputs_received > 60);
    assert_eq!(stats.inputs_rejected, 0);
    assert!(stats.acks_sent > 0);
    assert!(h.client.pending_inputs() < 64, "acks must prune the queue");

    let predicted = h.client.owned_global().expect("owned");
    let actual = h.server.global_position(h.ship).expect("alive");
    assert!(actual.z > 10.0, "authority applied thrust: {actual:?}");
    assert!(predicted.distance(actual) < 25.0, "{predicted:?} vs {actual:?}");
    assert!(h.client.corrections().total() > 0);
}

#[test]
fn test_origin_shifts_are_transparent() {
    let mut config = SyncConfig::default();
    config.origin.recenter_radius = 500.0;
    config.scheduler.always_include_radius = 2_000.0;
    let start = DVec3::new(7.5e9, -2.0e9, 3.0e8);
    let body = BodyState {
        velocity: Vec3::new(200.0, 0.0, 0.0),
        ..BodyState::default()
    };
    let mut h = Harness::new(config, NetworkConditions::PERFECT, start, body);
    let buoy_global = start + DVec3::new(0.0, 80.0, 0.0);
    let buoy = h.ai(buoy_global);

    h.run(4.0, [0.0; 4]);

    assert!(h.server.stats().origin_shifts >= 2);
    assert!(h.client.stats().origin_shifts >= 1);

    let server_view = h.server.global_position(buoy).expect("alive");
    assert!(server_view.distance(buoy_global) < 0.01, "{server_view:?}");

    let client_view = h.client.observed_global(buoy).expect("observed");
    assert!(client_view.distance(buoy_global) < 0.05, "{client_view:?}");

    let predicted = h.client.owned_global().expect("owned");
    let actual = h.server.global_position(h.ship).expect("alive");
    assert!((actual.x - start.x - 800.0).abs() < 10.0, "{actual:?}");
    assert!(predicted.distance(actual) < 5.0);
    assert_eq!(h.client.stats().teleports, 0);
}

#[test]
fn test_despawn_reaches_viewer() {
    let mut h = Harness::new(SyncConfig::default(), NetworkConditions::PERFECT, DVec3::ZERO, BodyState::default());
    let near = h.ai(DVec3::new(0.0, 30.0, 0.0));
    h.run(1.0, [0.0; 4]);
    assert!(h.client.observed().any(|id| id == near));

    assert!(h.server.despawn(near));
    h.run(0.2, [0.0; 4]);
    assert!(h.client.observed().all(|id| id != near));
    assert!(h.server.stats().dormants_sent >= 1);
}

#[test]
fn test_extreme_speed_keeps_only_own_ship() {
    let params = FlightParams {
        max_speed: 100_000.0,
        ..FlightParams::default()
    };
    let body = BodyState {
        velocity: Vec3::new(0.0, 0.0, 40_000.0),
        ..BodyState::default()
    };
    let mut h = Harness::with_flight(SyncConfig::default(), NetworkConditions::PERFECT, DVec3::ZERO, body, params);
    for i in 0..20 {
        h.ai(DVec3::new(f64::from(i) * 10.0, 40.0, 0.0));
    }
    h.run(1.5, [0.0; 4]);

    let report = h.server.last_reports().first().expect("one viewer");
    assert!(report.extreme);
    assert_eq!(report.selected, 1);
    assert_eq!(h.client.observed().count(), 0);
}

#[test]
fn test_poor_link_degrades_gracefully() {
    let mut h = Harness::new(SyncConfig::default(), NetworkConditions::POOR, DVec3::ZERO, BodyState::default());
    let buddy = h.ai(DVec3::new(0.0, 0.0, 60.0));
    h.run(6.0, [0.6, 0.1, 0.0, 0.0]);

    assert_eq!(h.server.stats().decode_errors, 0);
    assert_eq!(h.client.stats().decode_errors, 0);
    assert!(h.client.pending_inputs() <= PENDING_INPUT_CAPACITY);
    assert!(h.server.transport().stats().dropped + h.client.transport().stats().dropped > 0);
    assert!(h.client.observed().any(|id| id == buddy));

    let predicted = h.client.owned_global().expect("owned");
    let actual = h.server.global_position(h.ship).expect("alive");
    assert!(predicted.distance(actual) < 100.0, "{predicted:?} vs {actual:?}");
}
