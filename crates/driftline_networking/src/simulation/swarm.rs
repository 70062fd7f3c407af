//! # Swarm Harness
//!
//! A seeded, fully in-process world: one [`ReplicationServer`] behind a
//! [`LoopbackHub`], a [`ReplicationClient`] per player, and AI ships driven
//! by [`WanderPilot`]s. Everything runs in one thread on simulated time, so a
//! run finishes as fast as the machine allows.
//!
//! ```text
//! frame:  AI pilots ─▶ server.set_controls
//!         server.advance(frame_dt)
//!         player pilots ─▶ client.tick ─▶ inputs back over loopback
//! ```

use std::path::Path;

use driftline_core::{EntityId, EntityKind};
use driftline_shared::{BodyState, ConnectionId, DVec3, Quaternion, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{NetworkConditions, WanderPilot};
use crate::cadence::TickStats;
use crate::client::ReplicationClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::flight::SimpleFlight;
use crate::server::{ReplicationServer, ServerStats};
use crate::sync::TierCounts;
use crate::transport::{LoopbackEndpoint, LoopbackHub, Transport, TransportStats};

const PLAYER_RADIUS: f32 = 12.0;
const AI_RADIUS: f32 = 8.0;
const INITIAL_SPEED: f32 = 60.0;

/// Swarm run parameters, loadable from TOML like [`SyncConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Connected players, one client each.
    pub players: usize,
    /// Server-driven AI ships.
    pub ai_ships: usize,
    /// Simulated seconds.
    pub duration_secs: f64,
    /// Host frames per second.
    pub frame_rate: f32,
    /// Radius of the spawn volume (m).
    pub spread: f64,
    /// Global centre of the spawn volume.
    pub center: [f64; 3],
    /// Seed for spawns, pilots and links.
    pub seed: u64,
    /// Mean seconds between pilot intent changes.
    pub pilot_period: f32,
    /// Link conditions for every player.
    pub network: NetworkConditions,
    /// Replication settings for server and clients.
    pub sync: SyncConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            players: 8,
            ai_ships: 400,
            duration_secs: 30.0,
            frame_rate: 60.0,
            spread: 20_000.0,
            center: [4.0e9, -1.5e9, 7.0e8],
            seed: 42,
            pilot_period: 4.0,
            network: NetworkConditions::GOOD,
            sync: SyncConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.sync.validate()?;
        if !(config.frame_rate.is_finite() && config.frame_rate > 0.0) {
            return Err(SyncError::InvalidConfig("frame_rate must be positive".into()));
        }
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SyncError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "swarm configuration loaded");
        Ok(config)
    }
}

/// Results of a swarm run.
#[derive(Clone, Debug)]
pub struct SwarmReport {
    /// Frames executed.
    pub frames: u64,
    /// Simulated seconds.
    pub simulated_secs: f64,
    /// Server counters.
    pub server: ServerStats,
    /// Server-side transport counters.
    pub transport: TransportStats,
    /// Simulation tick timing.
    pub simulation_timing: TickStats,
    /// Scheduler tick timing.
    pub scheduler_timing: TickStats,
    /// Per-connection scheduler reports aggregated.
    pub scheduler_reports: u64,
    /// Mean entities inside a cull radius per report.
    pub avg_gathered: f64,
    /// Mean entities selected per report.
    pub avg_selected: f64,
    /// Largest selection.
    pub max_selected: usize,
    /// Smallest budget seen (bytes/s).
    pub budget_min: f32,
    /// Largest budget seen (bytes/s).
    pub budget_max: f32,
    /// Mean budget in the last scheduler tick (bytes/s).
    pub budget_final: f32,
    /// Mean utilization.
    pub avg_utilization: f64,
    /// Owner reconciliation tiers, all players.
    pub corrections: TierCounts,
    /// Observer discontinuities, all players.
    pub teleports: u64,
    /// Stale snapshots dropped, all players.
    pub stale_snapshots: u64,
    /// Client-side origin shifts, all players.
    pub client_origin_shifts: u64,
    /// Mean observers per player at the end.
    pub avg_observed: f64,
    /// Mean distance between predicted and authoritative own ship (m).
    pub avg_divergence: f64,
    /// Largest such distance (m).
    pub max_divergence: f64,
}

struct SimulatedPlayer {
    entity: EntityId,
    client: ReplicationClient<LoopbackEndpoint>,
    pilot: WanderPilot,
}

#[derive(Default)]
struct Totals {
    reports: u64,
    gathered: u64,
    selected: u64,
    max_selected: usize,
    budget_min: f32,
    budget_max: f32,
    utilization: f64,
    divergence_sum: f64,
    divergence_samples: u64,
    max_divergence: f64,
}

/// Seeded server + clients harness.
pub struct SwarmSimulation {
    config: SwarmConfig,
    server: ReplicationServer<LoopbackHub>,
    players: Vec<SimulatedPlayer>,
    ai: Vec<(EntityId, WanderPilot)>,
    frame_dt: f64,
    frames: u64,
    total_frames: u64,
    last_report_tick: Option<u64>,
    totals: Totals,
}

impl SwarmSimulation {
    /// Builds the world: links first, then AI ships, then players.
    pub fn new(config: SwarmConfig) -> SyncResult<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let center = DVec3::from_array(config.center);

        let mut hub = LoopbackHub::new();
        let mut links = Vec::with_capacity(config.players);
        for i in 0..config.players {
            let id = ConnectionId(i as u32 + 1);
            let seed = config.seed.wrapping_add(i as u64 + 1);
            links.push((id, hub.connect(id, config.network.clone(), seed)?));
        }

        let mut server = ReplicationServer::new(config.sync.clone(), hub);
        server.set_origin(center);

        let mut ai = Vec::with_capacity(config.ai_ships);
        for _ in 0..config.ai_ships {
            let global = scatter(&mut rng, center, config.spread);
            let body = drifting(&mut rng);
            let entity = server.spawn(
                EntityKind::AiShip,
                global,
                body,
                AI_RADIUS,
                Box::<SimpleFlight>::default(),
                None,
            );
            ai.push((entity, WanderPilot::new(rng.gen(), config.pilot_period)));
        }

        let mut players = Vec::with_capacity(config.players);
        for (id, endpoint) in links {
            let global = scatter(&mut rng, center, config.spread * 0.25);
            let body = drifting(&mut rng);
            let entity = server.spawn(
                EntityKind::PlayerShip,
                global,
                body,
                PLAYER_RADIUS,
                Box::<SimpleFlight>::default(),
                Some(id),
            );
            server.connect(id)?;
            let mut client = ReplicationClient::new(id, config.sync.clone(), endpoint);
            client.adopt(entity, global, body, Box::<SimpleFlight>::default());
            players.push(SimulatedPlayer {
                entity,
                client,
                pilot: WanderPilot::new(rng.gen(), config.pilot_period),
            });
        }
        server.set_origin_anchor(players.first().map(|p| p.entity));

        tracing::info!(
            players = players.len(),
            ai_ships = ai.len(),
            seed = config.seed,
            "swarm spawned"
        );
        let frame_rate = f64::from(config.frame_rate.max(1.0));
        let total_frames = (config.duration_secs * frame_rate).round().max(0.0) as u64;
        Ok(Self {
            config,
            server,
            players,
            ai,
            frame_dt: 1.0 / frame_rate,
            frames: 0,
            total_frames,
            last_report_tick: None,
            totals: Totals {
                budget_min: f32::MAX,
                ..Totals::default()
            },
        })
    }

    /// Run parameters.
    #[must_use]
    pub const fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Authority.
    #[must_use]
    pub const fn server(&self) -> &ReplicationServer<LoopbackHub> {
        &self.server
    }

    /// Player clients in connection order.
    pub fn clients(&self) -> impl Iterator<Item = &ReplicationClient<LoopbackEndpoint>> + '_ {
        self.players.iter().map(|p| &p.client)
    }

    /// Frames executed.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Fraction of the run completed, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            return 1.0;
        }
        (self.frames as f64 / self.total_frames as f64).min(1.0)
    }

    /// True once the configured duration has been simulated.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.frames >= self.total_frames
    }

    /// Runs one host frame. Returns false when the run is over.
    pub fn step(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        let dt = self.frame_dt as f32;

        for (entity, pilot) in &mut self.ai {
            let (axes, look) = pilot.steer(dt);
            self.server.set_controls(*entity, axes, look);
        }
        self.server.advance(self.frame_dt);
        self.collect_reports();

        for player in &mut self.players {
            let (axes, look) = player.pilot.steer(dt);
            player.client.tick(dt, axes, look);

            let predicted = player.client.owned_global();
            let actual = self.server.global_position(player.entity);
            if let (Some(predicted), Some(actual)) = (predicted, actual) {
                let error = predicted.distance(actual);
                self.totals.divergence_sum += error;
                self.totals.divergence_samples += 1;
                self.totals.max_divergence = self.totals.max_divergence.max(error);
            }
        }
        self.frames += 1;
        true
    }

    /// Runs to completion.
    pub fn run(&mut self) -> SwarmReport {
        while self.step() {}
        self.report()
    }

    fn collect_reports(&mut self) {
        let reports = self.server.last_reports();
        let Some(tick) = reports.first().map(|r| r.tick) else {
            return;
        };
        if self.last_report_tick == Some(tick) {
            return;
        }
        self.last_report_tick = Some(tick);
        let totals = &mut self.totals;
        for report in reports {
            totals.reports += 1;
            totals.gathered += report.gathered as u64;
            totals.selected += report.selected as u64;
            totals.max_selected = totals.max_selected.max(report.selected);
            totals.budget_min = totals.budget_min.min(report.budget);
            totals.budget_max = totals.budget_max.max(report.budget);
            totals.utilization += f64::from(report.utilization);
        }
    }

    /// Summarizes the run so far.
    #[must_use]
    pub fn report(&self) -> SwarmReport {
        let totals = &self.totals;
        let per_report = |sum: f64| if totals.reports == 0 { 0.0 } else { sum / totals.reports as f64 };

        let mut corrections = TierCounts::default();
        let (mut teleports, mut stale, mut shifts, mut observed) = (0, 0, 0, 0);
        for player in &self.players {
            let stats = player.client.stats();
            corrections += player.client.corrections();
            teleports += stats.teleports;
            stale += stats.stale_snapshots;
            shifts += stats.origin_shifts;
            observed += player.client.observed().count();
        }

        let last = self.server.last_reports();
        let budget_final = if last.is_empty() {
            0.0
        } else {
            last.iter().map(|r| r.budget).sum::<f32>() / last.len() as f32
        };

        SwarmReport {
            frames: self.frames,
            simulated_secs: self.frames as f64 * self.frame_dt,
            server: self.server.stats(),
            transport: self.server.transport().stats(),
            simulation_timing: *self.server.simulation_timing(),
            scheduler_timing: *self.server.scheduler_timing(),
            scheduler_reports: totals.reports,
            avg_gathered: per_report(totals.gathered as f64),
            avg_selected: per_report(totals.selected as f64),
            max_selected: totals.max_selected,
            budget_min: if totals.reports == 0 { 0.0 } else { totals.budget_min },
            budget_max: totals.budget_max,
            budget_final,
            avg_utilization: per_report(totals.utilization),
            corrections,
            teleports,
            stale_snapshots: stale,
            client_origin_shifts: shifts,
            avg_observed: if self.players.is_empty() {
                0.0
            } else {
                observed as f64 / self.players.len() as f64
            },
            avg_divergence: if totals.divergence_samples == 0 {
                0.0
            } else {
                totals.divergence_sum / totals.divergence_samples as f64
            },
            max_divergence: totals.max_divergence,
        }
    }
}

/// Uniform point inside a sphere around `center`.
fn scatter(rng: &mut impl Rng, center: DVec3, radius: f64) -> DVec3 {
    loop {
        let p = DVec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if p.length() <= 1.0 {
            return center + p * radius;
        }
    }
}

/// Body with a random heading moving forward at a cruising speed.
fn drifting(rng: &mut impl Rng) -> BodyState {
    let axis = Vec3::new(
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(-1.0..=1.0),
    )
    .normalize_or_zero();
    let orientation = if axis == Vec3::ZERO {
        Quaternion::IDENTITY
    } else {
        Quaternion::from_axis_angle(axis, rng.gen_range(0.0..std::f32::consts::TAU))
    };
    BodyState {
        position: Vec3::ZERO,
        velocity: orientation.rotate(crate::flight::FORWARD) * INITIAL_SPEED,
        angular_velocity: Vec3::ZERO,
        orientation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SwarmConfig {
        SwarmConfig {
            players: 3,
            ai_ships: 60,
            duration_secs: 4.0,
            frame_rate: 30.0,
            spread: 3_000.0,
            network: NetworkConditions::PERFECT,
            ..SwarmConfig::default()
        }
    }

    #[test]
    fn test_small_swarm_replicates() {
        let mut sim = SwarmSimulation::new(small()).expect("valid swarm");
        let report = sim.run();

        assert_eq!(report.frames, 120);
        assert!(report.server.snapshots_sent > 0);
        assert!(report.server.wakes_sent > 0);
        assert!(report.server.inputs_received > 0);
        assert_eq!(report.server.decode_errors, 0);
        assert_eq!(report.server.send_errors, 0);
        assert_eq!(report.server.inputs_rejected, 0);
        assert!(report.scheduler_reports >= 3 * 15);
        assert!(report.avg_selected >= 1.0);
        assert!(report.avg_observed > 0.0);
        assert!(report.budget_min <= report.budget_max);
        assert!(!sim.step());
    }

    #[test]
    fn test_every_player_is_owned_and_far_from_zero() {
        let sim = SwarmSimulation::new(small()).expect("valid swarm");
        for client in sim.clients() {
            let global = client.owned_global().expect("adopted");
            assert!(global.length() > 1.0e9);
        }
        assert_eq!(sim.server().registry().len(), 63);
    }

    #[test]
    fn test_config_from_toml() {
        let config = SwarmConfig::from_toml_str(
            r#"
            players = 2
            ai_ships = 10
            seed = 7

            [network]
            base_latency_ms = 40
            jitter_ms = 10
            packet_loss_percent = 2
            duplicate_percent = 0

            [sync.budget]
            initial = 8000.0
            "#,
        )
        .expect("valid");
        assert_eq!(config.players, 2);
        assert_eq!(config.network.base_latency_ms, 40);
        assert!((config.sync.budget.initial - 8000.0).abs() < f32::EPSILON);
        assert!((config.duration_secs - 30.0).abs() < f64::EPSILON);

        assert!(SwarmConfig::from_toml_str("frame_rate = 0.0").is_err());
    }

    #[test]
    fn test_scatter_stays_inside() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let center = DVec3::new(1.0e9, 0.0, 0.0);
        for _ in 0..500 {
            assert!(scatter(&mut rng, center, 100.0).distance(center) <= 100.0 + 1e-6);
        }
    }
}
