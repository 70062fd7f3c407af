//! # Network Simulation
//!
//! Simulates network conditions and a swarm of ships for soak testing.
//!
//! ## Features
//!
//! - Latency, jitter, loss and duplication for the loopback transport
//! - Wander pilots producing AI control intents
//! - A seeded, fully in-process server + clients harness
//!
//! ## Modules
//!
//! - `pilot`: deterministic wandering control input
//! - `swarm`: the authority/observer harness behind `swarm_simulation`

pub mod pilot;
pub mod swarm;

pub use pilot::WanderPilot;
pub use swarm::{SwarmConfig, SwarmReport, SwarmSimulation};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Network conditions for simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// Base latency in milliseconds.
    pub base_latency_ms: u32,
    /// Jitter (variance) in milliseconds.
    pub jitter_ms: u32,
    /// Packet loss percentage (0-100), unreliable channel only.
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100), unreliable channel only.
    pub duplicate_percent: u8,
}

impl NetworkConditions {
    /// Perfect network conditions (LAN).
    pub const PERFECT: Self = Self {
        base_latency_ms: 1,
        jitter_ms: 0,
        packet_loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Good network conditions (fiber).
    pub const GOOD: Self = Self {
        base_latency_ms: 20,
        jitter_ms: 5,
        packet_loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Average network conditions (cable).
    pub const AVERAGE: Self = Self {
        base_latency_ms: 50,
        jitter_ms: 20,
        packet_loss_percent: 1,
        duplicate_percent: 1,
    };

    /// Poor network conditions (mobile/wifi).
    pub const POOR: Self = Self {
        base_latency_ms: 100,
        jitter_ms: 50,
        packet_loss_percent: 5,
        duplicate_percent: 2,
    };

    /// Looks up a preset by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "perfect" => Some(Self::PERFECT),
            "good" => Some(Self::GOOD),
            "average" => Some(Self::AVERAGE),
            "poor" => Some(Self::POOR),
            _ => None,
        }
    }

    /// One-way latency with jitter, in seconds.
    pub fn sample_latency(&self, rng: &mut impl Rng) -> f64 {
        let jitter = if self.jitter_ms > 0 {
            let spread = i64::from(self.jitter_ms);
            rng.gen_range(-spread..=spread)
        } else {
            0
        };
        let latency_ms = (i64::from(self.base_latency_ms) + jitter).max(0);
        latency_ms as f64 / 1_000.0
    }

    /// Returns true if packet should be dropped.
    pub fn should_drop(&self, rng: &mut impl Rng) -> bool {
        self.packet_loss_percent > 0 && rng.gen_range(0..100u8) < self.packet_loss_percent
    }

    /// Returns true if packet should be delivered twice.
    pub fn should_duplicate(&self, rng: &mut impl Rng) -> bool {
        self.duplicate_percent > 0 && rng.gen_range(0..100u8) < self.duplicate_percent
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::GOOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_latency_within_jitter() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let conditions = NetworkConditions::POOR;
        for _ in 0..1_000 {
            let latency = conditions.sample_latency(&mut rng);
            assert!((0.05..=0.15).contains(&latency), "{latency}");
        }
    }

    #[test]
    fn test_loss_rate_is_roughly_honoured() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let conditions = NetworkConditions {
            packet_loss_percent: 10,
            ..NetworkConditions::PERFECT
        };
        let dropped = (0..10_000).filter(|_| conditions.should_drop(&mut rng)).count();
        assert!((800..1_200).contains(&dropped), "{dropped}");
        assert!(!NetworkConditions::PERFECT.should_drop(&mut rng));
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(NetworkConditions::preset("Poor"), Some(NetworkConditions::POOR));
        assert_eq!(NetworkConditions::preset("lunar"), None);
    }
}
