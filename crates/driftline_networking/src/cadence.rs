//! # Decoupled Tick Cadences
//!
//! Two fixed-step clocks driven by the same frame time:
//!
//! - simulation: high rate, inputs/snapshots/flight
//! - scheduler: low rate, perceptual scoring
//!
//! Time is supplied by the caller, so runs are reproducible. Wall-clock
//! cost of each tick is measured separately for [`TickStats`].

use std::time::{Duration, Instant};

/// Steps owed for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CadenceSteps {
    /// Simulation ticks to run.
    pub simulation: u32,
    /// Scheduler ticks to run.
    pub scheduler: u32,
}

/// Fixed-step accumulator.
#[derive(Clone, Copy, Debug)]
struct Accumulator {
    period: f64,
    pending: f64,
}

impl Accumulator {
    fn new(rate: f32) -> Self {
        let rate = if rate.is_finite() { f64::from(rate).max(0.1) } else { 1.0 };
        Self {
            period: 1.0 / rate,
            pending: 0.0,
        }
    }

    fn advance(&mut self, dt: f64, max_steps: u32) -> (u32, u32) {
        self.pending += dt;
        let mut steps = 0;
        while self.pending >= self.period && steps < max_steps {
            self.pending -= self.period;
            steps += 1;
        }
        // Spiral-of-death guard: drop what could not be caught up.
        let mut dropped = 0;
        while self.pending >= self.period {
            self.pending -= self.period;
            dropped += 1;
        }
        (steps, dropped)
    }
}

/// Simulation and scheduler clocks.
#[derive(Clone, Debug)]
pub struct CadenceClock {
    simulation: Accumulator,
    scheduler: Accumulator,
    max_steps: u32,
    now: f64,
    simulation_ticks: u64,
    scheduler_ticks: u64,
    dropped_steps: u64,
}

impl CadenceClock {
    /// Creates clocks at the given rates (Hz).
    #[must_use]
    pub fn new(simulation_rate: f32, scheduler_rate: f32, max_steps_per_frame: u32) -> Self {
        Self {
            simulation: Accumulator::new(simulation_rate),
            scheduler: Accumulator::new(scheduler_rate),
            max_steps: max_steps_per_frame.max(1),
            now: 0.0,
            simulation_ticks: 0,
            scheduler_ticks: 0,
            dropped_steps: 0,
        }
    }

    /// Accumulates `frame_dt` seconds and returns the steps owed.
    pub fn advance(&mut self, frame_dt: f64) -> CadenceSteps {
        let dt = if frame_dt.is_finite() { frame_dt.max(0.0) } else { 0.0 };
        self.now += dt;
        let (simulation, dropped_sim) = self.simulation.advance(dt, self.max_steps);
        let (scheduler, dropped_sched) = self.scheduler.advance(dt, self.max_steps);
        let dropped = dropped_sim + dropped_sched;
        if dropped > 0 {
            tracing::warn!(dropped, "frame too long, dropping ticks");
        }
        self.simulation_ticks += u64::from(simulation);
        self.scheduler_ticks += u64::from(scheduler);
        self.dropped_steps += u64::from(dropped);
        CadenceSteps {
            simulation,
            scheduler,
        }
    }

    /// Accumulated time (s).
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Simulation step length (s).
    #[must_use]
    pub fn simulation_dt(&self) -> f32 {
        self.simulation.period as f32
    }

    /// Scheduler step length (s).
    #[must_use]
    pub fn scheduler_dt(&self) -> f32 {
        self.scheduler.period as f32
    }

    /// Simulation ticks owed so far.
    #[must_use]
    pub const fn simulation_ticks(&self) -> u64 {
        self.simulation_ticks
    }

    /// Scheduler ticks owed so far.
    #[must_use]
    pub const fn scheduler_ticks(&self) -> u64 {
        self.scheduler_ticks
    }

    /// Steps dropped by the catch-up cap.
    #[must_use]
    pub const fn dropped_steps(&self) -> u64 {
        self.dropped_steps
    }
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug)]
pub struct TickStats {
    /// Minimum tick duration observed (µs).
    pub min_tick_us: u64,
    /// Maximum tick duration observed (µs).
    pub max_tick_us: u64,
    /// Rolling average tick duration (µs).
    pub avg_tick_us: u64,
    /// Ticks that took longer than their period.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
    budget: Duration,
}

impl TickStats {
    /// Stats for ticks expected to finish within `period` seconds.
    #[must_use]
    pub fn new(period: f32) -> Self {
        let budget = Duration::from_secs_f32(if period.is_finite() { period.max(0.0) } else { 0.0 });
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: 0,
            late_ticks: 0,
            total_ticks: 0,
            budget,
        }
    }

    /// Marks the start of a tick.
    #[must_use]
    pub fn begin(&self) -> Instant {
        Instant::now()
    }

    /// Records a tick that started at `start`.
    pub fn end(&mut self, start: Instant) {
        self.record(start.elapsed());
    }

    /// Records one tick duration.
    pub fn record(&mut self, duration: Duration) {
        let duration_us = duration.as_micros() as u64;
        self.min_tick_us = self.min_tick_us.min(duration_us);
        self.max_tick_us = self.max_tick_us.max(duration_us);
        self.avg_tick_us = if self.total_ticks == 0 {
            duration_us
        } else {
            (self.avg_tick_us * 15 + duration_us) / 16
        };
        self.total_ticks += 1;
        if duration > self.budget {
            self.late_ticks += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadences_are_independent() {
        let mut clock = CadenceClock::new(30.0, 5.0, 8);
        let mut totals = CadenceSteps::default();
        for _ in 0..60 {
            let steps = clock.advance(1.0 / 60.0);
            totals.simulation += steps.simulation;
            totals.scheduler += steps.scheduler;
        }
        assert!((29..=30).contains(&totals.simulation), "{totals:?}");
        assert!((4..=5).contains(&totals.scheduler), "{totals:?}");
        assert!((clock.now() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_frame_is_capped() {
        let mut clock = CadenceClock::new(30.0, 5.0, 4);
        let steps = clock.advance(1.0);
        assert_eq!(steps.simulation, 4);
        assert_eq!(steps.scheduler, 4);
        assert!(clock.dropped_steps() >= 26);

        let next = clock.advance(1.0 / 30.0);
        assert!(next.simulation <= 1);
    }

    #[test]
    fn test_stats_tracking() {
        let mut stats = TickStats::new(0.01);
        stats.record(Duration::from_micros(2_000));
        stats.record(Duration::from_micros(20_000));
        assert_eq!(stats.total_ticks, 2);
        assert_eq!(stats.min_tick_us, 2_000);
        assert_eq!(stats.max_tick_us, 20_000);
        assert_eq!(stats.late_ticks, 1);

        let start = stats.begin();
        stats.end(start);
        assert_eq!(stats.total_ticks, 3);
    }
}
