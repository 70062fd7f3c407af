//! Server clock estimation and adaptive interpolation delay.

use std::collections::VecDeque;

use crate::config::InterpolationConfig;
use crate::scheduler::Ema;

/// Deviation samples kept for the jitter percentile.
const JITTER_SAMPLES: usize = 64;

/// Tracks `local − server` clock offset and arrival jitter.
///
/// The offset absorbs one-way latency, so [`ClockSync::to_local`] maps a
/// server timestamp to the local time the sample would typically arrive.
#[derive(Clone, Debug)]
pub struct ClockSync {
    offset: Option<f64>,
    alpha: f64,
    deviations: VecDeque<f32>,
    last_arrival: Option<f64>,
    arrival_gap: Ema,
    min_delay: f32,
    max_delay: f32,
}

impl ClockSync {
    /// Creates an estimator using the interpolation settings.
    #[must_use]
    pub fn new(config: &InterpolationConfig) -> Self {
        let min_delay = config.min_delay.max(0.0);
        let alpha = if config.clock_alpha.is_finite() {
            config.clock_alpha.clamp(1.0e-3, 1.0)
        } else {
            0.1
        };
        Self {
            offset: None,
            alpha: f64::from(alpha),
            deviations: VecDeque::with_capacity(JITTER_SAMPLES),
            last_arrival: None,
            arrival_gap: Ema::new(alpha),
            min_delay,
            max_delay: config.max_delay.max(min_delay),
        }
    }

    /// Folds in one snapshot stamped `server_time` that arrived at `local_now`.
    pub fn observe(&mut self, server_time: f64, local_now: f64) {
        let sample = local_now - server_time;
        if !sample.is_finite() {
            return;
        }
        match self.offset.as_mut() {
            None => self.offset = Some(sample),
            Some(offset) => {
                if self.deviations.len() == JITTER_SAMPLES {
                    self.deviations.pop_front();
                }
                self.deviations.push_back((sample - *offset).abs() as f32);
                *offset += self.alpha * (sample - *offset);
            }
        }
        if let Some(last) = self.last_arrival {
            if local_now > last {
                self.arrival_gap.update((local_now - last) as f32);
            }
        }
        self.last_arrival = Some(local_now);
    }

    /// Estimated `local − server` offset; `None` before the first sample.
    #[must_use]
    pub const fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// Server timestamp in local time.
    #[must_use]
    pub fn to_local(&self, server_time: f64) -> f64 {
        server_time + self.offset.unwrap_or(0.0)
    }

    /// `median + ½·(p90 − median)` of recent offset deviations (s).
    #[must_use]
    pub fn jitter(&self) -> f32 {
        if self.deviations.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f32> = self.deviations.iter().copied().collect();
        sorted.sort_unstable_by(f32::total_cmp);
        let at = |q: f32| sorted[((sorted.len() - 1) as f32 * q).round() as usize];
        let median = at(0.5);
        median + 0.5 * (at(0.9) - median)
    }

    /// Smoothed gap between arrivals (s).
    #[must_use]
    pub fn arrival_gap(&self) -> f32 {
        self.arrival_gap.value()
    }

    /// Interpolation delay: one arrival gap plus twice the jitter, clamped.
    ///
    /// Until two snapshots have arrived the maximum delay is used.
    #[must_use]
    pub fn delay(&self) -> f32 {
        if !self.arrival_gap.is_initialized() {
            return self.max_delay;
        }
        (self.arrival_gap.value() + 2.0 * self.jitter()).clamp(self.min_delay, self.max_delay)
    }

    /// Forgets all samples.
    pub fn reset(&mut self) {
        self.offset = None;
        self.deviations.clear();
        self.last_arrival = None;
        self.arrival_gap = Ema::new(self.alpha as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InterpolationConfig {
        InterpolationConfig {
            min_delay: 0.05,
            max_delay: 0.35,
            clock_alpha: 0.1,
            ..InterpolationConfig::default()
        }
    }

    #[test]
    fn test_offset_tracks_latency() {
        let mut clock = ClockSync::new(&config());
        assert_eq!(clock.offset(), None);
        for i in 0..50 {
            let server = f64::from(i) * 0.1;
            clock.observe(server, 100.0 + server + 0.04);
        }
        let offset = clock.offset().expect("samples observed");
        assert!((offset - 100.04).abs() < 1e-9);
        assert!((clock.to_local(1.0) - 101.04).abs() < 1e-9);
        assert!(clock.jitter() < 1e-6);
    }

    #[test]
    fn test_regular_arrivals_use_gap() {
        let mut clock = ClockSync::new(&config());
        assert_eq!(clock.delay(), 0.35);
        for i in 0..20 {
            let t = f64::from(i) * 0.1;
            clock.observe(t, t + 0.05);
        }
        assert!((clock.arrival_gap() - 0.1).abs() < 1e-4);
        assert!((clock.delay() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_jitter_widens_delay() {
        let mut steady = ClockSync::new(&config());
        let mut noisy = ClockSync::new(&config());
        for i in 0..64 {
            let t = f64::from(i) * 0.05;
            steady.observe(t, t + 0.05);
            let wobble = if i % 3 == 0 { 0.04 } else { 0.0 };
            noisy.observe(t, t + 0.05 + wobble);
        }
        assert!(noisy.jitter() > steady.jitter());
        assert!(noisy.delay() > steady.delay());
        assert!(noisy.delay() <= 0.35);
    }
}
