//! # Adaptive Byte Budget
//!
//! AIMD control of the per-connection byte budget.
//!
//! Each scheduler tick the bytes actually sent to the connection during the
//! previous interval are compared against the budget:
//!
//! - utilization above the high-water mark: multiplicative decrease
//! - `patience` consecutive calm ticks: additive increase
//!
//! The budget always stays in `[min, max]`. Admission uses only
//! `budget × safety_factor`.

use crate::config::BudgetConfig;

/// Outcome of one adaptation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetChange {
    /// Sent bytes divided by the budget in force during the interval.
    pub utilization: f32,
    /// Budget before the step.
    pub before: f32,
    /// Budget after the step.
    pub after: f32,
}

impl BudgetChange {
    /// Whether the budget moved.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// AIMD budget controller.
#[derive(Clone, Debug)]
pub struct AimdBudget {
    budget: f32,
    calm_ticks: u32,
    min: f32,
    max: f32,
    increment: f32,
    decrease_factor: f32,
    patience: u32,
    safety_factor: f32,
    high_water: f32,
}

impl AimdBudget {
    /// Creates a controller starting at `config.initial`.
    #[must_use]
    pub fn new(config: &BudgetConfig) -> Self {
        let min = config.min.max(1.0);
        let max = config.max.max(min);
        Self {
            budget: config.initial.clamp(min, max),
            calm_ticks: 0,
            min,
            max,
            increment: config.increment.max(0.0),
            decrease_factor: config.decrease_factor.clamp(0.05, 0.99),
            patience: config.patience.max(1),
            safety_factor: config.safety_factor.clamp(0.01, 1.0),
            high_water: config.high_water.max(0.01),
        }
    }

    /// Current budget (bytes per scheduler tick).
    #[inline]
    #[must_use]
    pub const fn budget(&self) -> f32 {
        self.budget
    }

    /// Ceiling offered to admission.
    #[inline]
    #[must_use]
    pub fn tick_budget(&self) -> f32 {
        self.budget * self.safety_factor
    }

    /// Adapts to the bytes sent during the last interval.
    pub fn adapt(&mut self, sent_bytes: f32) -> BudgetChange {
        let before = self.budget;
        let utilization = sent_bytes.max(0.0) / before;

        if utilization > self.high_water {
            self.budget *= self.decrease_factor;
            self.calm_ticks = 0;
        } else {
            self.calm_ticks += 1;
            if self.calm_ticks >= self.patience {
                self.budget += self.increment;
                self.calm_ticks = 0;
            }
        }
        self.budget = self.budget.clamp(self.min, self.max);

        BudgetChange {
            utilization,
            before,
            after: self.budget,
        }
    }
}
