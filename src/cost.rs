//! Cost and budget tracking.
//!
//! One [`CostTracker`] is owned per analysis run (or explicitly shared by
//! reference). It only grows until the caller resets it.

use std::sync::Mutex;

/// Token pricing used to turn reported usage into a dollar estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub cost_per_1k_tokens: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            cost_per_1k_tokens: 0.0,
        }
    }
}

impl Pricing {
    pub fn new(cost_per_1k_tokens: f64) -> Self {
        Self { cost_per_1k_tokens }
    }

    /// Estimated cost of `tokens` tokens in USD.
    pub fn estimate(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens.max(0.0)
    }
}

/// Running total of analysis cost against a budget.
#[derive(Debug)]
pub struct CostTracker {
    budget_usd: f64,
    total_usd: Mutex<f64>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(f64::INFINITY)
    }
}

impl CostTracker {
    pub fn new(budget_usd: f64) -> Self {
        Self {
            budget_usd,
            total_usd: Mutex::new(0.0),
        }
    }

    /// Add a cost estimate. Negative or non-finite estimates are ignored.
    pub fn add_cost(&self, estimate_usd: f64) {
        if !estimate_usd.is_finite() || estimate_usd <= 0.0 {
            return;
        }
        let mut total = self.total_usd.lock().unwrap_or_else(|e| e.into_inner());
        *total += estimate_usd;
    }

    pub fn total_cost(&self) -> f64 {
        *self.total_usd.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn budget(&self) -> f64 {
        self.budget_usd
    }

    /// Budget left, never below zero.
    pub fn remaining_budget(&self) -> f64 {
        (self.budget_usd - self.total_cost()).max(0.0)
    }

    pub fn is_budget_exceeded(&self) -> bool {
        self.total_cost() > self.budget_usd
    }

    pub fn reset(&self) {
        *self.total_usd.lock().unwrap_or_else(|e| e.into_inner()) = 0.0;
    }
}
