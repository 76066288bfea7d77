//! Feasibility repair: projects raw weights onto whole-share, within-budget allocations.

use crate::error::{Result, SimulationError};

/// Relative slack used when checking whether a weight still affords one share.
const AFFORD_EPSILON: f64 = 1e-9;

/// Relative slack on share counts, so that a weight produced as
/// `price * k / total` maps back to exactly `k` shares.
const SHARE_EPSILON: f64 = 1e-12;

/// Weight sums this close to one are already normalized. Must exceed the
/// overspend `SHARE_EPSILON` allows, so a repaired vector is never scaled down.
const SUM_TOLERANCE: f64 = 1e-10;

/// Number of whole shares `amount` buys at `price`.
pub fn whole_shares(amount: f64, price: f64) -> u64 {
    if !(amount.is_finite() && price.is_finite()) || amount <= 0.0 || price <= 0.0 {
        return 0;
    }
    (amount / price * (1.0 + SHARE_EPSILON)).floor() as u64
}

/// Repair operator bound to one relocation event's prices and budget.
#[derive(Debug, Clone)]
pub struct PortfolioRepair {
    prices: Vec<f64>,
    total_amount: f64,
}

impl PortfolioRepair {
    /// Create a repair operator for the given prices and investable amount.
    pub fn new(prices: Vec<f64>, total_amount: f64) -> Result<Self> {
        if let Some(p) = prices.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            return Err(SimulationError::InvalidInput(format!(
                "Repair prices must be positive, got {p}"
            )));
        }
        if !total_amount.is_finite() {
            return Err(SimulationError::InvalidInput(
                "Repair budget must be finite".to_string(),
            ));
        }
        Ok(Self {
            prices,
            total_amount,
        })
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    /// Repair `x` into a feasible weight vector.
    ///
    /// Runs [`Self::repair_pass`] until the share counts stop changing, which
    /// makes the operator idempotent. After the first pass the weights never
    /// sum above one, so every later pass only adds shares and the loop ends
    /// once the leftover cash cannot buy another share anywhere.
    pub fn repair(&self, x: &[f64]) -> Vec<f64> {
        let mut shares = self.repair_pass(x);
        loop {
            let next = self.repair_pass(&self.shares_to_weights(&shares));
            if next == shares {
                break;
            }
            shares = next;
        }
        self.shares_to_weights(&shares)
    }

    /// Whole shares implied by the repaired form of `x`.
    pub fn positions(&self, x: &[f64]) -> Vec<u64> {
        let weights = self.repair(x);
        weights
            .iter()
            .zip(&self.prices)
            .map(|(w, p)| whole_shares(w * self.total_amount, *p))
            .collect()
    }

    /// One pass of the repair steps, returning share counts.
    ///
    /// 1. money per ticker is `x * total`;
    /// 2. tickers that cannot afford one share are dropped;
    /// 3. the rest is renormalized to sum to one (all-zero stays zero, sums
    ///    already within rounding of one are left alone);
    /// 4. money is recomputed from the renormalized weights;
    /// 5. money is floored to whole shares.
    pub fn repair_pass(&self, x: &[f64]) -> Vec<u64> {
        let n = self.prices.len();
        if self.total_amount <= 0.0 {
            return vec![0; n];
        }

        let mut weights: Vec<f64> = x
            .iter()
            .take(n)
            .map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 })
            .collect();
        weights.resize(n, 0.0);

        for (w, p) in weights.iter_mut().zip(&self.prices) {
            if *w * self.total_amount < p * (1.0 - AFFORD_EPSILON) {
                *w = 0.0;
            }
        }

        let sum: f64 = weights.iter().sum();
        if sum > 0.0 && (sum - 1.0).abs() > SUM_TOLERANCE {
            for w in &mut weights {
                *w /= sum;
            }
        }

        weights
            .iter()
            .zip(&self.prices)
            .map(|(w, p)| whole_shares(w * self.total_amount, *p))
            .collect()
    }

    fn shares_to_weights(&self, shares: &[u64]) -> Vec<f64> {
        shares
            .iter()
            .zip(&self.prices)
            .map(|(&k, p)| p * k as f64 / self.total_amount)
            .collect()
    }
}
