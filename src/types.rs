//! Core data types for the simulation engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier of an investable instrument.
pub type Ticker = String;

/// One raw observation of the dataset: a ticker on a trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    pub date: NaiveDate,
    pub ticker: Ticker,
    /// Periodic return for the date (log or simple, consistent across the panel).
    #[serde(rename = "return")]
    pub ret: f64,
    pub price: f64,
    /// Corporate-action multiplier applied to share counts after the date.
    pub adjust_factor: f64,
}

impl PanelRecord {
    /// Create a new record.
    pub fn new(
        date: NaiveDate,
        ticker: impl Into<Ticker>,
        ret: f64,
        price: f64,
        adjust_factor: f64,
    ) -> Self {
        Self {
            date,
            ticker: ticker.into(),
            ret,
            price,
            adjust_factor,
        }
    }
}

/// Snapshot of the portfolio at the close of one simulated date.
///
/// States are immutable once recorded; the engine builds a fresh value every
/// day and appends it to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub date: NaiveDate,
    /// Total portfolio value: `prices · positions + cash`.
    pub amount: f64,
    /// Weights the portfolio steers toward. `None` only before the first relocation.
    pub target_allocation: Option<Vec<f64>>,
    /// Weights implied by the held positions at the date's prices.
    pub allocation: Vec<f64>,
    /// Fraction of `amount` held as cash.
    pub unallocated: f64,
    /// Whole shares held per ticker.
    pub positions: Vec<u64>,
    pub cash: f64,
}

impl PortfolioState {
    /// Value of the held positions, excluding cash.
    pub fn invested(&self) -> f64 {
        self.amount - self.cash
    }

    /// Check the accounting identities against the prices the state was valued at.
    pub fn is_consistent(&self, prices: &[f64], tolerance: f64) -> bool {
        let holdings: f64 = prices
            .iter()
            .zip(&self.positions)
            .map(|(p, &q)| p * q as f64)
            .sum();
        let scale = self.amount.abs().max(1.0);
        (self.cash - self.amount * self.unallocated).abs() <= tolerance * scale
            && (self.amount - holdings - self.cash).abs() <= tolerance * scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PortfolioState {
        PortfolioState {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            amount: 1000.0,
            target_allocation: Some(vec![0.5, 0.5]),
            allocation: vec![0.4, 0.5],
            unallocated: 0.1,
            positions: vec![40, 25],
            cash: 100.0,
        }
    }

    #[test]
    fn test_invested() {
        assert!((state().invested() - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_check() {
        let s = state();
        assert!(s.is_consistent(&[10.0, 20.0], 1e-9));
        assert!(!s.is_consistent(&[11.0, 20.0], 1e-9));
    }

    #[test]
    fn test_record_serializes_return_field() {
        let record = PanelRecord::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "X", 0.01, 10.0, 1.0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"return\":0.01"));
    }
}
