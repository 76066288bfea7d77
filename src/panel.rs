//! Date-ordered, ticker-indexed view over the return/price dataset.
//!
//! The panel is built once from raw [`PanelRecord`]s and is read-only
//! afterwards. Every per-date vector is aligned to [`Panel::tickers`], which is
//! sorted lexicographically.

use crate::error::{Result, SimulationError};
use crate::types::{PanelRecord, Ticker};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Immutable return/price panel.
#[derive(Debug, Clone)]
pub struct Panel {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    returns: Vec<Vec<f64>>,
    prices: Vec<Vec<f64>>,
    adjust_factors: Vec<Vec<f64>>,
}

impl Panel {
    /// Build a panel from raw records.
    ///
    /// Every (date, ticker) pair must appear exactly once and every date must
    /// carry every ticker.
    pub fn from_records(records: impl IntoIterator<Item = PanelRecord>) -> Result<Self> {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<Ticker, (f64, f64, f64)>> = BTreeMap::new();
        let mut tickers = BTreeSet::new();

        for record in records {
            if !(record.price.is_finite() && record.price > 0.0) {
                return Err(SimulationError::DataError(format!(
                    "Non-positive price {} for {} on {}",
                    record.price, record.ticker, record.date
                )));
            }
            if !(record.adjust_factor.is_finite() && record.adjust_factor > 0.0) {
                return Err(SimulationError::DataError(format!(
                    "Invalid adjustment factor {} for {} on {}",
                    record.adjust_factor, record.ticker, record.date
                )));
            }

            tickers.insert(record.ticker.clone());
            let row = by_date.entry(record.date).or_default();
            if row
                .insert(
                    record.ticker.clone(),
                    (record.ret, record.price, record.adjust_factor),
                )
                .is_some()
            {
                return Err(SimulationError::DataError(format!(
                    "Duplicate record for {} on {}",
                    record.ticker, record.date
                )));
            }
        }

        if by_date.is_empty() {
            return Err(SimulationError::DataError("Dataset contains no records".to_string()));
        }

        let tickers: Vec<Ticker> = tickers.into_iter().collect();
        let mut dates = Vec::with_capacity(by_date.len());
        let mut returns = Vec::with_capacity(by_date.len());
        let mut prices = Vec::with_capacity(by_date.len());
        let mut adjust_factors = Vec::with_capacity(by_date.len());

        for (date, row) in by_date {
            let mut r = Vec::with_capacity(tickers.len());
            let mut p = Vec::with_capacity(tickers.len());
            let mut a = Vec::with_capacity(tickers.len());
            for ticker in &tickers {
                let &(ret, price, adjust) = row.get(ticker).ok_or_else(|| {
                    SimulationError::DataError(format!("Missing record for {} on {}", ticker, date))
                })?;
                r.push(ret);
                p.push(price);
                a.push(adjust);
            }
            dates.push(date);
            returns.push(r);
            prices.push(p);
            adjust_factors.push(a);
        }

        debug!("Built panel: {} dates x {} tickers", dates.len(), tickers.len());

        Ok(Self {
            tickers,
            dates,
            returns,
            prices,
            adjust_factors,
        })
    }

    /// Tickers in column order.
    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    /// Trading dates, strictly increasing.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Index of `date` in the date axis.
    pub fn position_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Return vector for the date at `index`.
    pub fn returns(&self, index: usize) -> &[f64] {
        &self.returns[index]
    }

    /// Price vector for the date at `index`.
    pub fn prices(&self, index: usize) -> &[f64] {
        &self.prices[index]
    }

    /// Adjustment-factor vector for the date at `index`.
    pub fn adjust_factors(&self, index: usize) -> &[f64] {
        &self.adjust_factors[index]
    }

    /// The `size` most recent return rows strictly preceding `end_date`.
    ///
    /// Fails with [`SimulationError::InsufficientHistory`] when fewer than
    /// `size` rows precede the date; the window is never truncated.
    pub fn window(&self, end_date: NaiveDate, size: usize) -> Result<&[Vec<f64>]> {
        let end = self.dates.partition_point(|d| *d < end_date);
        if end < size {
            return Err(SimulationError::InsufficientHistory {
                date: end_date,
                required: size,
                available: end,
            });
        }
        Ok(&self.returns[end - size..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn records() -> Vec<PanelRecord> {
        let mut records = Vec::new();
        for d in (1..=5).rev() {
            records.push(PanelRecord::new(day(d), "B", d as f64 * 0.01, 20.0, 1.0));
            records.push(PanelRecord::new(day(d), "A", d as f64 * -0.01, 10.0, 1.0));
        }
        records
    }

    #[test]
    fn test_sorted_axes() {
        let panel = Panel::from_records(records()).unwrap();
        assert_eq!(panel.tickers(), &["A".to_string(), "B".to_string()]);
        assert_eq!(panel.dates().first(), Some(&day(1)));
        assert_eq!(panel.dates().last(), Some(&day(5)));
        assert_eq!(panel.prices(0), &[10.0, 20.0]);
        assert_eq!(panel.returns(2), &[-0.03, 0.03]);
    }

    #[test]
    fn test_window_strictly_precedes_date() {
        let panel = Panel::from_records(records()).unwrap();
        let window = panel.window(day(4), 2).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0], vec![-0.02, 0.02]);
        assert_eq!(window[1], vec![-0.03, 0.03]);
    }

    #[test]
    fn test_window_insufficient_history() {
        let panel = Panel::from_records(records()).unwrap();
        let err = panel.window(day(3), 3).unwrap_err();
        match err {
            SimulationError::InsufficientHistory {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_record_rejected() {
        let mut recs = records();
        recs.push(PanelRecord::new(day(1), "A", 0.0, 10.0, 1.0));
        assert!(Panel::from_records(recs).is_err());
    }

    #[test]
    fn test_missing_ticker_rejected() {
        let mut recs = records();
        recs.retain(|r| !(r.date == day(3) && r.ticker == "B"));
        assert!(Panel::from_records(recs).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Panel::from_records(vec![PanelRecord::new(day(1), "A", 0.0, 0.0, 1.0)]).is_err());
        assert!(Panel::from_records(vec![PanelRecord::new(day(1), "A", 0.0, 1.0, 0.0)]).is_err());
        assert!(Panel::from_records(Vec::new()).is_err());
    }

    #[test]
    fn test_position_of() {
        let panel = Panel::from_records(records()).unwrap();
        assert_eq!(panel.position_of(day(3)), Some(2));
        assert_eq!(panel.position_of(day(9)), None);
    }
}
