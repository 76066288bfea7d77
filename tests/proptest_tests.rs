//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. The repair operator is idempotent and always returns feasible weights
//! 2. Covariance estimates are symmetric with non-negative variances
//! 3. Every recorded portfolio state satisfies the accounting identities

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::sync::Arc;

use kestrel::covariance::{ledoit_wolf, sample_covariance};
use kestrel::panel::Panel;
use kestrel::repair::PortfolioRepair;
use kestrel::simulation::{Simulation, SimulationConfig};
use kestrel::types::PanelRecord;

// ============================================================================
// Repair Operator Property Tests
// ============================================================================

/// Prices spread log-uniformly over `10^lo..10^hi`.
fn log_uniform(lo: f64, hi: f64) -> impl Strategy<Value = f64> {
    (lo..hi).prop_map(|e| 10f64.powf(e))
}

/// Prices, budget and a raw weight vector of matching length. Prices span
/// five decades so cheap tickers sit next to expensive ones.
fn repair_input_strategy() -> impl Strategy<Value = (Vec<f64>, f64, Vec<f64>)> {
    (1usize..6).prop_flat_map(|n| {
        (
            prop::collection::vec(log_uniform(-1.0, 4.0), n),
            log_uniform(1.0, 6.0),
            prop::collection::vec(-0.5..1.5f64, n),
        )
    })
}

proptest! {
    #[test]
    fn prop_repair_is_idempotent((prices, total, x) in repair_input_strategy()) {
        let repair = PortfolioRepair::new(prices, total).unwrap();
        let once = repair.repair(&x);
        let twice = repair.repair(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(repair.positions(&once), repair.positions(&x));
    }

    #[test]
    fn prop_repair_is_feasible((prices, total, x) in repair_input_strategy()) {
        let repair = PortfolioRepair::new(prices.clone(), total).unwrap();
        let weights = repair.repair(&x);

        let mut spend = 0.0;
        for (w, p) in weights.iter().zip(&prices) {
            prop_assert!(*w >= 0.0);
            let shares = w * total / p;
            prop_assert!(
                (shares - shares.round()).abs() < 1e-9 * shares.max(1.0),
                "fractional shares {}",
                shares
            );
            spend += w * total;
        }
        prop_assert!(spend <= total * (1.0 + 1e-9));
    }

    #[test]
    fn prop_positions_match_weights((prices, total, x) in repair_input_strategy()) {
        let repair = PortfolioRepair::new(prices.clone(), total).unwrap();
        let weights = repair.repair(&x);
        let positions = repair.positions(&x);
        for ((w, p), q) in weights.iter().zip(&prices).zip(&positions) {
            prop_assert!((w * total - p * *q as f64).abs() < 1e-6 * total.max(1.0));
        }
    }
}

// ============================================================================
// Covariance Property Tests
// ============================================================================

fn return_rows_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (2usize..5, 2usize..20).prop_flat_map(|(n_assets, n_rows)| {
        prop::collection::vec(prop::collection::vec(-0.1..0.1f64, n_assets), n_rows)
    })
}

proptest! {
    #[test]
    fn prop_covariance_symmetric(rows in return_rows_strategy()) {
        for cov in [sample_covariance(&rows).unwrap(), ledoit_wolf(&rows).unwrap().0] {
            for i in 0..cov.len() {
                prop_assert!(cov[i][i] >= -1e-15);
                for j in 0..cov.len() {
                    prop_assert!((cov[i][j] - cov[j][i]).abs() < 1e-15);
                }
            }
        }
    }

    #[test]
    fn prop_ledoit_wolf_shrinkage_in_unit_interval(rows in return_rows_strategy()) {
        let (_, shrinkage) = ledoit_wolf(&rows).unwrap();
        prop_assert!((0.0..=1.0).contains(&shrinkage));
    }
}

// ============================================================================
// Simulation Invariant Tests
// ============================================================================

/// Per-ticker (price, adjust factor) paths over a fixed number of days.
fn panel_strategy() -> impl Strategy<Value = Vec<Vec<(f64, f64)>>> {
    (1usize..4).prop_flat_map(|n| {
        prop::collection::vec(
            prop::collection::vec(
                (1.0..200.0f64, prop_oneof![4 => Just(1.0), 1 => Just(2.0), 1 => Just(0.5)]),
                12,
            ),
            n,
        )
    })
}

fn build_panel(paths: &[Vec<(f64, f64)>]) -> Panel {
    let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
    let mut records = Vec::new();
    for (k, path) in paths.iter().enumerate() {
        for (i, (price, factor)) in path.iter().enumerate() {
            records.push(PanelRecord::new(
                start + Duration::days(i as i64),
                format!("T{k}"),
                0.0,
                *price,
                *factor,
            ));
        }
    }
    Panel::from_records(records).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_states_satisfy_accounting(
        paths in panel_strategy(),
        amount in 100.0..1_000_000.0f64,
        interval in 1usize..5,
        raw in prop::collection::vec(0.0..1.0f64, 3),
    ) {
        let panel = Arc::new(build_panel(&paths));
        let n = panel.tickers().len();
        let sum: f64 = raw.iter().take(n).sum::<f64>().max(1.0);
        let allocation: Vec<f64> = raw.iter().take(n).map(|w| w / sum).collect();

        let config = SimulationConfig::new(panel.dates()[2], amount, 2)
            .with_initial_allocation(allocation)
            .with_rebalancing(interval);
        let mut simulation = Simulation::new(Arc::clone(&panel), config).unwrap();
        let history = simulation.run().unwrap();
        prop_assert_eq!(history.len(), 11);

        for state in &history[1..] {
            let index = panel.position_of(state.date).unwrap();
            prop_assert!(state.is_consistent(panel.prices(index), 1e-9));
            prop_assert!(state.cash >= -1e-9 * state.amount.max(1.0));
        }
    }
}
