//! Two-objective portfolio model: volatility against expected log return.
//!
//! Weights live in `[0, 1]` per ticker and need not sum to one; the residual
//! `1 - sum(x)` is held as cash with a gross return of exactly 1.

use crate::covariance::{mean_returns, CovarianceEstimator};
use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};

/// Objective values and Sharpe score of one weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Portfolio volatility, `sqrt(x' Σ x)`.
    pub risk: f64,
    /// `ln(x · exp(μ) + (1 - sum(x)))`.
    pub expected_log_return: f64,
    pub sharpe: f64,
}

impl Evaluation {
    /// Objectives to minimize: `[risk, -expected_log_return]`.
    pub fn objectives(&self) -> [f64; 2] {
        [self.risk, -self.expected_log_return]
    }

    /// Both objectives are finite numbers.
    pub fn is_feasible(&self) -> bool {
        self.risk.is_finite() && self.expected_log_return.is_finite()
    }
}

/// Portfolio optimization problem for one relocation event.
#[derive(Debug, Clone)]
pub struct PortfolioProblem {
    gross_returns: Vec<f64>,
    covariance: Vec<Vec<f64>>,
}

impl PortfolioProblem {
    /// Create a problem from mean log returns and their covariance.
    pub fn new(mean_log_returns: &[f64], covariance: Vec<Vec<f64>>) -> Result<Self> {
        let n = mean_log_returns.len();
        if n == 0 {
            return Err(SimulationError::InvalidInput(
                "Problem needs at least one asset".to_string(),
            ));
        }
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(SimulationError::InvalidInput(format!(
                "Covariance matrix must be {n}x{n}"
            )));
        }

        Ok(Self {
            gross_returns: mean_log_returns.iter().map(|m| m.exp()).collect(),
            covariance,
        })
    }

    /// Estimate the problem inputs from a window of return rows.
    pub fn from_window(rows: &[Vec<f64>], estimator: CovarianceEstimator) -> Result<Self> {
        let mu = mean_returns(rows)?;
        let cov = estimator.estimate(rows)?;
        Self::new(&mu, cov)
    }

    /// Number of decision variables.
    pub fn n_var(&self) -> usize {
        self.gross_returns.len()
    }

    /// One-period gross return factor per asset.
    pub fn gross_returns(&self) -> &[f64] {
        &self.gross_returns
    }

    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    /// Expected log return of `x`; NaN or -inf when the wealth term is not positive.
    pub fn expected_log_return(&self, x: &[f64]) -> f64 {
        let invested: f64 = x.iter().sum();
        let growth: f64 = x.iter().zip(&self.gross_returns).map(|(w, g)| w * g).sum();
        (growth + (1.0 - invested)).ln()
    }

    /// Volatility of `x`.
    pub fn risk(&self, x: &[f64]) -> f64 {
        let mut variance = 0.0;
        for (i, wi) in x.iter().enumerate() {
            if *wi == 0.0 {
                continue;
            }
            for (j, wj) in x.iter().enumerate() {
                variance += wi * wj * self.covariance[i][j];
            }
        }
        variance.max(0.0).sqrt()
    }

    /// Evaluate both objectives and the Sharpe score.
    pub fn evaluate(&self, x: &[f64]) -> Evaluation {
        let expected_log_return = self.expected_log_return(x);
        let risk = self.risk(x);
        Evaluation {
            risk,
            expected_log_return,
            sharpe: expected_log_return / risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> PortfolioProblem {
        PortfolioProblem::new(
            &[0.01, 0.0],
            vec![vec![0.04, 0.01], vec![0.01, 0.09]],
        )
        .unwrap()
    }

    #[test]
    fn test_gross_returns_are_exponentiated() {
        let p = problem();
        assert!((p.gross_returns()[0] - 0.01f64.exp()).abs() < 1e-15);
        assert_eq!(p.gross_returns()[1], 1.0);
        assert_eq!(p.covariance()[0][1], 0.01);
    }

    #[test]
    fn test_all_cash_is_riskless_and_flat() {
        let eval = problem().evaluate(&[0.0, 0.0]);
        assert_eq!(eval.risk, 0.0);
        assert_eq!(eval.expected_log_return, 0.0);
        assert!(eval.sharpe.is_nan());
        assert!(eval.is_feasible());
    }

    #[test]
    fn test_evaluate_partial_allocation() {
        let p = problem();
        let x = [0.5, 0.25];
        let eval = p.evaluate(&x);
        let expected_ret = (0.5 * 0.01f64.exp() + 0.25 + 0.25).ln();
        let expected_risk = (0.25 * 0.04 + 2.0 * 0.5 * 0.25 * 0.01 + 0.0625 * 0.09f64).sqrt();
        assert!((eval.expected_log_return - expected_ret).abs() < 1e-12);
        assert!((eval.risk - expected_risk).abs() < 1e-12);
        assert!((eval.sharpe - expected_ret / expected_risk).abs() < 1e-12);
        assert_eq!(eval.objectives(), [eval.risk, -eval.expected_log_return]);
    }

    #[test]
    fn test_non_positive_wealth_is_infeasible() {
        let p = PortfolioProblem::new(&[-1.0], vec![vec![0.01]]).unwrap();
        // Over-allocated vector drives the wealth term negative.
        let eval = p.evaluate(&[2.0]);
        assert!(!eval.is_feasible());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        assert!(PortfolioProblem::new(&[0.0, 0.0], vec![vec![1.0]]).is_err());
        assert!(PortfolioProblem::new(&[], Vec::new()).is_err());
    }

    #[test]
    fn test_from_window() {
        let rows = vec![vec![0.01, 0.02], vec![0.03, 0.0]];
        let p = PortfolioProblem::from_window(&rows, CovarianceEstimator::Sample).unwrap();
        assert_eq!(p.n_var(), 2);
        assert!((p.gross_returns()[0] - 0.02f64.exp()).abs() < 1e-15);
        assert_eq!(p.covariance(), CovarianceEstimator::Sample.estimate(&rows).unwrap().as_slice());
        assert_eq!(p.covariance()[0][1], p.covariance()[1][0]);
    }
}
