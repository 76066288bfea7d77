//! Mean and covariance estimation over a lookback window of return rows.

use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Covariance estimator used at relocation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CovarianceEstimator {
    /// Unbiased sample covariance (divides by `n - 1`).
    #[default]
    Sample,
    /// Ledoit-Wolf shrinkage toward a scaled identity.
    LedoitWolf,
}

impl CovarianceEstimator {
    /// Estimate the covariance matrix of `rows` (observations x assets).
    pub fn estimate(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        match self {
            CovarianceEstimator::Sample => sample_covariance(rows),
            CovarianceEstimator::LedoitWolf => ledoit_wolf(rows).map(|(cov, _)| cov),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CovarianceEstimator::Sample => "sample",
            CovarianceEstimator::LedoitWolf => "ledoit_wolf",
        }
    }
}

impl FromStr for CovarianceEstimator {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sample" | "sample_covariance" | "pandas.cov" => Ok(CovarianceEstimator::Sample),
            "ledoit_wolf" | "ledoit-wolf" | "ledoitwolf" | "sklearn.ledoitwolf" => {
                Ok(CovarianceEstimator::LedoitWolf)
            }
            _ => Err(SimulationError::UnknownEstimator(s.to_string())),
        }
    }
}

impl TryFrom<String> for CovarianceEstimator {
    type Error = SimulationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CovarianceEstimator> for String {
    fn from(value: CovarianceEstimator) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for CovarianceEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn dimensions(rows: &[Vec<f64>]) -> Result<(usize, usize)> {
    let n_samples = rows.len();
    let n_assets = rows.first().map(|r| r.len()).unwrap_or(0);
    if n_samples == 0 || n_assets == 0 {
        return Err(SimulationError::InvalidInput(
            "Covariance estimation needs at least one observation and one asset".to_string(),
        ));
    }
    if rows.iter().any(|r| r.len() != n_assets) {
        return Err(SimulationError::InvalidInput(
            "Return rows have inconsistent lengths".to_string(),
        ));
    }
    Ok((n_samples, n_assets))
}

/// Column means of `rows`.
pub fn mean_returns(rows: &[Vec<f64>]) -> Result<Vec<f64>> {
    let (n_samples, n_assets) = dimensions(rows)?;
    let mut means = vec![0.0; n_assets];
    for row in rows {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in &mut means {
        *m /= n_samples as f64;
    }
    Ok(means)
}

fn centered(rows: &[Vec<f64>], means: &[f64]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| row.iter().zip(means).map(|(v, m)| v - m).collect())
        .collect()
}

/// Unbiased sample covariance. A single observation yields a zero matrix.
pub fn sample_covariance(rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let (n_samples, n_assets) = dimensions(rows)?;
    let means = mean_returns(rows)?;
    let x = centered(rows, &means);
    let denom = (n_samples.max(2) - 1) as f64;

    let mut cov = vec![vec![0.0; n_assets]; n_assets];
    for i in 0..n_assets {
        for j in i..n_assets {
            let c = x.iter().map(|r| r[i] * r[j]).sum::<f64>() / denom;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    Ok(cov)
}

/// Ledoit-Wolf shrunk covariance and the shrinkage intensity used.
///
/// Shrinks the maximum-likelihood covariance toward `mu * I`, where `mu` is
/// the average variance, with the intensity estimated from the data.
pub fn ledoit_wolf(rows: &[Vec<f64>]) -> Result<(Vec<Vec<f64>>, f64)> {
    let (n_samples, n_assets) = dimensions(rows)?;
    let means = mean_returns(rows)?;
    let x = centered(rows, &means);
    let n = n_samples as f64;
    let p = n_assets as f64;

    let mut emp_cov = vec![vec![0.0; n_assets]; n_assets];
    for i in 0..n_assets {
        for j in i..n_assets {
            let c = x.iter().map(|r| r[i] * r[j]).sum::<f64>() / n;
            emp_cov[i][j] = c;
            emp_cov[j][i] = c;
        }
    }

    let trace: f64 = (0..n_assets).map(|i| emp_cov[i][i]).sum();
    let mu = trace / p;

    let shrinkage = if n_assets == 1 {
        0.0
    } else {
        // delta_: squared entries of X'X; beta_: entries of (X^2)'(X^2)
        let mut delta_sum = 0.0;
        let mut beta_sum = 0.0;
        for i in 0..n_assets {
            for j in 0..n_assets {
                let xtx = emp_cov[i][j] * n;
                delta_sum += xtx * xtx;
                beta_sum += x.iter().map(|r| r[i] * r[i] * r[j] * r[j]).sum::<f64>();
            }
        }
        let delta_ = delta_sum / (n * n);
        let beta = (beta_sum / n - delta_) / (p * n);
        let delta = (delta_ - 2.0 * mu * trace + p * mu * mu) / p;
        let beta = beta.min(delta);
        if beta == 0.0 || delta <= 0.0 {
            0.0
        } else {
            (beta / delta).clamp(0.0, 1.0)
        }
    };

    let mut shrunk = emp_cov;
    for (i, row) in shrunk.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v *= 1.0 - shrinkage;
            if i == j {
                *v += shrinkage * mu;
            }
        }
    }
    Ok((shrunk, shrinkage))
}
