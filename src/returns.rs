use crate::data::PriceSeries;
use crate::error::{InvalidInputError, Result, SimError};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Per-step log returns, one fewer row than the source price table.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    /// rows = time, columns = assets
    values: DMatrix<f64>,
}

/// Mean vector and covariance matrix of per-asset log returns.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnModel {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// Computes `ln(p[t] / p[t-1])` for every asset, dropping the first row.
///
/// Fails with `InvalidInput` on the first non-positive or non-finite price,
/// checked before any return is computed, or on a log return that overflows.
pub fn estimate_returns(prices: &PriceSeries) -> Result<ReturnMatrix> {
    for (row, obs) in prices.rows().iter().enumerate() {
        for (asset, &value) in obs.prices.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(InvalidInputError::NonPositivePrice {
                    asset: prices.symbols()[asset].clone(),
                    row,
                    value,
                }
                .into());
            }
        }
    }

    let rows = prices.rows();
    let n_assets = prices.asset_count();
    let n_returns = rows.len().saturating_sub(1);
    let mut values = DMatrix::zeros(n_returns, n_assets);
    for t in 0..n_returns {
        for a in 0..n_assets {
            let (previous, current) = (rows[t].prices[a], rows[t + 1].prices[a]);
            let r = (current / previous).ln();
            // the ratio of two finite prices can still overflow or underflow
            if !r.is_finite() {
                return Err(InvalidInputError::NonFiniteReturn {
                    asset: prices.symbols()[a].clone(),
                    row: t + 1,
                    previous,
                    current,
                }
                .into());
            }
            values[(t, a)] = r;
        }
    }

    debug!("Estimated {}x{} log-return matrix", n_returns, n_assets);
    Ok(ReturnMatrix {
        symbols: prices.symbols().to_vec(),
        values,
    })
}

impl ReturnMatrix {
    /// Builds a return matrix from precomputed returns (rows = time).
    pub fn from_rows(symbols: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        if symbols.is_empty() {
            return Err(InvalidInputError::EmptyAssetSet.into());
        }
        let n_assets = symbols.len();
        for (t, row) in rows.iter().enumerate() {
            if row.len() != n_assets {
                return Err(SimError::dimension_mismatch("returns per row", n_assets, row.len()));
            }
            if !row.iter().all(|r| r.is_finite()) {
                return Err(SimError::non_finite_value("returns", t));
            }
        }
        let values = DMatrix::from_fn(rows.len(), n_assets, |t, a| rows[t][a]);
        Ok(Self { symbols, values })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn asset_count(&self) -> usize {
        self.values.ncols()
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn mean(&self) -> Result<DVector<f64>> {
        if self.is_empty() {
            return Err(SimError::insufficient_data(1, 0));
        }
        Ok(self.values.row_mean().transpose())
    }

    /// Sample covariance, denominator `rows - 1`.
    pub fn covariance(&self) -> Result<DMatrix<f64>> {
        let n = self.len();
        if n < 2 {
            return Err(SimError::insufficient_data(2, n));
        }
        let mean = self.values.row_mean();
        let centered = DMatrix::from_fn(n, self.asset_count(), |t, a| self.values[(t, a)] - mean[a]);
        let cov = centered.transpose() * &centered / (n as f64 - 1.0);
        // exact symmetry for the factorization step
        Ok((&cov + cov.transpose()) * 0.5)
    }

    pub fn model(&self) -> Result<ReturnModel> {
        let covariance = self.covariance()?;
        let mean = self.mean()?;
        Ok(ReturnModel { mean, covariance })
    }
}

impl ReturnModel {
    /// Wraps caller-supplied statistics after checking shape and finiteness.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let n = mean.len();
        if n == 0 {
            return Err(InvalidInputError::EmptyAssetSet.into());
        }
        if covariance.nrows() != n {
            return Err(SimError::dimension_mismatch("covariance rows", n, covariance.nrows()));
        }
        if covariance.ncols() != n {
            return Err(SimError::dimension_mismatch("covariance columns", n, covariance.ncols()));
        }
        if let Some(index) = mean.iter().position(|v| !v.is_finite()) {
            return Err(SimError::non_finite_value("mean vector", index));
        }
        if let Some(index) = covariance.iter().position(|v| !v.is_finite()) {
            return Err(SimError::non_finite_value("covariance matrix", index));
        }
        Ok(Self { mean, covariance })
    }

    pub fn asset_count(&self) -> usize {
        self.mean.len()
    }

    /// Scales daily statistics to `trading_period` steps per year.
    pub fn annualized(&self, trading_period: usize) -> Self {
        let scale = trading_period as f64;
        Self {
            mean: &self.mean * scale,
            covariance: &self.covariance * scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceRow;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn series(prices: &[[f64; 2]]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let rows = prices
            .iter()
            .enumerate()
            .map(|(i, p)| PriceRow {
                date: start + chrono::Duration::days(i as i64),
                prices: p.to_vec(),
            })
            .collect();
        PriceSeries::new(vec!["GOLD".into(), "OIL".into()], rows).unwrap()
    }

    #[test]
    fn test_log_returns_drop_first_row() {
        let prices = series(&[[100.0, 50.0], [110.0, 50.0], [99.0, 55.0]]);
        let returns = estimate_returns(&prices).unwrap();

        assert_eq!(returns.len(), 2);
        assert_eq!(returns.asset_count(), 2);
        assert_relative_eq!(returns.values()[(0, 0)], (1.1f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(returns.values()[(1, 0)], (0.9f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(returns.values()[(0, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(returns.values()[(1, 1)], (1.1f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_price_is_rejected_with_context() {
        let prices = series(&[[100.0, 50.0], [110.0, 0.0], [99.0, 55.0]]);
        let err = estimate_returns(&prices).unwrap_err();
        assert_eq!(
            err,
            SimError::InvalidInput(InvalidInputError::NonPositivePrice {
                asset: "OIL".into(),
                row: 1,
                value: 0.0,
            })
        );

        let prices = series(&[[100.0, 50.0], [-3.0, 51.0]]);
        assert!(estimate_returns(&prices).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_overflowing_log_return_is_rejected_with_context() {
        let prices = series(&[[1e-300, 50.0], [1e300, 51.0], [1.0, 52.0]]);
        let err = estimate_returns(&prices).unwrap_err();
        assert_eq!(
            err,
            SimError::InvalidInput(InvalidInputError::NonFiniteReturn {
                asset: "GOLD".into(),
                row: 1,
                previous: 1e-300,
                current: 1e300,
            })
        );
        assert!(crate::simulation::simulate(&prices, &[0.5, 0.5], 10, 3, Some(1))
            .unwrap_err()
            .is_invalid_input());
    }

    #[test]
    fn test_sample_covariance_matches_hand_computation() {
        let rows = vec![vec![0.01, 0.02], vec![-0.01, 0.00], vec![0.03, 0.04]];
        let returns = ReturnMatrix::from_rows(vec!["A".into(), "B".into()], &rows).unwrap();
        let model = returns.model().unwrap();

        assert_relative_eq!(model.mean[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(model.mean[1], 0.02, epsilon = 1e-12);
        // deviations a = [0, -0.02, 0.02], b = [0, -0.02, 0.02]
        assert_relative_eq!(model.covariance[(0, 0)], 0.0004, epsilon = 1e-12);
        assert_relative_eq!(model.covariance[(0, 1)], 0.0004, epsilon = 1e-12);
        assert_relative_eq!(model.covariance[(1, 0)], model.covariance[(0, 1)]);
    }

    #[test]
    fn test_covariance_needs_two_rows() {
        let returns = ReturnMatrix::from_rows(vec!["A".into()], &[vec![0.01]]).unwrap();
        assert_eq!(returns.covariance().unwrap_err(), SimError::insufficient_data(2, 1));
    }

    #[test]
    fn test_model_validation_and_annualization() {
        let err = ReturnModel::new(DVector::from_vec(vec![0.0, 0.0]), DMatrix::identity(3, 3)).unwrap_err();
        assert_eq!(err, SimError::dimension_mismatch("covariance rows", 2, 3));

        let model = ReturnModel::new(
            DVector::from_vec(vec![0.0004, 0.0002]),
            DMatrix::from_row_slice(2, 2, &[0.0001, 0.00003, 0.00003, 0.00008]),
        )
        .unwrap();
        let annual = model.annualized(252);
        assert_relative_eq!(annual.mean[0], 0.1008, epsilon = 1e-12);
        assert_relative_eq!(annual.covariance[(1, 1)], 0.02016, epsilon = 1e-12);
    }
}
