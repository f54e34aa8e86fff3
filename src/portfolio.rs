use crate::config::{self, ExecutionStrategy, Settings};
use crate::correlation::nearest_psd;
use crate::error::{NumericalError, Result, SimError, validate_weights};
use crate::parallel::{CancellationToken, map_batches, partition};
use crate::returns::{ReturnMatrix, ReturnModel};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Annualized return / risk profile of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
}

/// One randomly drawn portfolio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub weights: Vec<f64>,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
}

/// Random portfolios in draw order, tracing the feasible return/risk surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierSample {
    pub points: Vec<FrontierPoint>,
}

impl FrontierSample {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.annual_volatility).collect()
    }

    pub fn sharpe_ratios(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.sharpe_ratio).collect()
    }

    /// Highest-Sharpe draw (first one on ties).
    pub fn max_sharpe(&self) -> Option<&FrontierPoint> {
        self.points
            .iter()
            .reduce(|best, p| if p.sharpe_ratio > best.sharpe_ratio { p } else { best })
    }

    /// Lowest-volatility draw (first one on ties).
    pub fn min_volatility(&self) -> Option<&FrontierPoint> {
        self.points
            .iter()
            .reduce(|best, p| if p.annual_volatility < best.annual_volatility { p } else { best })
    }
}

#[derive(Clone, Debug)]
pub struct FrontierOptions {
    pub risk_free_rate: f64,
    pub seed: Option<u64>,
    pub strategy: ExecutionStrategy,
    pub batch_size: usize,
    pub cancel: Option<CancellationToken>,
}

impl Default for FrontierOptions {
    fn default() -> Self {
        Self {
            risk_free_rate: config::RISK_FREE_RATE,
            seed: None,
            strategy: ExecutionStrategy::Auto,
            batch_size: config::BATCH_SIZE,
            cancel: None,
        }
    }
}

impl FrontierOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            risk_free_rate: settings.risk_free_rate,
            seed: None,
            strategy: settings.strategy,
            batch_size: settings.batch_size,
            cancel: None,
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn portfolio_return(weights: &[f64], means: &DVector<f64>) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

fn portfolio_variance(weights: &[f64], cov: &DMatrix<f64>) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[(i, j)];
        }
    }
    var
}

/// Return, volatility and Sharpe for `weights` under `model`. Round-off
/// below zero in the quadratic form is clamped; volatility at or below
/// `floor` counts as zero.
fn evaluate(
    weights: &[f64],
    model: &ReturnModel,
    risk_free_rate: f64,
    floor: f64,
    draw: usize,
) -> Result<PortfolioStats> {
    let annual_return = portfolio_return(weights, &model.mean);
    let annual_volatility = portfolio_variance(weights, &model.covariance).max(0.0).sqrt();
    if !(annual_volatility > floor) {
        return Err(NumericalError::ZeroVolatility { draw }.into());
    }
    Ok(PortfolioStats {
        annual_return,
        annual_volatility,
        sharpe_ratio: (annual_return - risk_free_rate) / annual_volatility,
    })
}

/// Generates a random weight vector that sums to 1.0, using Dirichlet-like sampling.
fn generate_random_weights(n: usize, rng: &mut impl rand::Rng) -> Vec<f64> {
    use rand_distr::{Distribution, Exp1};
    let raw: Vec<f64> = (0..n).map(|_| Exp1.sample(rng)).collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| v / sum).collect()
}

/// Largest annualized volatility that centering round-off alone can produce.
/// Scales with the return magnitudes, so tiny but genuine variance survives.
fn volatility_floor(returns: &ReturnMatrix, trading_period: usize) -> f64 {
    let max_abs = returns.values().iter().fold(0.0f64, |m, r| m.max(r.abs()));
    returns.len() as f64 * f64::EPSILON * max_abs * (trading_period as f64).sqrt()
}

/// Annualized statistics with the covariance projected onto the
/// positive-semidefinite cone when strict Cholesky rejects it.
fn annualized_model(returns: &ReturnMatrix, trading_period: usize) -> Result<ReturnModel> {
    if trading_period == 0 {
        return Err(SimError::invalid_parameter("trading_period", "must be at least 1"));
    }
    let mut model = returns.model()?.annualized(trading_period);
    if Cholesky::new(model.covariance.clone()).is_none() {
        let (corrected, clamped) = nearest_psd(&model.covariance);
        if clamped > 0 {
            warn!(
                "Annualized covariance is not positive-semidefinite; clamped {} eigenvalue(s)",
                clamped
            );
        }
        model.covariance = corrected;
    }
    Ok(model)
}

// ──────────────────────────────────────────────────────────────────────────────
// Public API
// ──────────────────────────────────────────────────────────────────────────────

/// Annualized return, volatility and Sharpe ratio of a fixed allocation.
pub fn portfolio_stats(
    returns: &ReturnMatrix,
    weights: &[f64],
    trading_period: usize,
    risk_free_rate: f64,
) -> Result<PortfolioStats> {
    validate_weights(weights, returns.asset_count(), config::WEIGHT_TOLERANCE)?;
    let model = annualized_model(returns, trading_period)?;
    evaluate(weights, &model, risk_free_rate, volatility_floor(returns, trading_period), 0)
}

/// Draws `count` random long-only portfolios with default options.
pub fn sample_frontier(returns: &ReturnMatrix, count: usize, trading_period: usize) -> Result<FrontierSample> {
    FrontierSampler::default().sample(returns, count, trading_period)
}

#[derive(Clone, Debug, Default)]
pub struct FrontierSampler {
    options: FrontierOptions,
}

impl FrontierSampler {
    pub fn new(options: FrontierOptions) -> Self {
        Self { options }
    }

    pub fn sample(&self, returns: &ReturnMatrix, count: usize, trading_period: usize) -> Result<FrontierSample> {
        if trading_period == 0 {
            return Err(SimError::invalid_parameter("trading_period", "must be at least 1"));
        }
        if count == 0 {
            return Ok(FrontierSample::default());
        }

        let model = annualized_model(returns, trading_period)?;
        let n = model.asset_count();
        let seed = self.options.seed.unwrap_or_else(rand::random::<u64>);
        let strategy = config::resolve_execution_strategy(self.options.strategy, "frontier sampling");
        let risk_free_rate = self.options.risk_free_rate;
        let floor = volatility_floor(returns, trading_period);

        info!(
            "Sampling {} random portfolios over {} assets ({})",
            count,
            n,
            strategy.as_str()
        );

        let batches = map_batches(strategy, partition(count, self.options.batch_size), |batch| {
            let mut rng = batch.rng(seed);
            let mut points = Vec::with_capacity(batch.len);
            for i in 0..batch.len {
                if let Some(token) = &self.options.cancel {
                    token.check()?;
                }
                let weights = generate_random_weights(n, &mut rng);
                let stats = evaluate(&weights, &model, risk_free_rate, floor, batch.start + i)?;
                points.push(FrontierPoint {
                    weights,
                    annual_return: stats.annual_return,
                    annual_volatility: stats.annual_volatility,
                    sharpe_ratio: stats.sharpe_ratio,
                });
            }
            Ok(points)
        })?;

        Ok(FrontierSample {
            points: batches.into_iter().flatten().collect(),
        })
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
