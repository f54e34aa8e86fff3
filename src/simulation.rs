use crate::config::{self, ExecutionStrategy, Settings};
use crate::correlation::{CorrelationFactor, factorize};
use crate::data::PriceSeries;
use crate::error::{NumericalError, Result, SimError, validate_weights};
use crate::parallel::{Batch, CancellationToken, map_batches, partition};
use crate::returns::{ReturnModel, estimate_returns};
use crate::risk::percentile;
use rand_distr::{Distribution, StandardNormal};
use std::time::Instant;
use tracing::{debug, info};

// ──────────────────────────────────────────────────────────────────────────────
// Path containers
// ──────────────────────────────────────────────────────────────────────────────

/// Simulated asset prices indexed by (time step, simulation, asset).
#[derive(Clone, Debug, PartialEq)]
pub struct PricePath {
    steps: usize,
    simulations: usize,
    assets: usize,
    data: Vec<f64>,
}

impl PricePath {
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn simulations(&self) -> usize {
        self.simulations
    }

    pub fn assets(&self) -> usize {
        self.assets
    }

    #[inline]
    pub fn get(&self, t: usize, sim: usize, asset: usize) -> f64 {
        self.data[(t * self.simulations + sim) * self.assets + asset]
    }

    /// All (simulation, asset) prices at step `t`, simulation-major.
    pub fn time_step(&self, t: usize) -> &[f64] {
        let width = self.simulations * self.assets;
        &self.data[t * width..(t + 1) * width]
    }
}

/// Simulated portfolio values indexed by (time step, simulation).
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioPath {
    steps: usize,
    simulations: usize,
    data: Vec<f64>,
}

impl PortfolioPath {
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn simulations(&self) -> usize {
        self.simulations
    }

    #[inline]
    pub fn get(&self, t: usize, sim: usize) -> f64 {
        self.data[t * self.simulations + sim]
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.data[t * self.simulations..(t + 1) * self.simulations]
    }

    pub fn initial(&self) -> &[f64] {
        self.row(0)
    }

    /// Final time-step values; the input to every risk metric.
    pub fn terminal(&self) -> &[f64] {
        self.row(self.steps - 1)
    }

    /// Per-step `p`-th percentile across simulations (fan-chart band).
    pub fn percentile_band(&self, p: f64) -> Vec<f64> {
        (0..self.steps).map(|t| percentile(self.row(t), p)).collect()
    }
}

/// Output of one simulation run.
#[derive(Clone, Debug)]
pub struct Simulation {
    pub portfolio: PortfolioPath,
    pub prices: PricePath,
    /// Base seed actually used (drawn from the OS RNG when none was given).
    pub seed: u64,
    /// Whether the covariance needed the eigenvalue correction.
    pub factor_corrected: bool,
}

// ──────────────────────────────────────────────────────────────────────────────
// Simulator
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub strategy: ExecutionStrategy,
    pub batch_size: usize,
    pub weight_tolerance: f64,
    pub cancel: Option<CancellationToken>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Auto,
            batch_size: config::BATCH_SIZE,
            weight_tolerance: config::WEIGHT_TOLERANCE,
            cancel: None,
        }
    }
}

impl SimulationOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            strategy: settings.strategy,
            batch_size: settings.batch_size,
            weight_tolerance: settings.weight_tolerance,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Correlated log-normal path simulator.
#[derive(Clone, Debug, Default)]
pub struct Simulator {
    options: SimulationOptions,
}

struct BatchOutput {
    prices: Vec<f64>,
    portfolio: Vec<f64>,
}

/// Estimates statistics from `prices` and simulates with default options.
pub fn simulate(
    prices: &PriceSeries,
    weights: &[f64],
    simulations: usize,
    horizon: usize,
    seed: Option<u64>,
) -> Result<Simulation> {
    Simulator::default().simulate(prices, weights, simulations, horizon, seed)
}

impl Simulator {
    pub fn new(options: SimulationOptions) -> Self {
        Self { options }
    }

    /// Full pipeline from a price table: returns → statistics → factor → paths.
    pub fn simulate(
        &self,
        prices: &PriceSeries,
        weights: &[f64],
        simulations: usize,
        horizon: usize,
        seed: Option<u64>,
    ) -> Result<Simulation> {
        validate_run_shape(simulations, horizon)?;
        validate_weights(weights, prices.asset_count(), self.options.weight_tolerance)?;
        let last_prices = prices
            .last_prices()
            .ok_or_else(|| SimError::insufficient_data(3, 0))?;

        let returns = estimate_returns(prices)?;
        let model = returns.model()?;
        self.run(&model, last_prices, weights, simulations, horizon, seed)
    }

    /// Simulates `simulations` paths of `horizon` steps (step 0 is the last
    /// observed price) from precomputed statistics.
    pub fn run(
        &self,
        model: &ReturnModel,
        last_prices: &[f64],
        weights: &[f64],
        simulations: usize,
        horizon: usize,
        seed: Option<u64>,
    ) -> Result<Simulation> {
        let n = model.asset_count();
        validate_run_shape(simulations, horizon)?;
        validate_weights(weights, n, self.options.weight_tolerance)?;
        if last_prices.len() != n {
            return Err(SimError::dimension_mismatch("last prices", n, last_prices.len()));
        }
        if let Some(index) = last_prices.iter().position(|p| !(p.is_finite() && *p > 0.0)) {
            return Err(SimError::invalid_parameter(
                "last_prices",
                format!("price at index {} must be positive and finite, got {}", index, last_prices[index]),
            ));
        }

        let factor = factorize(&model.covariance)?;
        let seed = seed.unwrap_or_else(|| {
            let drawn = rand::random::<u64>();
            debug!("No seed supplied; drew base seed {}", drawn);
            drawn
        });
        let strategy = config::resolve_execution_strategy(self.options.strategy, "path simulation");
        let batches = partition(simulations, self.options.batch_size);

        info!(
            "Simulating {} paths x {} steps for {} assets ({} batches, {})",
            simulations,
            horizon,
            n,
            batches.len(),
            strategy.as_str()
        );
        let started = Instant::now();

        let outputs = map_batches(strategy, batches.clone(), |batch| {
            self.simulate_batch(batch, model, &factor, last_prices, weights, horizon, seed)
        })?;

        let mut price_data = vec![0.0; horizon * simulations * n];
        let mut portfolio_data = vec![0.0; horizon * simulations];
        for (batch, out) in batches.iter().zip(outputs) {
            let m = batch.len;
            for t in 0..horizon {
                let dst = (t * simulations + batch.start) * n;
                price_data[dst..dst + m * n].copy_from_slice(&out.prices[t * m * n..(t + 1) * m * n]);
                let dst = t * simulations + batch.start;
                portfolio_data[dst..dst + m].copy_from_slice(&out.portfolio[t * m..(t + 1) * m]);
            }
        }

        let portfolio = PortfolioPath {
            steps: horizon,
            simulations,
            data: portfolio_data,
        };
        if portfolio.terminal().iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::NonFiniteResult { what: "terminal portfolio values" }.into());
        }

        info!("Simulation completed in {:.2?}", started.elapsed());
        Ok(Simulation {
            portfolio,
            prices: PricePath {
                steps: horizon,
                simulations,
                assets: n,
                data: price_data,
            },
            seed,
            factor_corrected: factor.corrected(),
        })
    }

    /// One batch: draw (T, m, n) noise, correlate, add drift, compound, weight.
    #[allow(clippy::too_many_arguments)]
    fn simulate_batch(
        &self,
        batch: Batch,
        model: &ReturnModel,
        factor: &CorrelationFactor,
        last_prices: &[f64],
        weights: &[f64],
        horizon: usize,
        seed: u64,
    ) -> Result<BatchOutput> {
        let n = model.asset_count();
        let m = batch.len;
        let width = m * n;
        let mut rng = batch.rng(seed);

        // Simulated daily log returns, shape (T, m, n).
        let mut returns = vec![0.0; horizon * width];
        let mut z = vec![0.0; n];
        for step in returns.chunks_exact_mut(n) {
            for v in z.iter_mut() {
                *v = StandardNormal.sample(&mut rng);
            }
            factor.correlate(&z, step);
            for (r, mu) in step.iter_mut().zip(model.mean.iter()) {
                *r += mu;
            }
        }

        let mut prices = vec![0.0; horizon * width];
        for row in prices[..width].chunks_exact_mut(n) {
            row.copy_from_slice(last_prices);
        }
        for t in 1..horizon {
            if let Some(token) = &self.options.cancel {
                token.check()?;
            }
            let (done, rest) = prices.split_at_mut(t * width);
            let prev = &done[(t - 1) * width..];
            let current = &mut rest[..width];
            let step_returns = &returns[t * width..(t + 1) * width];
            for ((p, prev_p), r) in current.iter_mut().zip(prev).zip(step_returns) {
                *p = prev_p * r.exp();
            }
        }

        let portfolio = prices
            .chunks_exact(n)
            .map(|asset_prices| asset_prices.iter().zip(weights).map(|(p, w)| p * w).sum())
            .collect();

        Ok(BatchOutput { prices, portfolio })
    }
}

fn validate_run_shape(simulations: usize, horizon: usize) -> Result<()> {
    if simulations == 0 {
        return Err(SimError::invalid_parameter("simulations", "must be at least 1"));
    }
    if horizon == 0 {
        return Err(SimError::invalid_parameter("horizon", "must be at least 1 step"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidInputError;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    fn two_asset_model() -> ReturnModel {
        ReturnModel::new(
            DVector::from_vec(vec![0.0004, 0.0002]),
            DMatrix::from_row_slice(2, 2, &[0.0001, 0.00003, 0.00003, 0.00008]),
        )
        .unwrap()
    }

    fn sequential() -> Simulator {
        Simulator::new(SimulationOptions {
            strategy: ExecutionStrategy::Sequential,
            ..Default::default()
        })
    }

    #[test]
    fn test_shapes_and_initial_row() {
        let sim = sequential()
            .run(&two_asset_model(), &[100.0, 50.0], &[0.6, 0.4], 300, 5, Some(42))
            .unwrap();

        assert_eq!(sim.portfolio.steps(), 5);
        assert_eq!(sim.portfolio.simulations(), 300);
        assert_eq!(sim.prices.assets(), 2);
        assert_eq!(sim.prices.time_step(4).len(), 600);
        for s in 0..300 {
            assert_eq!(sim.prices.get(0, s, 0), 100.0);
            assert_eq!(sim.prices.get(0, s, 1), 50.0);
            assert_relative_eq!(sim.portfolio.get(0, s), 80.0, epsilon = 1e-12);
        }
        assert!(sim.portfolio.terminal().iter().all(|v| *v > 0.0));
        assert!(!sim.factor_corrected);
    }

    #[test]
    fn test_indefinite_covariance_is_corrected_and_reproducible() {
        let model = ReturnModel::new(
            DVector::from_vec(vec![0.0003, 0.0001, 0.0002]),
            DMatrix::from_row_slice(3, 3, &[
                1e-4, 0.9e-4, -0.9e-4,
                0.9e-4, 1e-4, 0.9e-4,
                -0.9e-4, 0.9e-4, 1e-4,
            ]),
        )
        .unwrap();
        let last = [100.0, 40.0, 25.0];
        let weights = [0.5, 0.3, 0.2];

        let a = sequential().run(&model, &last, &weights, 600, 10, Some(21)).unwrap();
        assert!(a.factor_corrected);
        assert!(a.portfolio.terminal().iter().all(|v| v.is_finite() && *v > 0.0));

        let b = sequential().run(&model, &last, &weights, 600, 10, Some(21)).unwrap();
        assert_eq!(a.portfolio, b.portfolio);

        let par = Simulator::new(SimulationOptions {
            strategy: ExecutionStrategy::Parallel,
            ..Default::default()
        })
        .run(&model, &last, &weights, 600, 10, Some(21))
        .unwrap();
        assert!(par.factor_corrected);
        assert_eq!(a.portfolio, par.portfolio);
    }

    #[test]
    fn test_portfolio_is_weighted_sum_of_prices() {
        let weights = [0.6, 0.4];
        let sim = sequential()
            .run(&two_asset_model(), &[100.0, 50.0], &weights, 10, 8, Some(3))
            .unwrap();
        for t in 0..8 {
            for s in 0..10 {
                let expected = 0.6 * sim.prices.get(t, s, 0) + 0.4 * sim.prices.get(t, s, 1);
                assert_relative_eq!(sim.portfolio.get(t, s), expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_seeded_runs_are_bit_identical_across_strategies() {
        let model = two_asset_model();
        let a = sequential().run(&model, &[100.0, 50.0], &[0.6, 0.4], 1000, 5, Some(42)).unwrap();
        let b = sequential().run(&model, &[100.0, 50.0], &[0.6, 0.4], 1000, 5, Some(42)).unwrap();
        let par = Simulator::new(SimulationOptions {
            strategy: ExecutionStrategy::Parallel,
            ..Default::default()
        })
        .run(&model, &[100.0, 50.0], &[0.6, 0.4], 1000, 5, Some(42))
        .unwrap();

        assert_eq!(a.portfolio, b.portfolio);
        assert_eq!(a.portfolio, par.portfolio);
        assert_eq!(a.prices, par.prices);

        let other = sequential().run(&model, &[100.0, 50.0], &[0.6, 0.4], 1000, 5, Some(43)).unwrap();
        assert_ne!(a.portfolio, other.portfolio);
    }

    #[test]
    fn test_unseeded_runs_differ_and_report_seed() {
        let model = two_asset_model();
        let a = sequential().run(&model, &[100.0, 50.0], &[0.6, 0.4], 50, 5, None).unwrap();
        let b = sequential().run(&model, &[100.0, 50.0], &[0.6, 0.4], 50, 5, None).unwrap();
        assert_ne!(a.portfolio, b.portfolio);

        let replay = sequential()
            .run(&model, &[100.0, 50.0], &[0.6, 0.4], 50, 5, Some(a.seed))
            .unwrap();
        assert_eq!(a.portfolio, replay.portfolio);
    }

    #[test]
    fn test_single_asset_is_geometric_random_walk() {
        let mu = 0.001;
        let sigma = 0.02;
        let model = ReturnModel::new(
            DVector::from_vec(vec![mu]),
            DMatrix::from_row_slice(1, 1, &[sigma * sigma]),
        )
        .unwrap();
        let sim = sequential().run(&model, &[100.0], &[1.0], 4000, 3, Some(11)).unwrap();

        // per-step log returns should carry the asset's own mean and variance
        let mut steps = Vec::new();
        for s in 0..4000 {
            for t in 1..3 {
                steps.push((sim.prices.get(t, s, 0) / sim.prices.get(t - 1, s, 0)).ln());
            }
            assert_relative_eq!(sim.portfolio.get(2, s), sim.prices.get(2, s, 0), epsilon = 1e-12);
        }
        let n = steps.len() as f64;
        let mean = steps.iter().sum::<f64>() / n;
        let var = steps.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!((mean - mu).abs() < 4.0 * sigma / n.sqrt(), "mean {} too far from {}", mean, mu);
        assert!((var.sqrt() - sigma).abs() < 0.05 * sigma, "std {} too far from {}", var.sqrt(), sigma);
    }

    #[test]
    fn test_invalid_inputs_fail_before_drawing() {
        let model = two_asset_model();
        let sim = sequential();

        let err = sim.run(&model, &[100.0, 50.0], &[0.5, 0.3], 10, 5, Some(1)).unwrap_err();
        assert!(matches!(err, SimError::InvalidInput(InvalidInputError::WeightSum { .. })));

        let err = sim.run(&model, &[100.0, 50.0], &[1.0], 10, 5, Some(1)).unwrap_err();
        assert_eq!(err, SimError::dimension_mismatch("weight count", 2, 1));

        let err = sim.run(&model, &[100.0], &[0.6, 0.4], 10, 5, Some(1)).unwrap_err();
        assert_eq!(err, SimError::dimension_mismatch("last prices", 2, 1));

        assert!(sim.run(&model, &[100.0, -1.0], &[0.6, 0.4], 10, 5, Some(1)).unwrap_err().is_invalid_input());
        assert!(sim.run(&model, &[100.0, 50.0], &[0.6, 0.4], 0, 5, Some(1)).unwrap_err().is_invalid_input());
        assert!(sim.run(&model, &[100.0, 50.0], &[0.6, 0.4], 10, 0, Some(1)).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_cancelled_run_returns_no_output() {
        let token = CancellationToken::new();
        token.cancel();
        let sim = Simulator::new(SimulationOptions::default().with_cancellation(token));
        let err = sim
            .run(&two_asset_model(), &[100.0, 50.0], &[0.6, 0.4], 100, 10, Some(5))
            .unwrap_err();
        assert_eq!(err, SimError::Cancelled);
    }

    #[test]
    fn test_simulate_from_price_table() {
        let prices = PriceSeries::new_mock(&["GC=F", "SI=F", "CL=F"], 120, 9);
        let sim = simulate(&prices, &[0.5, 0.3, 0.2], 200, 20, Some(1)).unwrap();
        assert_eq!(sim.portfolio.simulations(), 200);
        assert_eq!(sim.prices.time_step(0)[..3], prices.last_prices().unwrap()[..]);
        assert!(sim.portfolio.terminal().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_percentile_band_is_ordered() {
        let sim = sequential()
            .run(&two_asset_model(), &[100.0, 50.0], &[0.6, 0.4], 500, 10, Some(8))
            .unwrap();
        let low = sim.portfolio.percentile_band(5.0);
        let high = sim.portfolio.percentile_band(95.0);
        assert_eq!(low.len(), 10);
        assert!(low.iter().zip(&high).all(|(l, h)| l <= h));
        assert_relative_eq!(low[0], 80.0, epsilon = 1e-12);
    }
}
