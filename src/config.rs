use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

/// Annualized risk-free rate used in Sharpe calculations.
pub const RISK_FREE_RATE: f64 = 0.02;
/// Number of simulated paths per run.
pub const MONTE_CARLO_SIMS: usize = 1000;
/// Simulation horizon in trading days (one year).
pub const TIME_HORIZON: usize = 252;
/// Random portfolios drawn for the frontier.
pub const EFFICIENT_FRONTIER_POINTS: usize = 10_000;
/// Annual trading days for annualization.
pub const TRADING_DAYS: usize = 252;
/// Default VaR / Expected Shortfall confidence.
pub const CONFIDENCE_LEVEL: f64 = 0.95;
/// Relative tolerance on the weight sum.
pub const WEIGHT_TOLERANCE: f64 = 0.01;
/// Simulation indices (or frontier draws) per independent batch.
/// Fixed so that seeded output does not depend on the thread count.
pub const BATCH_SIZE: usize = 256;

pub const MIN_SIMULATIONS: usize = 100;
pub const MIN_HORIZON: usize = 30;
pub const MAX_RISK_FREE_RATE: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Auto,
    Sequential,
    Parallel,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

/// Builds the global rayon pool once. `threads = None` uses every logical core.
pub fn init_cpu_parallelism(threads: Option<usize>) {
    RAYON_INIT.get_or_init(|| {
        let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!("Initialized Rayon thread pool with {} threads", num_threads),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

pub fn resolve_execution_strategy(requested: ExecutionStrategy, context: &str) -> ExecutionStrategy {
    match requested {
        ExecutionStrategy::Auto => {
            if rayon::current_num_threads() > 1 {
                info!("Execution strategy=auto for {} -> selected parallel", context);
                ExecutionStrategy::Parallel
            } else {
                info!("Execution strategy=auto for {} -> selected sequential", context);
                ExecutionStrategy::Sequential
            }
        }
        other => other,
    }
}

/// Run-wide parameters. Passed explicitly to the core, never read globally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub risk_free_rate: f64,
    pub simulations: usize,
    pub horizon: usize,
    pub frontier_points: usize,
    pub trading_days: usize,
    pub confidence: f64,
    pub weight_tolerance: f64,
    pub batch_size: usize,
    pub strategy: ExecutionStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            risk_free_rate: RISK_FREE_RATE,
            simulations: MONTE_CARLO_SIMS,
            horizon: TIME_HORIZON,
            frontier_points: EFFICIENT_FRONTIER_POINTS,
            trading_days: TRADING_DAYS,
            confidence: CONFIDENCE_LEVEL,
            weight_tolerance: WEIGHT_TOLERANCE,
            batch_size: BATCH_SIZE,
            strategy: ExecutionStrategy::Auto,
        }
    }
}

impl Settings {
    /// Defaults overridden by `PORTSIM_*` environment variables. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(v) = env_override("PORTSIM_RISK_FREE_RATE") {
            settings.risk_free_rate = v;
        }
        if let Some(v) = env_override("PORTSIM_SIMULATIONS") {
            settings.simulations = v;
        }
        if let Some(v) = env_override("PORTSIM_HORIZON") {
            settings.horizon = v;
        }
        if let Some(v) = env_override("PORTSIM_FRONTIER_POINTS") {
            settings.frontier_points = v;
        }
        if let Some(v) = env_override("PORTSIM_TRADING_DAYS") {
            settings.trading_days = v;
        }
        if let Some(v) = env_override("PORTSIM_CONFIDENCE") {
            settings.confidence = v;
        }
        if let Some(v) = env_override("PORTSIM_BATCH_SIZE") {
            settings.batch_size = v;
        }
        if let Ok(raw) = std::env::var("PORTSIM_STRATEGY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "auto" => settings.strategy = ExecutionStrategy::Auto,
                "sequential" => settings.strategy = ExecutionStrategy::Sequential,
                "parallel" => settings.strategy = ExecutionStrategy::Parallel,
                other => warn!(
                    "Unknown PORTSIM_STRATEGY={} ; keeping {}. Allowed values: auto | sequential | parallel",
                    other,
                    settings.strategy.as_str()
                ),
            }
        }
        settings
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=MAX_RISK_FREE_RATE).contains(&self.risk_free_rate) {
            anyhow::bail!(
                "Risk-free rate should be between 0% and {:.0}%, got {}",
                MAX_RISK_FREE_RATE * 100.0,
                self.risk_free_rate
            );
        }
        if self.simulations < MIN_SIMULATIONS {
            anyhow::bail!("Minimum {} simulations required, got {}", MIN_SIMULATIONS, self.simulations);
        }
        if self.horizon < MIN_HORIZON {
            anyhow::bail!("Minimum {} day horizon required, got {}", MIN_HORIZON, self.horizon);
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            anyhow::bail!("Confidence must lie in (0, 1), got {}", self.confidence);
        }
        if self.trading_days == 0 {
            anyhow::bail!("Trading days per year must be positive");
        }
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be positive");
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={} : not a valid value", key, trimmed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.simulations, MONTE_CARLO_SIMS);
        assert_eq!(settings.horizon, TIME_HORIZON);
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut settings = Settings::default();
        settings.risk_free_rate = 0.25;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.simulations = 10;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.horizon = 5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.confidence = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize_with_partial_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"simulations": 5000, "strategy": "sequential"}"#).unwrap();
        assert_eq!(settings.simulations, 5000);
        assert_eq!(settings.strategy, ExecutionStrategy::Sequential);
        assert_eq!(settings.horizon, TIME_HORIZON);
    }

    #[test]
    fn test_explicit_strategy_is_kept() {
        assert_eq!(
            resolve_execution_strategy(ExecutionStrategy::Sequential, "test"),
            ExecutionStrategy::Sequential
        );
        assert_eq!(
            resolve_execution_strategy(ExecutionStrategy::Parallel, "test"),
            ExecutionStrategy::Parallel
        );
    }
}
