use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use portsim::config::{self, ExecutionStrategy, Settings};
use portsim::data::PriceSeries;
use portsim::portfolio::{FrontierOptions, FrontierSampler};
use portsim::report::{self, RunRecord};
use portsim::simulation::{SimulationOptions, Simulator};
use portsim::{estimate_returns, portfolio_stats, risk};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum StrategyChoice {
    Auto,
    Sequential,
    Parallel,
}

impl From<StrategyChoice> for ExecutionStrategy {
    fn from(choice: StrategyChoice) -> Self {
        match choice {
            StrategyChoice::Auto => ExecutionStrategy::Auto,
            StrategyChoice::Sequential => ExecutionStrategy::Sequential,
            StrategyChoice::Parallel => ExecutionStrategy::Parallel,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "portsim: correlated Monte Carlo projection of multi-asset portfolios",
    after_help = "EXAMPLES:
    # Simulate three mock assets with equal weights
    cargo run --release -- --mock-assets 3 --seed 42

    # Simulate a price table with explicit weights
    cargo run --release -- --prices prices.json --weights 0.5,0.3,0.2 --sims 5000

    # Write the full run record to a file
    cargo run --release -- --mock-assets 4 --output run.json"
)]
struct Args {
    /// JSON price table: { \"symbols\": [..], \"rows\": [{ \"date\": \"YYYY-MM-DD\", \"prices\": [..] }] }
    #[arg(long, conflicts_with = "mock_assets")]
    prices: Option<PathBuf>,

    /// Generate a synthetic price table with this many assets instead of loading one
    #[arg(long)]
    mock_assets: Option<usize>,

    /// Trading days of synthetic history (default: 500)
    #[arg(long, default_value_t = 500)]
    mock_days: usize,

    /// Comma-separated portfolio weights, one per asset (default: equal weights)
    #[arg(long)]
    weights: Option<String>,

    /// Number of simulated paths (default: 1000, or PORTSIM_SIMULATIONS)
    #[arg(long)]
    sims: Option<usize>,

    /// Time steps per path including today (default: 252, or PORTSIM_HORIZON)
    #[arg(long)]
    horizon: Option<usize>,

    /// Base seed; omit for a fresh random run
    #[arg(long)]
    seed: Option<u64>,

    /// VaR / Expected Shortfall confidence level (default: 0.95)
    #[arg(long)]
    confidence: Option<f64>,

    /// Random portfolios to sample for the frontier (default: 10000, 0 disables)
    #[arg(long)]
    frontier_points: Option<usize>,

    /// Execution strategy for simulation and sampling
    #[arg(long, value_enum)]
    strategy: Option<StrategyChoice>,

    /// Worker threads for the rayon pool (default: all logical CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Write the run record as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portsim=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    config::init_cpu_parallelism(args.threads);

    let mut settings = Settings::from_env();
    if let Some(v) = args.sims {
        settings.simulations = v;
    }
    if let Some(v) = args.horizon {
        settings.horizon = v;
    }
    if let Some(v) = args.confidence {
        settings.confidence = v;
    }
    if let Some(v) = args.frontier_points {
        settings.frontier_points = v;
    }
    if let Some(v) = args.strategy.clone() {
        settings.strategy = v.into();
    }
    settings.validate().context("Invalid settings")?;

    let prices = load_prices(&args)?;
    let symbols = prices.symbols().to_vec();
    let weights = parse_weights(args.weights.as_deref(), symbols.len())?;
    info!(
        "Loaded {} rows for {} assets ({})",
        prices.len(),
        symbols.len(),
        symbols.join(", ")
    );

    let returns = estimate_returns(&prices).context("Failed to estimate returns")?;
    let stats = portfolio_stats(&returns, &weights, settings.trading_days, settings.risk_free_rate)
        .context("Failed to compute portfolio statistics")?;

    let frontier = FrontierSampler::new(FrontierOptions {
        seed: args.seed,
        ..FrontierOptions::from_settings(&settings)
    })
    .sample(&returns, settings.frontier_points, settings.trading_days)
    .context("Frontier sampling failed")?;

    let simulator = Simulator::new(SimulationOptions::from_settings(&settings));
    let simulation = simulator
        .simulate(&prices, &weights, settings.simulations, settings.horizon, args.seed)
        .context("Simulation failed")?;
    if simulation.factor_corrected {
        warn!("Covariance matrix was not positive-definite; simulated with the corrected matrix");
    }

    let metrics = risk::analyze(&simulation.portfolio, settings.confidence).context("Risk analysis failed")?;

    report::print_risk_summary(&symbols, &weights, &stats, &metrics);
    if !frontier.is_empty() {
        report::print_frontier_summary(&symbols, &frontier);
    }

    if let Some(ref path) = args.output {
        let p5 = simulation.portfolio.percentile_band(5.0);
        let p50 = simulation.portfolio.percentile_band(50.0);
        let p95 = simulation.portfolio.percentile_band(95.0);
        let fan_chart = (0..p50.len()).map(|t| [p5[t], p50[t], p95[t]]).collect();

        let record = RunRecord {
            created_at: RunRecord::stamp(),
            symbols: symbols.clone(),
            weights: weights.clone(),
            seed: simulation.seed,
            covariance_corrected: simulation.factor_corrected,
            portfolio_stats: stats,
            risk_metrics: metrics,
            fan_chart,
            max_sharpe: frontier.max_sharpe().cloned(),
            min_volatility: frontier.min_volatility().cloned(),
            frontier_points: frontier.len(),
            settings,
        };
        report::persist_run_record(&record, Some(path)).context("Failed to write run record")?;
    }

    Ok(())
}

fn load_prices(args: &Args) -> Result<PriceSeries> {
    if let Some(ref path) = args.prices {
        return PriceSeries::from_json_file(path);
    }
    let n_assets = args.mock_assets.unwrap_or(3);
    if n_assets == 0 {
        anyhow::bail!("--mock-assets must be at least 1");
    }
    let names: Vec<String> = (1..=n_assets).map(|i| format!("ASSET{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    info!("No price table given; generating {} days of mock data", args.mock_days);
    Ok(PriceSeries::new_mock(&refs, args.mock_days, 42))
}

fn parse_weights(raw: Option<&str>, n_assets: usize) -> Result<Vec<f64>> {
    let Some(raw) = raw else {
        return Ok(vec![1.0 / n_assets as f64; n_assets]);
    };
    let weights = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().with_context(|| format!("Invalid weight '{}'", s)))
        .collect::<Result<Vec<_>>>()?;
    if weights.len() != n_assets {
        anyhow::bail!("Expected {} weights, got {}", n_assets, weights.len());
    }
    Ok(weights)
}
