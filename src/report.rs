use crate::config::Settings;
use crate::portfolio::{FrontierPoint, FrontierSample, PortfolioStats};
use crate::risk::RiskMetrics;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything one CLI run produced, persisted as pretty JSON.
#[derive(Serialize)]
pub struct RunRecord {
    pub created_at: String,
    pub symbols: Vec<String>,
    pub weights: Vec<f64>,
    pub settings: Settings,
    pub seed: u64,
    pub covariance_corrected: bool,
    pub portfolio_stats: PortfolioStats,
    pub risk_metrics: RiskMetrics,
    /// p5 / p50 / p95 portfolio value per time step.
    pub fan_chart: Vec<[f64; 3]>,
    pub max_sharpe: Option<FrontierPoint>,
    pub min_volatility: Option<FrontierPoint>,
    pub frontier_points: usize,
}

impl RunRecord {
    pub fn stamp() -> String {
        Utc::now().to_rfc3339()
    }
}

/// Writes the record to `path`, or to `outputs/run_<timestamp>_<pid>.json`.
pub fn persist_run_record(record: &RunRecord, path: Option<&Path>) -> Result<PathBuf> {
    let file_path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let out_dir = Path::new("outputs");
            if !out_dir.exists() {
                std::fs::create_dir_all(out_dir)?;
            }
            out_dir.join(format!(
                "run_{}_{}.json",
                Utc::now().format("%Y%m%d_%H%M%S"),
                std::process::id()
            ))
        }
    };

    let file = std::fs::File::create(&file_path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, record)?;
    info!("Run record written to {}", file_path.display());

    Ok(file_path)
}

/// Pretty-prints portfolio statistics and risk metrics to stdout.
pub fn print_risk_summary(symbols: &[String], weights: &[f64], stats: &PortfolioStats, metrics: &RiskMetrics) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║           Monte Carlo Portfolio Projection                 ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    for (sym, w) in symbols.iter().zip(weights) {
        println!("║  {:<10} {:>7.2}%                                        ║", sym, w * 100.0);
    }
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Expected Annual Return : {:>+7.2}%                         ║",
        stats.annual_return * 100.0
    );
    println!(
        "║  Expected Annual Vol    : {:>7.2}%                          ║",
        stats.annual_volatility * 100.0
    );
    println!(
        "║  Sharpe Ratio           : {:>7.2}                           ║",
        stats.sharpe_ratio
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Simulations            : {:>10}                        ║",
        metrics.sample_count
    );
    if let Some(initial) = metrics.initial_value {
        println!("║  Initial Value          : {:>10.2}                        ║", initial);
    }
    println!("║  Mean Terminal Value    : {:>10.2}                        ║", metrics.mean);
    println!("║  Median                 : {:>10.2}                        ║", metrics.median);
    println!("║  Std Dev                : {:>10.2}                        ║", metrics.std_dev);
    println!(
        "║  VaR ({:>4.1}%)            : {:>10.2}                        ║",
        metrics.confidence * 100.0,
        metrics.value_at_risk
    );
    println!(
        "║  Expected Shortfall     : {:>10.2}                        ║",
        metrics.expected_shortfall
    );
    println!(
        "║  Best Case (95th %ile)  : {:>10.2}                        ║",
        metrics.percentile_95
    );
    println!(
        "║  Worst Case (5th %ile)  : {:>10.2}                        ║",
        metrics.percentile_5
    );
    if let Some(p_loss) = metrics.probability_of_loss {
        println!("║  Probability of Loss    : {:>9.1}%                        ║", p_loss * 100.0);
    }
    println!("╚════════════════════════════════════════════════════════════╝");
}

pub fn print_frontier_summary(symbols: &[String], sample: &FrontierSample) {
    println!("\nRandom portfolios sampled: {}", sample.len());
    let picks = [("Max Sharpe", sample.max_sharpe()), ("Min Volatility", sample.min_volatility())];
    for (label, point) in picks {
        let Some(p) = point else { continue };
        let allocation = symbols
            .iter()
            .zip(&p.weights)
            .map(|(s, w)| format!("{}={:.1}%", s, w * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:<15} return {:>+6.2}%  vol {:>6.2}%  sharpe {:>5.2}  [{}]",
            label,
            p.annual_return * 100.0,
            p.annual_volatility * 100.0,
            p.sharpe_ratio,
            allocation
        );
    }
}
