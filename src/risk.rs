use crate::error::{NumericalError, Result, SimError};
use crate::simulation::PortfolioPath;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Summary of a terminal-value distribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub confidence: f64,
    pub sample_count: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation (divides by N).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub value_at_risk: f64,
    pub expected_shortfall: f64,
    /// Values at or below VaR; zero means ES fell back to VaR.
    pub shortfall_tail_size: usize,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    /// Starting portfolio value, when computed from a full path.
    pub initial_value: Option<f64>,
    /// Fraction of terminal values below the starting value.
    pub probability_of_loss: Option<f64>,
}

/// Expected Shortfall and the tail it averaged over.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Shortfall {
    pub value: f64,
    pub tail_size: usize,
}

/// `p`-th percentile (0..=100) with linear interpolation. NaN for empty input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, p)
}

fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Lower-tail VaR: the `100·(1 - confidence)`-th percentile of values.
pub fn value_at_risk(values: &[f64], confidence: f64) -> Result<f64> {
    validate(values, confidence)?;
    Ok(percentile(values, tail_percentile(confidence)))
}

// 100 - 100c lands exactly on 5.0 for c = 0.95; 100(1 - c) does not
fn tail_percentile(confidence: f64) -> f64 {
    100.0 - 100.0 * confidence
}

/// Mean of all values at or below VaR.
///
/// An empty tail is reported as ES = VaR with `tail_size = 0`. With finite,
/// non-empty input the minimum always lies at or below VaR, so this only
/// triggers on degenerate data.
pub fn expected_shortfall(values: &[f64], confidence: f64) -> Result<Shortfall> {
    let var = value_at_risk(values, confidence)?;
    Ok(shortfall_below(values, var))
}

fn shortfall_below(values: &[f64], var: f64) -> Shortfall {
    let (sum, count) = values
        .iter()
        .filter(|v| **v <= var)
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        Shortfall { value: var, tail_size: 0 }
    } else {
        Shortfall {
            value: sum / count as f64,
            tail_size: count,
        }
    }
}

/// Risk metrics from a simulated portfolio path's terminal row, plus
/// probability of loss against the path's starting value.
pub fn analyze(path: &PortfolioPath, confidence: f64) -> Result<RiskMetrics> {
    let mut metrics = analyze_terminal(path.terminal(), confidence)?;
    let initial = path.initial();
    let initial_value = initial.iter().sum::<f64>() / initial.len() as f64;
    let losses = path.terminal().iter().filter(|v| **v < initial_value).count();
    metrics.initial_value = Some(initial_value);
    metrics.probability_of_loss = Some(losses as f64 / metrics.sample_count as f64);
    Ok(metrics)
}

/// Risk metrics from a bare terminal-value vector.
pub fn analyze_terminal(values: &[f64], confidence: f64) -> Result<RiskMetrics> {
    validate(values, confidence)?;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;

    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let var = percentile_of_sorted(&sorted, tail_percentile(confidence));
    let shortfall = shortfall_below(&sorted, var);

    Ok(RiskMetrics {
        confidence,
        sample_count: sorted.len(),
        mean,
        median: percentile_of_sorted(&sorted, 50.0),
        std_dev: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        value_at_risk: var,
        expected_shortfall: shortfall.value,
        shortfall_tail_size: shortfall.tail_size,
        percentile_5: percentile_of_sorted(&sorted, 5.0),
        percentile_25: percentile_of_sorted(&sorted, 25.0),
        percentile_75: percentile_of_sorted(&sorted, 75.0),
        percentile_95: percentile_of_sorted(&sorted, 95.0),
        initial_value: None,
        probability_of_loss: None,
    })
}

fn validate(values: &[f64], confidence: f64) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(SimError::invalid_parameter(
            "confidence",
            format!("must lie strictly between 0 and 1, got {}", confidence),
        ));
    }
    if values.is_empty() {
        return Err(SimError::insufficient_data(1, 0));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::NonFiniteResult { what: "terminal values" }.into());
    }
    Ok(())
}
