use crate::error::{InvalidInputError, Result, SimError};
use anyhow::Context;
use chrono::{Duration, NaiveDate};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// One observation date with a price per asset, in symbol order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub prices: Vec<f64>,
}

/// Historical price table: rows = time (chronological), columns = assets.
///
/// Shape is checked on construction. Price positivity is left to
/// [`crate::returns::estimate_returns`], which reports the offending cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceSeries {
    symbols: Vec<String>,
    rows: Vec<PriceRow>,
}

#[derive(Deserialize)]
struct RawPriceSeries {
    symbols: Vec<String>,
    rows: Vec<PriceRow>,
}

impl PriceSeries {
    pub fn new(symbols: Vec<String>, rows: Vec<PriceRow>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(InvalidInputError::EmptyAssetSet.into());
        }
        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if !seen.insert(symbol.as_str()) {
                return Err(SimError::invalid_parameter(
                    "symbols",
                    format!("duplicate symbol '{}'", symbol),
                ));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.prices.len() != symbols.len() {
                return Err(SimError::dimension_mismatch("prices per row", symbols.len(), row.prices.len()));
            }
            if i > 0 && row.date <= rows[i - 1].date {
                return Err(InvalidInputError::UnorderedDates { row: i }.into());
            }
        }
        Ok(Self { symbols, rows })
    }

    /// Reads a `{"symbols": [...], "rows": [{"date", "prices"}]}` JSON table.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening price table {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let raw: RawPriceSeries = serde_json::from_reader(reader)
            .with_context(|| format!("parsing price table {}", path.display()))?;
        let series = Self::new(raw.symbols, raw.rows)?;
        info!(
            "Loaded {} rows for {} assets from {}",
            series.len(),
            series.asset_count(),
            path.display()
        );
        Ok(series)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn asset_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Last observed price per asset, the starting point of every path.
    pub fn last_prices(&self) -> Option<&[f64]> {
        self.rows.last().map(|r| r.prices.as_slice())
    }

    /// Synthetic uncorrelated random-walk table for demos and tests.
    pub fn new_mock(symbols: &[&str], days: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut prices: Vec<f64> = (0..symbols.len()).map(|i| 100.0 + i as f64 * 50.0).collect();
        let mut date = NaiveDate::from_ymd_opt(2015, 1, 2).unwrap_or_default();
        let mut rows = Vec::with_capacity(days);

        for _ in 0..days {
            rows.push(PriceRow {
                date,
                prices: prices.clone(),
            });
            for p in prices.iter_mut() {
                let volatility = 0.02; // 2% daily volatility
                let change_pct: f64 = rng.gen_range(-volatility..volatility);
                *p *= 1.0 + change_pct;
            }
            date += Duration::days(1);
        }

        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }
}
