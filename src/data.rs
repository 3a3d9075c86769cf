//! Market data access.
//!
//! The simulator consumes already-materialized daily OHLCV bars; nothing in
//! the core fetches data over the network. `CsvDataSource` reads one CSV per
//! symbol from a local directory; `MemoryDataSource` backs tests and
//! synthetic-series experiments.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// No bars available for a `(symbol, start, end)` request.
///
/// Carries the location the caller was expected to provide data at and a
/// remediation hint; propagated to the caller, never silently defaulted.
#[derive(Debug, Clone)]
pub struct MissingData {
    pub symbol: String,
    pub expected_path: PathBuf,
    pub remediation: String,
}

impl fmt::Display for MissingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no OHLCV data for {} (expected at {}): {}",
            self.symbol,
            self.expected_path.display(),
            self.remediation
        )
    }
}

impl std::error::Error for MissingData {}

/// Source of historical bars for one symbol over an inclusive date range.
pub trait MarketDataSource {
    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<OhlcvBar>>;
}

/// Parse one `date,open,high,low,close,volume` line.
pub fn parse_bar_line(line: &str) -> Result<OhlcvBar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 6 {
        anyhow::bail!("expected 6 columns, got {}", parts.len());
    }
    Ok(OhlcvBar {
        date: NaiveDate::parse_from_str(parts[0].trim(), "%Y-%m-%d")?,
        open: parts[1].trim().parse()?,
        high: parts[2].trim().parse()?,
        low: parts[3].trim().parse()?,
        close: parts[4].trim().parse()?,
        volume: parts[5].trim().parse()?,
    })
}

/// Reads `{dir}/{symbol}.csv`, skipping headers and comment lines.
pub struct CsvDataSource {
    dir: PathBuf,
}

impl CsvDataSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn symbol_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }
}

impl MarketDataSource for CsvDataSource {
    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<OhlcvBar>> {
        let path = self.symbol_path(symbol);
        let content = std::fs::read_to_string(&path).map_err(|_| MissingData {
            symbol: symbol.to_string(),
            expected_path: path.clone(),
            remediation: "place a date,open,high,low,close,volume CSV at this path".to_string(),
        })?;
        let rows: Vec<OhlcvBar> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.to_lowercase().starts_with("date,"))
            .filter_map(|l| parse_bar_line(l).ok())
            .filter(|b| b.date >= start && b.date <= end)
            .collect();
        if rows.is_empty() {
            return Err(MissingData {
                symbol: symbol.to_string(),
                expected_path: path,
                remediation: format!("no rows in range {}..={}; extend the file's coverage", start, end),
            }
            .into());
        }
        Ok(rows)
    }
}

/// In-memory source keyed by symbol. Bars are kept date-ordered.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    series: BTreeMap<String, Vec<OhlcvBar>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, mut bars: Vec<OhlcvBar>) {
        bars.sort_by_key(|b| b.date);
        self.series.insert(symbol.to_string(), bars);
    }
}

impl MarketDataSource for MemoryDataSource {
    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<OhlcvBar>> {
        let rows: Vec<OhlcvBar> = self
            .series
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .copied()
                    .filter(|b| b.date >= start && b.date <= end)
                    .collect()
            })
            .unwrap_or_default();
        if rows.is_empty() {
            return Err(MissingData {
                symbol: symbol.to_string(),
                expected_path: PathBuf::from(format!("<memory:{}>", symbol)),
                remediation: "insert bars for this symbol/range before simulating".to_string(),
            }
            .into());
        }
        Ok(rows)
    }
}

/// Flat daily series at a constant price and volume, `days` bars from `start`.
pub fn flat_series(start: NaiveDate, days: usize, price: f64, volume: f64) -> Vec<OhlcvBar> {
    (0..days)
        .map(|i| {
            let date = start + chrono::Days::new(i as u64);
            OhlcvBar { date, open: price, high: price, low: price, close: price, volume }
        })
        .collect()
}

/// Geometric daily series: each close is `growth` times the previous one.
/// With `growth > 1.0` this is a monotonically rising, volatility-free ramp.
pub fn geometric_series(
    start: NaiveDate,
    days: usize,
    first_price: f64,
    growth: f64,
    volume: f64,
) -> Vec<OhlcvBar> {
    let mut price = first_price;
    (0..days)
        .map(|i| {
            let date = start + chrono::Days::new(i as u64);
            let bar = OhlcvBar { date, open: price, high: price, low: price, close: price, volume };
            price *= growth;
            bar
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_bar_line() {
        let bar = parse_bar_line("2021-03-01,100.0,105.0,99.0,104.0,1500").unwrap();
        assert_eq!(bar.date, d("2021-03-01"));
        assert!((bar.close - 104.0).abs() < 1e-9);
        assert!(parse_bar_line("2021-03-01,100.0").is_err());
    }

    #[test]
    fn test_memory_source_range_filter() {
        let mut src = MemoryDataSource::new();
        src.insert("BTC-USD", flat_series(d("2021-01-01"), 10, 100.0, 1000.0));
        let bars = src.bars("BTC-USD", d("2021-01-03"), d("2021-01-05")).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, d("2021-01-03"));
    }

    #[test]
    fn test_missing_symbol_is_typed_error() {
        let src = MemoryDataSource::new();
        let err = src.bars("NOPE", d("2021-01-01"), d("2021-01-02")).unwrap_err();
        let missing = err.downcast_ref::<MissingData>().expect("MissingData");
        assert_eq!(missing.symbol, "NOPE");
        assert!(!missing.remediation.is_empty());
    }

    #[test]
    fn test_csv_source_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = CsvDataSource::new(tmp.path());
        let err = src.bars("ETH-USD", d("2021-01-01"), d("2021-01-02")).unwrap_err();
        let missing = err.downcast_ref::<MissingData>().expect("MissingData");
        assert!(missing.expected_path.ends_with("ETH-USD.csv"));
    }

    #[test]
    fn test_csv_source_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("BTC-USD.csv");
        std::fs::write(
            &path,
            "date,open,high,low,close,volume\n2021-01-01,100,101,99,100.5,1200\n2021-01-02,100.5,102,100,101.0,1300\n",
        )
        .unwrap();
        let src = CsvDataSource::new(tmp.path());
        let bars = src.bars("BTC-USD", d("2021-01-01"), d("2021-01-02")).unwrap();
        assert_eq!(bars.len(), 2);
        assert!((bars[1].close - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_geometric_series_monotone() {
        let bars = geometric_series(d("2021-01-01"), 50, 100.0, 1.005, 1000.0);
        assert_eq!(bars.len(), 50);
        for w in bars.windows(2) {
            assert!(w[1].close > w[0].close);
        }
    }
}
