//! Frozen market data read from a directory of CSV files.
//!
//! Layout:
//! - `instruments.csv`: `code,display_name,category,listing_date,special_treatment`
//! - `constituents.csv`: `index,code`
//! - `fundamentals.csv`: `date,code,market_cap,pb_ratio,pe_ratio,roe,growth,gross_margin,eps`
//!   (blank cells are missing values)
//! - `bars/<code>.csv`: `date,open,high,low,close,volume,high_limit,low_limit`
//!
//! A listed instrument without a bar on the snapshot date is reported as
//! suspended at its last close.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::error::RotatraderError;
use crate::domain::instrument::Instrument;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::scoring::FactorRecord;
use crate::ports::market_data_port::MarketDataPort;

#[derive(Debug, Clone, Deserialize)]
struct InstrumentRow {
    code: String,
    display_name: String,
    #[serde(default)]
    category: String,
    listing_date: NaiveDate,
    #[serde(default)]
    special_treatment: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ConstituentRow {
    index: String,
    code: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FundamentalsRow {
    date: NaiveDate,
    code: String,
    market_cap: Option<f64>,
    pb_ratio: Option<f64>,
    pe_ratio: Option<f64>,
    roe: Option<f64>,
    growth: Option<f64>,
    gross_margin: Option<f64>,
    eps: Option<f64>,
}

impl From<&FundamentalsRow> for FactorRecord {
    fn from(row: &FundamentalsRow) -> Self {
        FactorRecord {
            code: row.code.clone(),
            market_cap: row.market_cap,
            pb_ratio: row.pb_ratio,
            pe_ratio: row.pe_ratio,
            roe: row.roe,
            growth: row.growth,
            gross_margin: row.gross_margin,
            eps: row.eps,
        }
    }
}

pub struct CsvMarketData {
    base_path: PathBuf,
    instruments: BTreeMap<String, InstrumentRow>,
    constituents: BTreeMap<String, Vec<String>>,
    /// Per code, ascending by date.
    fundamentals: BTreeMap<String, Vec<FundamentalsRow>>,
    /// Per code, ascending by date.
    bars: BTreeMap<String, Vec<OhlcvBar>>,
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, RotatraderError> {
    let source = path.display().to_string();
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|e| RotatraderError::data_unavailable(&source, format!("failed to open: {e}")))?;
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| RotatraderError::data_unavailable(&source, format!("CSV parse error: {e}")))
}

impl CsvMarketData {
    /// Load every file under `base_path`.
    pub fn open<P: AsRef<Path>>(base_path: P) -> Result<Self, RotatraderError> {
        let base_path = base_path.as_ref().to_path_buf();

        let instruments: BTreeMap<String, InstrumentRow> =
            read_rows::<InstrumentRow>(&base_path.join("instruments.csv"))?
                .into_iter()
                .map(|r| (r.code.clone(), r))
                .collect();

        let mut constituents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in read_rows::<ConstituentRow>(&base_path.join("constituents.csv"))? {
            constituents.entry(row.index).or_default().push(row.code);
        }

        let mut fundamentals: BTreeMap<String, Vec<FundamentalsRow>> = BTreeMap::new();
        for row in read_rows::<FundamentalsRow>(&base_path.join("fundamentals.csv"))? {
            fundamentals.entry(row.code.clone()).or_default().push(row);
        }
        for rows in fundamentals.values_mut() {
            rows.sort_by_key(|r| r.date);
        }

        let bars = load_bars(&base_path.join("bars"))?;

        info!(
            path = %base_path.display(),
            instruments = instruments.len(),
            indices = constituents.len(),
            bar_files = bars.len(),
            "market data loaded"
        );

        Ok(CsvMarketData {
            base_path,
            instruments,
            constituents,
            fundamentals,
            bars,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Every listed instrument code.
    pub fn instrument_codes(&self) -> Vec<String> {
        self.instruments.keys().cloned().collect()
    }

    /// Dates with at least one bar in `[start, end]`, ascending.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let days: BTreeSet<NaiveDate> = self
            .bars
            .values()
            .flat_map(|bars| bars.iter().map(|b| b.date))
            .filter(|d| *d >= start && *d <= end)
            .collect();
        days.into_iter().collect()
    }

    fn last_bar_on_or_before(&self, code: &str, date: NaiveDate) -> Option<&OhlcvBar> {
        self.bars
            .get(code)
            .and_then(|bars| bars.iter().rev().find(|b| b.date <= date))
    }
}

fn load_bars(dir: &Path) -> Result<BTreeMap<String, Vec<OhlcvBar>>, RotatraderError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        RotatraderError::data_unavailable(
            dir.display().to_string(),
            format!("failed to read directory: {e}"),
        )
    })?;

    let mut bars = BTreeMap::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(code) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let mut rows = read_rows::<OhlcvBar>(&path)?;
        rows.sort_by_key(|b| b.date);
        debug!(code = %code, bars = rows.len(), "bars loaded");
        bars.insert(code, rows);
    }
    Ok(bars)
}

impl MarketDataPort for CsvMarketData {
    fn history(
        &self,
        code: &str,
        end: NaiveDate,
        count: usize,
    ) -> Result<Vec<OhlcvBar>, RotatraderError> {
        let bars = self
            .bars
            .get(code)
            .ok_or_else(|| RotatraderError::data_unavailable(code, "no bar file"))?;
        let upto = bars.partition_point(|b| b.date <= end);
        let from = upto.saturating_sub(count);
        Ok(bars[from..upto].to_vec())
    }

    fn snapshot(
        &self,
        codes: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<Instrument>, RotatraderError> {
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            let Some(row) = self.instruments.get(code) else {
                debug!(code = %code, "not listed, omitted from snapshot");
                continue;
            };
            let Some(bar) = self.last_bar_on_or_before(code, as_of) else {
                debug!(code = %code, %as_of, "no price yet, omitted from snapshot");
                continue;
            };
            out.push(Instrument {
                code: code.clone(),
                display_name: row.display_name.clone(),
                category: row.category.clone(),
                price: bar.close,
                high_limit: bar.high_limit,
                low_limit: bar.low_limit,
                listing_date: row.listing_date,
                special_treatment: row.special_treatment,
                suspended: bar.date != as_of,
            });
        }
        Ok(out)
    }

    fn fundamentals(
        &self,
        codes: &[String],
        date: NaiveDate,
    ) -> Result<Vec<FactorRecord>, RotatraderError> {
        Ok(codes
            .iter()
            .filter_map(|code| {
                self.fundamentals
                    .get(code)
                    .and_then(|rows| rows.iter().rev().find(|r| r.date <= date))
                    .map(FactorRecord::from)
            })
            .collect())
    }

    fn category(&self, code: &str) -> Option<String> {
        self.instruments
            .get(code)
            .map(|r| r.category.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    fn constituents(&self, index: &str) -> Result<Vec<String>, RotatraderError> {
        self.constituents
            .get(index)
            .cloned()
            .ok_or_else(|| RotatraderError::data_unavailable(index, "unknown index"))
    }
}
