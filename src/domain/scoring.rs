//! Factor scoring: z-score normalised fundamentals combined into a composite.
//!
//! Normalisation uses the population mean and standard deviation of the
//! current candidate set only. A factor with zero variance across the set is
//! left out of the composite for that cycle. Instruments missing any tracked
//! factor are excluded rather than imputed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::error::RotatraderError;
use crate::domain::instrument::DEFAULT_CATEGORY;
use crate::ports::market_data_port::MarketDataPort;

/// Standard deviations at or below this are treated as zero variance.
const ZERO_VARIANCE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Factor {
    MarketCap,
    PbRatio,
    PeRatio,
    Roe,
    Growth,
    GrossMargin,
    Eps,
}

impl Factor {
    pub const ALL: [Factor; 7] = [
        Factor::MarketCap,
        Factor::PbRatio,
        Factor::PeRatio,
        Factor::Roe,
        Factor::Growth,
        Factor::GrossMargin,
        Factor::Eps,
    ];

    /// Configuration key for this factor.
    pub fn key(self) -> &'static str {
        match self {
            Factor::MarketCap => "market_cap",
            Factor::PbRatio => "pb_ratio",
            Factor::PeRatio => "pe_ratio",
            Factor::Roe => "roe",
            Factor::Growth => "growth",
            Factor::GrossMargin => "gross_margin",
            Factor::Eps => "eps",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Raw fundamentals for one instrument on one date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FactorRecord {
    pub code: String,
    pub market_cap: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub growth: Option<f64>,
    pub gross_margin: Option<f64>,
    pub eps: Option<f64>,
}

impl FactorRecord {
    pub fn get(&self, factor: Factor) -> Option<f64> {
        let value = match factor {
            Factor::MarketCap => self.market_cap,
            Factor::PbRatio => self.pb_ratio,
            Factor::PeRatio => self.pe_ratio,
            Factor::Roe => self.roe,
            Factor::Growth => self.growth,
            Factor::GrossMargin => self.gross_margin,
            Factor::Eps => self.eps,
        };
        value.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// Larger raw values raise the score.
    Higher,
    /// Smaller raw values raise the score.
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorWeight {
    pub factor: Factor,
    pub preference: Preference,
    pub magnitude: f64,
}

impl FactorWeight {
    /// Build from a signed weight: negative prefers lower values.
    pub fn from_signed(factor: Factor, weight: f64) -> Self {
        FactorWeight {
            factor,
            preference: if weight < 0.0 {
                Preference::Lower
            } else {
                Preference::Higher
            },
            magnitude: weight.abs(),
        }
    }

    pub fn signed(&self) -> f64 {
        match self.preference {
            Preference::Higher => self.magnitude,
            Preference::Lower => -self.magnitude,
        }
    }
}

/// Weight table. Only factors listed here are tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorWeights {
    pub weights: Vec<FactorWeight>,
}

impl Default for FactorWeights {
    /// Small and cheap, profitable and growing.
    fn default() -> Self {
        FactorWeights {
            weights: vec![
                FactorWeight::from_signed(Factor::MarketCap, -0.25),
                FactorWeight::from_signed(Factor::PbRatio, -0.15),
                FactorWeight::from_signed(Factor::PeRatio, -0.10),
                FactorWeight::from_signed(Factor::Roe, 0.20),
                FactorWeight::from_signed(Factor::Growth, 0.10),
                FactorWeight::from_signed(Factor::GrossMargin, 0.10),
                FactorWeight::from_signed(Factor::Eps, 0.10),
            ],
        }
    }
}

impl FactorWeights {
    pub fn factors(&self) -> impl Iterator<Item = Factor> + '_ {
        self.weights
            .iter()
            .filter(|w| w.magnitude > 0.0)
            .map(|w| w.factor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredInstrument {
    pub record: FactorRecord,
    /// z-scores of the factors that contributed this cycle.
    pub normalized: BTreeMap<Factor, f64>,
    pub score: f64,
    pub category: String,
}

impl ScoredInstrument {
    pub fn code(&self) -> &str {
        &self.record.code
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoringOutcome {
    pub scored: Vec<ScoredInstrument>,
    /// Codes excluded for a missing factor value.
    pub incomplete: Vec<String>,
    /// Tracked factors omitted this cycle for zero variance.
    pub omitted_factors: Vec<Factor>,
}

/// Population mean and standard deviation.
pub fn population_stats(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, variance.sqrt()))
}

/// Score fundamentals records. `categories` maps code to category; missing
/// entries fall back to [`DEFAULT_CATEGORY`]. Output keeps input order.
pub fn score_records(
    records: &[FactorRecord],
    categories: &HashMap<String, String>,
    weights: &FactorWeights,
) -> ScoringOutcome {
    let tracked: Vec<Factor> = weights.factors().collect();
    let mut outcome = ScoringOutcome::default();

    let complete: Vec<&FactorRecord> = records
        .iter()
        .filter(|r| {
            let ok = tracked.iter().all(|f| r.get(*f).is_some());
            if !ok {
                debug!(code = %r.code, "missing factor value, excluded");
                outcome.incomplete.push(r.code.clone());
            }
            ok
        })
        .collect();

    if complete.is_empty() {
        return outcome;
    }

    let mut stats: Vec<(FactorWeight, f64, f64)> = Vec::new();
    for w in weights.weights.iter().filter(|w| w.magnitude > 0.0) {
        let values: Vec<f64> = complete.iter().filter_map(|r| r.get(w.factor)).collect();
        match population_stats(&values) {
            Some((mean, std)) if std > ZERO_VARIANCE_EPSILON => stats.push((*w, mean, std)),
            _ => {
                debug!(factor = %w.factor, "zero variance, omitted from composite");
                outcome.omitted_factors.push(w.factor);
            }
        }
    }

    for record in complete {
        let mut normalized = BTreeMap::new();
        let mut score = 0.0;
        for (w, mean, std) in &stats {
            if let Some(raw) = record.get(w.factor) {
                let z = (raw - mean) / std;
                normalized.insert(w.factor, z);
                score += w.signed() * z;
            }
        }
        let category = categories
            .get(&record.code)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        outcome.scored.push(ScoredInstrument {
            record: record.clone(),
            normalized,
            score,
            category,
        });
    }

    outcome
}

/// Fetch fundamentals and categories through the port and score them.
///
/// An empty fundamentals response yields an empty outcome. A port failure is
/// returned as-is; the caller treats it as "no candidates".
pub fn score(
    market: &dyn MarketDataPort,
    codes: &[String],
    as_of: NaiveDate,
    weights: &FactorWeights,
    prescreen: Option<&PrescreenConfig>,
) -> Result<ScoringOutcome, RotatraderError> {
    if codes.is_empty() {
        return Ok(ScoringOutcome::default());
    }

    let mut records = market.fundamentals(codes, as_of)?;
    if records.is_empty() {
        warn!(%as_of, "no fundamentals returned");
        return Ok(ScoringOutcome::default());
    }

    if let Some(cfg) = prescreen {
        records = prescreen_by_market_cap(records, cfg);
    }

    let categories: HashMap<String, String> = records
        .iter()
        .map(|r| {
            let cat = market
                .category(&r.code)
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            (r.code.clone(), cat)
        })
        .collect();

    let outcome = score_records(&records, &categories, weights);
    info!(
        candidates = records.len(),
        scored = outcome.scored.len(),
        incomplete = outcome.incomplete.len(),
        omitted_factors = ?outcome.omitted_factors,
        "factor scoring complete"
    );
    Ok(outcome)
}

/// Market-cap band screen applied before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescreenConfig {
    pub min_market_cap: f64,
    pub max_market_cap: f64,
    /// Keep at most this many, smallest first.
    pub pool_size: usize,
}

/// Keep records whose market cap lies in `[min, max]`, smallest first, truncated
/// to `pool_size`. Records without a market cap are dropped.
pub fn prescreen_by_market_cap(
    records: Vec<FactorRecord>,
    config: &PrescreenConfig,
) -> Vec<FactorRecord> {
    let mut banded: Vec<FactorRecord> = records
        .into_iter()
        .filter(|r| {
            r.get(Factor::MarketCap)
                .is_some_and(|cap| cap >= config.min_market_cap && cap <= config.max_market_cap)
        })
        .collect();
    banded.sort_by(|a, b| {
        let ca = a.market_cap.unwrap_or(f64::INFINITY);
        let cb = b.market_cap.unwrap_or(f64::INFINITY);
        ca.total_cmp(&cb).then_with(|| a.code.cmp(&b.code))
    });
    banded.truncate(config.pool_size);
    banded
}
