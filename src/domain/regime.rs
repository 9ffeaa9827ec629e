//! Regime ranking by trend strength.
//!
//! Each reference instrument is scored by fitting an ordinary-least-squares line
//! to log price against trading-day index over a trailing window:
//!
//! - annualized return = exp(slope)^250 - 1
//! - R^2 = 1 - SS_res / SS_tot
//! - score = annualized return * R^2
//!
//! A smooth trend beats a noisy one with the same drift.

use chrono::NaiveDate;
use tracing::info;

use crate::domain::error::RotatraderError;
use crate::ports::market_data_port::MarketDataPort;

pub const TRADING_DAYS_PER_YEAR: f64 = 250.0;
pub const MIN_OBSERVATIONS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeScore {
    pub code: String,
    pub annualized_return: f64,
    pub r_squared: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeRanking {
    /// Descending by score.
    pub scores: Vec<RegimeScore>,
}

impl RegimeRanking {
    pub fn ordered_codes(&self) -> Vec<String> {
        self.scores.iter().map(|s| s.code.clone()).collect()
    }

    pub fn leader(&self) -> Option<&str> {
        self.scores.first().map(|s| s.code.as_str())
    }

    /// Whether `risk_on` leads the ranking.
    pub fn favours(&self, risk_on: &str) -> bool {
        self.leader() == Some(risk_on)
    }
}

/// Slope, intercept and R^2 of `y` regressed on `0..n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares of `y` against its index.
///
/// A series with zero total variance fits perfectly with slope zero; its R^2 is
/// reported as 0 since it carries no trend.
pub fn fit_linear(code: &str, y: &[f64]) -> Result<LinearFit, RotatraderError> {
    let n = y.len();
    if n < MIN_OBSERVATIONS {
        return Err(RotatraderError::InsufficientHistory {
            code: code.to_string(),
            have: n,
            need: MIN_OBSERVATIONS,
        });
    }

    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, yi) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (yi - y_mean);
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, yi) in y.iter().enumerate() {
        let fitted = slope * i as f64 + intercept;
        ss_res += (yi - fitted).powi(2);
        ss_tot += (yi - y_mean).powi(2);
    }

    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Score one reference from its closing prices, oldest first.
pub fn score_trend(code: &str, closes: &[f64]) -> Result<RegimeScore, RotatraderError> {
    if let Some(bad) = closes.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
        return Err(RotatraderError::Degenerate {
            code: code.to_string(),
            reason: format!("non-positive price {bad} in trend window"),
        });
    }

    let logs: Vec<f64> = closes.iter().map(|c| c.ln()).collect();
    let fit = fit_linear(code, &logs)?;
    let annualized_return = fit.slope.exp().powf(TRADING_DAYS_PER_YEAR) - 1.0;

    Ok(RegimeScore {
        code: code.to_string(),
        annualized_return,
        r_squared: fit.r_squared,
        score: annualized_return * fit.r_squared,
    })
}

/// Rank pre-fetched close series, descending by score then ascending by code.
pub fn rank_series(series: &[(String, Vec<f64>)]) -> Result<RegimeRanking, RotatraderError> {
    let mut scores = series
        .iter()
        .map(|(code, closes)| score_trend(code, closes))
        .collect::<Result<Vec<_>, _>>()?;

    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.code.cmp(&b.code)));
    Ok(RegimeRanking { scores })
}

/// Fetch the last `window_days` closes of each reference strictly before
/// `as_of` and rank them. The `as_of` session is still open when the ranking
/// runs, so its bar never enters the window. Any history shortfall below two
/// bars propagates as an error.
pub fn rank(
    market: &dyn MarketDataPort,
    references: &[String],
    as_of: NaiveDate,
    window_days: usize,
) -> Result<RegimeRanking, RotatraderError> {
    let mut series = Vec::with_capacity(references.len());
    for code in references {
        let mut bars = market.history(code, as_of, window_days + 1)?;
        bars.retain(|b| b.date < as_of);
        let from = bars.len().saturating_sub(window_days);
        let closes: Vec<f64> = bars[from..].iter().map(|b| b.close).collect();
        series.push((code.clone(), closes));
    }

    let ranking = rank_series(&series)?;
    for s in &ranking.scores {
        info!(
            code = %s.code,
            annualized = s.annualized_return,
            r_squared = s.r_squared,
            score = s.score,
            "regime score"
        );
    }
    Ok(ranking)
}

/// Latest close strictly above the simple average of the last `window` closes.
pub fn above_moving_average(
    code: &str,
    closes: &[f64],
    window: usize,
) -> Result<bool, RotatraderError> {
    if window == 0 || closes.len() < window {
        return Err(RotatraderError::InsufficientHistory {
            code: code.to_string(),
            have: closes.len(),
            need: window.max(1),
        });
    }
    let tail = &closes[closes.len() - window..];
    let average = tail.iter().sum::<f64>() / window as f64;
    let latest = tail[window - 1];
    Ok(latest > average)
}

/// Trend filter over the benchmark's history from the port.
pub fn trend_filter(
    market: &dyn MarketDataPort,
    benchmark: &str,
    as_of: NaiveDate,
    window: usize,
) -> Result<bool, RotatraderError> {
    let bars = market.history(benchmark, as_of, window)?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    above_moving_average(benchmark, &closes, window)
}
