//! Daily OHLCV bar with exchange price limits.

use chrono::NaiveDate;
use serde::Deserialize;

/// Tolerance for comparing a traded price against an exchange limit price.
/// Limits are quoted to the cent, so anything closer than this is "at" the limit.
pub const LIMIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: i64,
    pub high_limit: f64,
    pub low_limit: f64,
}

impl OhlcvBar {
    /// close / open - 1
    pub fn intraday_return(&self) -> Option<f64> {
        if self.open > 0.0 {
            Some(self.close / self.open - 1.0)
        } else {
            None
        }
    }

    /// Whether the bar closed on its daily ceiling.
    pub fn closed_at_high_limit(&self) -> bool {
        at_or_above(self.close, self.high_limit)
    }
}

/// `price >= limit` with [`LIMIT_TOLERANCE`].
pub fn at_or_above(price: f64, limit: f64) -> bool {
    price >= limit - LIMIT_TOLERANCE
}

/// `price <= limit` with [`LIMIT_TOLERANCE`].
pub fn at_or_below(price: f64, limit: f64) -> bool {
    price <= limit + LIMIT_TOLERANCE
}
