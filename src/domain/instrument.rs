//! Instrument observation snapshot.

use chrono::NaiveDate;

use super::ohlcv::{at_or_above, at_or_below};

/// Category used when the host cannot classify an instrument.
pub const DEFAULT_CATEGORY: &str = "other";

/// One instrument as observed at a point in time. Refreshed every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Exchange-qualified code, e.g. `002415.XSHE`.
    pub code: String,
    pub display_name: String,
    pub category: String,
    pub price: f64,
    pub high_limit: f64,
    pub low_limit: f64,
    pub listing_date: NaiveDate,
    pub special_treatment: bool,
    pub suspended: bool,
}

impl Instrument {
    pub fn at_up_limit(&self) -> bool {
        at_or_above(self.price, self.high_limit)
    }

    pub fn at_down_limit(&self) -> bool {
        at_or_below(self.price, self.low_limit)
    }

    /// Days between listing and `as_of`.
    pub fn listed_days(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.listing_date).num_days()
    }
}
