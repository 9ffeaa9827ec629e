//! Market-data access port: prices, snapshots, fundamentals, classification.

use crate::domain::error::RotatraderError;
use crate::domain::instrument::Instrument;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::scoring::FactorRecord;
use chrono::NaiveDate;

pub trait MarketDataPort {
    /// Up to `count` most recent daily bars ending on or before `end`, oldest first.
    fn history(
        &self,
        code: &str,
        end: NaiveDate,
        count: usize,
    ) -> Result<Vec<OhlcvBar>, RotatraderError>;

    /// Current observation for each requested code. Unknown codes are omitted.
    fn snapshot(
        &self,
        codes: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<Instrument>, RotatraderError>;

    /// One fundamentals row per code with data on `date`.
    fn fundamentals(
        &self,
        codes: &[String],
        date: NaiveDate,
    ) -> Result<Vec<FactorRecord>, RotatraderError>;

    /// Industry classification, `None` when unavailable.
    fn category(&self, code: &str) -> Option<String>;

    /// Member codes of an index.
    fn constituents(&self, index: &str) -> Result<Vec<String>, RotatraderError>;
}
