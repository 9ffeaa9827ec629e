#![allow(dead_code)]

use chrono::NaiveDate;
use rotatrader::adapters::paper_broker::PaperBroker;
use rotatrader::domain::error::RotatraderError;
use rotatrader::domain::execution::ExecutionConfig;
pub use rotatrader::domain::instrument::Instrument;
pub use rotatrader::domain::ohlcv::OhlcvBar;
pub use rotatrader::domain::scoring::FactorRecord;
use rotatrader::domain::scoring::{Factor, FactorWeight, FactorWeights};
use rotatrader::domain::strategy::{PaperConfig, StrategyConfig};
use rotatrader::ports::broker_port::BrokerPort;
use rotatrader::ports::market_data_port::MarketDataPort;
use std::collections::HashMap;

pub const UNIVERSE: &str = "UNIVERSE.IDX";

/// In-memory market. Snapshots start from the instrument template and take
/// price and limits from the bar on the snapshot date when one exists.
pub struct MockMarketData {
    pub instruments: HashMap<String, Instrument>,
    pub bars: HashMap<String, Vec<OhlcvBar>>,
    pub fundamentals: Vec<FactorRecord>,
    pub constituents: HashMap<String, Vec<String>>,
    pub history_errors: HashMap<String, String>,
    pub fundamentals_error: Option<String>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            instruments: HashMap::new(),
            bars: HashMap::new(),
            fundamentals: Vec::new(),
            constituents: HashMap::new(),
            history_errors: HashMap::new(),
            fundamentals_error: None,
        }
    }

    pub fn with_instrument(mut self, inst: Instrument) -> Self {
        self.instruments.insert(inst.code.clone(), inst);
        self
    }

    pub fn with_bars(mut self, code: &str, mut bars: Vec<OhlcvBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        self.bars.insert(code.to_string(), bars);
        self
    }

    pub fn with_record(mut self, record: FactorRecord) -> Self {
        self.fundamentals.push(record);
        self
    }

    pub fn with_index(mut self, index: &str, codes: &[&str]) -> Self {
        self.constituents.insert(
            index.to_string(),
            codes.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_history_error(mut self, code: &str, reason: &str) -> Self {
        self.history_errors
            .insert(code.to_string(), reason.to_string());
        self
    }

    pub fn with_fundamentals_error(mut self, reason: &str) -> Self {
        self.fundamentals_error = Some(reason.to_string());
        self
    }

    /// Listed stock priced at 10 with a record whose market cap is `cap`.
    pub fn with_stock(self, code: &str, cap: f64, category: &str) -> Self {
        self.with_instrument(instrument(code, 10.0, category))
            .with_record(record(code, cap))
    }

    pub fn all_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.instruments.keys().cloned().collect();
        codes.sort();
        codes
    }
}

impl MarketDataPort for MockMarketData {
    fn history(
        &self,
        code: &str,
        end: NaiveDate,
        count: usize,
    ) -> Result<Vec<OhlcvBar>, RotatraderError> {
        if let Some(reason) = self.history_errors.get(code) {
            return Err(RotatraderError::data_unavailable(code, reason.clone()));
        }
        let bars: Vec<OhlcvBar> = self
            .bars
            .get(code)
            .map(|b| b.iter().filter(|b| b.date <= end).cloned().collect())
            .unwrap_or_default();
        let from = bars.len().saturating_sub(count);
        Ok(bars[from..].to_vec())
    }

    fn snapshot(
        &self,
        codes: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<Instrument>, RotatraderError> {
        Ok(codes
            .iter()
            .filter_map(|code| {
                let mut inst = self.instruments.get(code)?.clone();
                if let Some(bar) = self
                    .bars
                    .get(code)
                    .and_then(|bars| bars.iter().find(|b| b.date == as_of))
                {
                    inst.price = bar.close;
                    inst.high_limit = bar.high_limit;
                    inst.low_limit = bar.low_limit;
                }
                Some(inst)
            })
            .collect())
    }

    fn fundamentals(
        &self,
        codes: &[String],
        _date: NaiveDate,
    ) -> Result<Vec<FactorRecord>, RotatraderError> {
        if let Some(reason) = &self.fundamentals_error {
            return Err(RotatraderError::data_unavailable("fundamentals", reason.clone()));
        }
        Ok(self
            .fundamentals
            .iter()
            .filter(|r| codes.contains(&r.code))
            .cloned()
            .collect())
    }

    fn category(&self, code: &str) -> Option<String> {
        self.instruments
            .get(code)
            .map(|i| i.category.clone())
            .filter(|c| !c.is_empty())
    }

    fn constituents(&self, index: &str) -> Result<Vec<String>, RotatraderError> {
        self.constituents
            .get(index)
            .cloned()
            .ok_or_else(|| RotatraderError::data_unavailable(index, "unknown index"))
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Listed long ago, limits at +/-10%.
pub fn instrument(code: &str, price: f64, category: &str) -> Instrument {
    Instrument {
        code: code.to_string(),
        display_name: format!("Stock {code}"),
        category: category.to_string(),
        price,
        high_limit: price * 1.1,
        low_limit: price * 0.9,
        listing_date: date("2015-01-05"),
        special_treatment: false,
        suspended: false,
    }
}

pub fn bar(d: &str, open: f64, close: f64) -> OhlcvBar {
    OhlcvBar {
        date: date(d),
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 100_000,
        high_limit: open * 1.1,
        low_limit: open * 0.9,
    }
}

/// Closed on its ceiling.
pub fn limit_up_bar(d: &str, close: f64) -> OhlcvBar {
    OhlcvBar {
        high_limit: close,
        ..bar(d, close / 1.1, close)
    }
}

/// `n` consecutive daily bars ending on `end`, compounding at `daily` per day.
pub fn trend_bars(end: &str, n: usize, start_price: f64, daily: f64) -> Vec<OhlcvBar> {
    let end = date(end);
    (0..n)
        .map(|i| {
            let d = end - chrono::Duration::days((n - 1 - i) as i64);
            let close = start_price * (1.0 + daily).powi(i as i32);
            OhlcvBar {
                date: d,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
                high_limit: close * 1.1,
                low_limit: close * 0.9,
            }
        })
        .collect()
}

/// Every factor present; only market cap varies between records.
pub fn record(code: &str, market_cap: f64) -> FactorRecord {
    FactorRecord {
        code: code.to_string(),
        market_cap: Some(market_cap),
        pb_ratio: Some(1.0),
        pe_ratio: Some(10.0),
        roe: Some(0.1),
        growth: Some(0.05),
        gross_margin: Some(0.3),
        eps: Some(0.5),
    }
}

/// Smallest market cap first, regime gate and stop-loss off, free trading.
pub fn small_cap_config(stock_num: usize) -> StrategyConfig {
    let mut cfg = StrategyConfig::default();
    cfg.rebalance.stock_num = stock_num;
    cfg.rebalance.max_category_share = 1.0;
    cfg.rebalance.universe_index = UNIVERSE.to_string();
    cfg.weights = FactorWeights {
        weights: vec![FactorWeight::from_signed(Factor::MarketCap, -1.0)],
    };
    cfg.regime.enabled = false;
    cfg.stoploss.enabled = false;
    cfg.paper = free_paper(100_000.0);
    cfg
}

pub fn free_paper(starting_cash: f64) -> PaperConfig {
    PaperConfig {
        starting_cash,
        costs: ExecutionConfig {
            buy_commission_pct: 0.0,
            sell_commission_pct: 0.0,
            stamp_tax_pct: 0.0,
            min_commission: 0.0,
            slippage_pct: 0.0,
        },
    }
}

pub fn broker_for(cfg: &StrategyConfig) -> PaperBroker {
    PaperBroker::new(&cfg.paper, cfg.rebalance.lot_size)
}

/// Buy `shares` of `code` at `price` and settle so the position is closeable.
pub fn seed_position(broker: &mut PaperBroker, code: &str, shares: i64, price: f64) {
    broker.set_quote(code, price, false);
    let fill = broker.order_target_shares(code, shares).unwrap();
    assert_eq!(fill.filled, shares, "seed buy for {code} not filled");
    broker.settle();
}

/// Refresh broker quotes for every listed instrument on `day`.
pub fn quote_day(broker: &mut PaperBroker, market: &MockMarketData, day: NaiveDate) {
    let snapshot = market.snapshot(&market.all_codes(), day).unwrap();
    broker.update_quotes(&snapshot);
}

pub fn held(broker: &dyn BrokerPort) -> Vec<String> {
    let mut codes: Vec<String> = broker.positions().into_iter().map(|p| p.code).collect();
    codes.sort();
    codes
}
