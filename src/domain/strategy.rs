//! Strategy configuration assembled from a [`ConfigPort`].
//!
//! Sections: `[strategy]`, `[filter]`, `[factors]`, `[prescreen]`,
//! `[regime]`, `[stoploss]`, `[calendar]`, `[paper]`. Absent keys take the
//! defaults below. Range checks live in `config_validation`.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::domain::error::RotatraderError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::rebalance::DEFAULT_LOT_SIZE;
use crate::domain::scoring::{Factor, FactorWeight, FactorWeights, PrescreenConfig};
use crate::domain::stoploss::{DrawdownConfig, StopLossConfig, StopLossMode, TriggerOrder};
use crate::domain::universe::{UniverseFilterConfig, parse_codes};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_STOCK_NUM: usize = 10;
pub const DEFAULT_MAX_CATEGORY_SHARE: f64 = 0.3;
pub const DEFAULT_REGIME_WINDOW: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceConfig {
    /// Target number of holdings.
    pub stock_num: usize,
    pub max_category_share: f64,
    pub lot_size: i64,
    /// Index whose constituents form the raw universe.
    pub universe_index: String,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        RebalanceConfig {
            stock_num: DEFAULT_STOCK_NUM,
            max_category_share: DEFAULT_MAX_CATEGORY_SHARE,
            lot_size: DEFAULT_LOT_SIZE,
            universe_index: "399101.XSHE".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendFilterConfig {
    pub benchmark: String,
    pub window: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeConfig {
    pub enabled: bool,
    pub references: Vec<String>,
    /// Stock picking runs only while this reference ranks first.
    pub risk_on: String,
    pub window_days: usize,
    pub trend_filter: Option<TrendFilterConfig>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            enabled: true,
            references: vec![
                "399101.XSHE".into(),
                "000300.XSHG".into(),
                "000015.XSHG".into(),
            ],
            risk_on: "399101.XSHE".into(),
            window_days: DEFAULT_REGIME_WINDOW,
            trend_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarConfig {
    /// Calendar months (1-12) flagged no-trading.
    pub no_trading_months: Vec<u32>,
    pub rebalance_weekday: Weekday,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig {
            no_trading_months: Vec::new(),
            rebalance_weekday: Weekday::Tue,
        }
    }
}

impl CalendarConfig {
    pub fn is_no_trading(&self, date: NaiveDate) -> bool {
        self.no_trading_months.contains(&date.month())
    }

    pub fn is_rebalance_day(&self, date: NaiveDate) -> bool {
        date.weekday() == self.rebalance_weekday
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperConfig {
    pub starting_cash: f64,
    pub costs: ExecutionConfig,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            starting_cash: 100_000.0,
            costs: ExecutionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrategyConfig {
    pub name: String,
    pub rebalance: RebalanceConfig,
    pub filter: UniverseFilterConfig,
    pub weights: FactorWeights,
    pub prescreen: Option<PrescreenConfig>,
    pub regime: RegimeConfig,
    pub stoploss: StopLossConfig,
    pub calendar: CalendarConfig,
    pub paper: PaperConfig,
}

impl StrategyConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, RotatraderError> {
        Ok(StrategyConfig {
            name: config
                .get_string("strategy", "name")
                .unwrap_or_else(|| "rotatrader".to_string()),
            rebalance: rebalance_from(config)?,
            filter: filter_from(config),
            weights: weights_from(config),
            prescreen: prescreen_from(config)?,
            regime: regime_from(config)?,
            stoploss: stoploss_from(config)?,
            calendar: calendar_from(config)?,
            paper: paper_from(config),
        })
    }
}

fn non_negative_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, RotatraderError> {
    let value = config.get_int(section, key, default as i64);
    usize::try_from(value)
        .map_err(|_| RotatraderError::invalid(section, key, format!("{value} is negative")))
}

fn code_list(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<Vec<String>>, RotatraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => parse_codes(&raw)
            .map(Some)
            .map_err(|e| RotatraderError::invalid(section, key, e.to_string())),
    }
}

fn rebalance_from(config: &dyn ConfigPort) -> Result<RebalanceConfig, RotatraderError> {
    let d = RebalanceConfig::default();
    Ok(RebalanceConfig {
        stock_num: non_negative_usize(config, "strategy", "stock_num", d.stock_num)?,
        max_category_share: config.get_double(
            "strategy",
            "max_category_share",
            d.max_category_share,
        ),
        lot_size: config.get_int("strategy", "lot_size", d.lot_size),
        universe_index: config
            .get_string("strategy", "universe_index")
            .unwrap_or(d.universe_index),
    })
}

fn filter_from(config: &dyn ConfigPort) -> UniverseFilterConfig {
    let d = UniverseFilterConfig::default();
    UniverseFilterConfig {
        drop_suspended: config.get_bool("filter", "drop_suspended", d.drop_suspended),
        drop_special_treatment: config.get_bool(
            "filter",
            "drop_special_treatment",
            d.drop_special_treatment,
        ),
        drop_excluded_boards: config.get_bool(
            "filter",
            "drop_excluded_boards",
            d.drop_excluded_boards,
        ),
        drop_new_listings: config.get_bool("filter", "drop_new_listings", d.drop_new_listings),
        drop_limit_locked: config.get_bool("filter", "drop_limit_locked", d.drop_limit_locked),
        drop_high_price: config.get_bool("filter", "drop_high_price", d.drop_high_price),
        excluded_prefixes: config
            .get_list("filter", "excluded_prefixes")
            .unwrap_or(d.excluded_prefixes),
        special_treatment_markers: config
            .get_list("filter", "special_treatment_markers")
            .unwrap_or(d.special_treatment_markers),
        min_listing_days: config.get_int("filter", "min_listing_days", d.min_listing_days),
        max_price: config.get_double("filter", "max_price", d.max_price),
    }
}

/// `[factors]` holds signed weights keyed by factor name. A section with no
/// factor keys keeps the default table; otherwise only listed factors count.
fn weights_from(config: &dyn ConfigPort) -> FactorWeights {
    let listed: Vec<FactorWeight> = Factor::ALL
        .iter()
        .filter_map(|f| {
            config
                .get_opt_double("factors", f.key())
                .map(|w| FactorWeight::from_signed(*f, w))
        })
        .collect();
    if listed.is_empty() {
        FactorWeights::default()
    } else {
        FactorWeights { weights: listed }
    }
}

fn prescreen_from(config: &dyn ConfigPort) -> Result<Option<PrescreenConfig>, RotatraderError> {
    if !config.get_bool("prescreen", "enabled", false) {
        return Ok(None);
    }
    Ok(Some(PrescreenConfig {
        min_market_cap: config.get_double("prescreen", "min_market_cap", 5.0),
        max_market_cap: config.get_double("prescreen", "max_market_cap", 30.0),
        pool_size: non_negative_usize(config, "prescreen", "pool_size", 100)?,
    }))
}

fn regime_from(config: &dyn ConfigPort) -> Result<RegimeConfig, RotatraderError> {
    let d = RegimeConfig::default();
    let trend_filter = match config.get_string("regime", "trend_benchmark") {
        Some(benchmark) if !benchmark.trim().is_empty() => Some(TrendFilterConfig {
            benchmark: benchmark.trim().to_string(),
            window: non_negative_usize(config, "regime", "trend_window", 20)?,
        }),
        _ => None,
    };
    Ok(RegimeConfig {
        enabled: config.get_bool("regime", "enabled", d.enabled),
        references: code_list(config, "regime", "references")?.unwrap_or(d.references),
        risk_on: config
            .get_string("regime", "risk_on")
            .map(|s| s.trim().to_uppercase())
            .unwrap_or(d.risk_on),
        window_days: non_negative_usize(config, "regime", "window_days", d.window_days)?,
        trend_filter,
    })
}

fn stoploss_from(config: &dyn ConfigPort) -> Result<StopLossConfig, RotatraderError> {
    let d = StopLossConfig::default();
    let mode = match config.get_string("stoploss", "mode").as_deref().map(str::trim) {
        None => d.mode,
        Some("per_position") => StopLossMode::PerPosition,
        Some("market") => StopLossMode::MarketWide,
        Some("combined") => StopLossMode::Combined,
        Some(other) => {
            return Err(RotatraderError::invalid(
                "stoploss",
                "mode",
                format!("unknown mode '{other}', expected per_position, market or combined"),
            ));
        }
    };
    let order = match config.get_string("stoploss", "order").as_deref().map(str::trim) {
        None => d.order,
        Some("market_first") => TriggerOrder::MarketFirst,
        Some("position_first") => TriggerOrder::PositionFirst,
        Some(other) => {
            return Err(RotatraderError::invalid(
                "stoploss",
                "order",
                format!("unknown order '{other}', expected market_first or position_first"),
            ));
        }
    };
    let take_profit_multiple = match config.get_string("stoploss", "take_profit_multiple") {
        None => d.take_profit_multiple,
        Some(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
            RotatraderError::invalid(
                "stoploss",
                "take_profit_multiple",
                format!("'{}' is neither a number nor 'off'", raw.trim()),
            )
        })?),
    };
    let drawdown = config
        .get_opt_double("stoploss", "drawdown_limit")
        .map(|limit| DrawdownConfig {
            limit,
            keep_fraction: config.get_double("stoploss", "drawdown_keep_fraction", 0.5),
        });
    Ok(StopLossConfig {
        enabled: config.get_bool("stoploss", "enabled", d.enabled),
        mode,
        order,
        loss_limit: config.get_double("stoploss", "loss_limit", d.loss_limit),
        take_profit_multiple,
        market_drop_limit: config.get_double(
            "stoploss",
            "market_drop_limit",
            d.market_drop_limit,
        ),
        breadth_index: config
            .get_string("stoploss", "breadth_index")
            .unwrap_or(d.breadth_index),
        drawdown,
    })
}

fn calendar_from(config: &dyn ConfigPort) -> Result<CalendarConfig, RotatraderError> {
    let d = CalendarConfig::default();
    let no_trading_months = match config.get_list("calendar", "no_trading_months") {
        None => d.no_trading_months,
        Some(tokens) => tokens
            .iter()
            .map(|t| {
                t.parse::<u32>().map_err(|_| {
                    RotatraderError::invalid(
                        "calendar",
                        "no_trading_months",
                        format!("'{t}' is not a month number"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    let rebalance_weekday = match config.get_string("calendar", "rebalance_weekday") {
        None => d.rebalance_weekday,
        Some(raw) => raw.trim().parse::<Weekday>().map_err(|_| {
            RotatraderError::invalid(
                "calendar",
                "rebalance_weekday",
                format!("'{raw}' is not a weekday"),
            )
        })?,
    };
    Ok(CalendarConfig {
        no_trading_months,
        rebalance_weekday,
    })
}

fn paper_from(config: &dyn ConfigPort) -> PaperConfig {
    let d = PaperConfig::default();
    let c = d.costs;
    PaperConfig {
        starting_cash: config.get_double("paper", "starting_cash", d.starting_cash),
        costs: ExecutionConfig {
            buy_commission_pct: config.get_double(
                "paper",
                "buy_commission_pct",
                c.buy_commission_pct,
            ),
            sell_commission_pct: config.get_double(
                "paper",
                "sell_commission_pct",
                c.sell_commission_pct,
            ),
            stamp_tax_pct: config.get_double("paper", "stamp_tax_pct", c.stamp_tax_pct),
            min_commission: config.get_double("paper", "min_commission", c.min_commission),
            slippage_pct: config.get_double("paper", "slippage_pct", c.slippage_pct),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn load(ini: &str) -> Result<StrategyConfig, RotatraderError> {
        let adapter = FileConfigAdapter::from_string(ini).unwrap();
        StrategyConfig::from_config(&adapter)
    }

    #[test]
    fn empty_config_takes_defaults() {
        let cfg = load("[strategy]\n").unwrap();
        assert_eq!(cfg.rebalance.stock_num, 10);
        assert_eq!(cfg.rebalance.lot_size, 100);
        assert_eq!(cfg.regime.window_days, 25);
        assert_eq!(cfg.regime.references.len(), 3);
        assert_eq!(cfg.weights, FactorWeights::default());
        assert!(cfg.prescreen.is_none());
        assert!(cfg.regime.trend_filter.is_none());
        assert_eq!(cfg.stoploss.mode, StopLossMode::Combined);
        assert_eq!(cfg.calendar.rebalance_weekday, Weekday::Tue);
    }

    #[test]
    fn reads_every_section() {
        let cfg = load(
            r#"
[strategy]
name = small caps
stock_num = 5
max_category_share = 0.4

[filter]
drop_high_price = false
excluded_prefixes = 68, 8

[factors]
market_cap = -1.0
roe = 0.5

[prescreen]
enabled = true
pool_size = 50

[regime]
references = 399101.XSHE, 000300.XSHG
trend_benchmark = 000300.XSHG
trend_window = 20

[stoploss]
mode = per_position
order = position_first
loss_limit = 0.08
take_profit_multiple = off
drawdown_limit = 0.15

[calendar]
no_trading_months = 1, 4
rebalance_weekday = Mon

[paper]
starting_cash = 50000
"#,
        )
        .unwrap();

        assert_eq!(cfg.name, "small caps");
        assert_eq!(cfg.rebalance.stock_num, 5);
        assert!(!cfg.filter.drop_high_price);
        assert_eq!(cfg.filter.excluded_prefixes, vec!["68", "8"]);
        assert_eq!(cfg.weights.weights.len(), 2);
        assert_eq!(cfg.prescreen.unwrap().pool_size, 50);
        assert_eq!(cfg.regime.references.len(), 2);
        assert_eq!(cfg.regime.trend_filter.unwrap().window, 20);
        assert_eq!(cfg.stoploss.mode, StopLossMode::PerPosition);
        assert_eq!(cfg.stoploss.order, TriggerOrder::PositionFirst);
        assert!(cfg.stoploss.take_profit_multiple.is_none());
        assert_eq!(cfg.stoploss.drawdown.unwrap().keep_fraction, 0.5);
        assert_eq!(cfg.calendar.no_trading_months, vec![1, 4]);
        assert_eq!(cfg.calendar.rebalance_weekday, Weekday::Mon);
        assert_eq!(cfg.paper.starting_cash, 50_000.0);
    }

    #[test]
    fn unknown_stoploss_mode_is_invalid() {
        let err = load("[stoploss]\nmode = sometimes\n").unwrap_err();
        assert!(matches!(err, RotatraderError::ConfigInvalid { ref key, .. } if key == "mode"));
    }

    #[test]
    fn bad_month_is_invalid() {
        assert!(load("[calendar]\nno_trading_months = jan\n").is_err());
    }

    #[test]
    fn duplicate_reference_is_invalid() {
        assert!(load("[regime]\nreferences = A.X, A.X\n").is_err());
    }

    #[test]
    fn calendar_helpers() {
        let cal = CalendarConfig {
            no_trading_months: vec![4],
            ..Default::default()
        };
        let tue = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        assert!(cal.is_no_trading(tue));
        assert!(cal.is_rebalance_day(tue));
        assert!(!cal.is_rebalance_day(tue.succ_opt().unwrap()));
    }
}
