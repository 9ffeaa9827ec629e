//! Configuration validation.
//!
//! Range checks over the assembled [`StrategyConfig`], run before any engine pass.

use crate::domain::error::RotatraderError;
use crate::domain::strategy::StrategyConfig;
use crate::ports::config_port::ConfigPort;

/// Assemble the strategy from `config` and reject out-of-range values.
pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<StrategyConfig, RotatraderError> {
    let strategy = StrategyConfig::from_config(config)?;
    validate(&strategy)?;
    Ok(strategy)
}

pub fn validate(strategy: &StrategyConfig) -> Result<(), RotatraderError> {
    validate_rebalance(strategy)?;
    validate_filter(strategy)?;
    validate_weights(strategy)?;
    validate_prescreen(strategy)?;
    validate_regime(strategy)?;
    validate_stoploss(strategy)?;
    validate_calendar(strategy)?;
    validate_paper(strategy)?;
    Ok(())
}

fn require(ok: bool, section: &str, key: &str, reason: &str) -> Result<(), RotatraderError> {
    if ok {
        Ok(())
    } else {
        Err(RotatraderError::invalid(section, key, reason))
    }
}

fn validate_rebalance(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let r = &s.rebalance;
    require(r.stock_num >= 1, "strategy", "stock_num", "stock_num must be at least 1")?;
    require(
        r.max_category_share > 0.0 && r.max_category_share <= 1.0,
        "strategy",
        "max_category_share",
        "max_category_share must be in (0, 1]",
    )?;
    require(r.lot_size >= 1, "strategy", "lot_size", "lot_size must be at least 1")?;
    if r.universe_index.trim().is_empty() {
        return Err(RotatraderError::ConfigMissing {
            section: "strategy".to_string(),
            key: "universe_index".to_string(),
        });
    }
    Ok(())
}

fn validate_filter(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let f = &s.filter;
    require(
        f.min_listing_days >= 0,
        "filter",
        "min_listing_days",
        "min_listing_days must be non-negative",
    )?;
    require(f.max_price > 0.0, "filter", "max_price", "max_price must be positive")
}

fn validate_weights(s: &StrategyConfig) -> Result<(), RotatraderError> {
    require(
        s.weights.factors().next().is_some(),
        "factors",
        "weights",
        "at least one factor needs a non-zero weight",
    )?;
    for w in &s.weights.weights {
        require(
            w.magnitude.is_finite(),
            "factors",
            w.factor.key(),
            "weight must be finite",
        )?;
    }
    Ok(())
}

fn validate_prescreen(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let Some(p) = &s.prescreen else {
        return Ok(());
    };
    require(
        p.min_market_cap >= 0.0,
        "prescreen",
        "min_market_cap",
        "min_market_cap must be non-negative",
    )?;
    require(
        p.max_market_cap > p.min_market_cap,
        "prescreen",
        "max_market_cap",
        "max_market_cap must exceed min_market_cap",
    )?;
    require(p.pool_size >= 1, "prescreen", "pool_size", "pool_size must be at least 1")
}

fn validate_regime(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let r = &s.regime;
    if let Some(tf) = &r.trend_filter {
        require(
            tf.window >= 1,
            "regime",
            "trend_window",
            "trend_window must be at least 1",
        )?;
    }
    if !r.enabled {
        return Ok(());
    }
    require(
        r.window_days >= 2,
        "regime",
        "window_days",
        "window_days must be at least 2",
    )?;
    require(
        !r.references.is_empty(),
        "regime",
        "references",
        "references must not be empty",
    )?;
    require(
        r.references.contains(&r.risk_on),
        "regime",
        "risk_on",
        "risk_on must be one of the references",
    )
}

fn validate_stoploss(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let sl = &s.stoploss;
    require(
        sl.loss_limit > 0.0 && sl.loss_limit < 1.0,
        "stoploss",
        "loss_limit",
        "loss_limit must be in (0, 1)",
    )?;
    require(
        sl.market_drop_limit > 0.0 && sl.market_drop_limit < 1.0,
        "stoploss",
        "market_drop_limit",
        "market_drop_limit must be in (0, 1)",
    )?;
    if let Some(m) = sl.take_profit_multiple {
        require(
            m > 1.0,
            "stoploss",
            "take_profit_multiple",
            "take_profit_multiple must exceed 1",
        )?;
    }
    if let Some(d) = &sl.drawdown {
        require(
            d.limit > 0.0 && d.limit < 1.0,
            "stoploss",
            "drawdown_limit",
            "drawdown_limit must be in (0, 1)",
        )?;
        require(
            d.keep_fraction >= 0.0 && d.keep_fraction < 1.0,
            "stoploss",
            "drawdown_keep_fraction",
            "drawdown_keep_fraction must be in [0, 1)",
        )?;
    }
    Ok(())
}

fn validate_calendar(s: &StrategyConfig) -> Result<(), RotatraderError> {
    require(
        s.calendar
            .no_trading_months
            .iter()
            .all(|m| (1..=12).contains(m)),
        "calendar",
        "no_trading_months",
        "months must be between 1 and 12",
    )
}

fn validate_paper(s: &StrategyConfig) -> Result<(), RotatraderError> {
    let p = &s.paper;
    require(
        p.starting_cash > 0.0,
        "paper",
        "starting_cash",
        "starting_cash must be positive",
    )?;
    let c = &p.costs;
    for (key, value) in [
        ("buy_commission_pct", c.buy_commission_pct),
        ("sell_commission_pct", c.sell_commission_pct),
        ("stamp_tax_pct", c.stamp_tax_pct),
        ("min_commission", c.min_commission),
        ("slippage_pct", c.slippage_pct),
    ] {
        require(value >= 0.0, "paper", key, "must be non-negative")?;
    }
    Ok(())
}
