//! Stop-loss monitor and out-of-cycle liquidation checks.
//!
//! Triggers, evaluated independently of the weekly cycle:
//! - take profit: price >= avg_cost * take_profit_multiple (checked before the loss trigger)
//! - position loss: price < avg_cost * (1 - loss_limit)
//! - market drop: mean return of the breadth basket over the previous session
//!   <= -market_drop_limit, liquidates everything
//!
//! Combined mode runs the market trigger first by default; `PositionFirst`
//! checks positions first and applies the market trigger to what remains.
//!
//! Outside the stop-loss triggers: a position locked at its ceiling yesterday
//! is sold once today's price drops below the ceiling, and an optional
//! drawdown check reduces every position when the account falls too far
//! below its starting capital.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::domain::instrument::Instrument;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::position::{Position, round_down_to_lot};
use crate::domain::rebalance::ExecutionReport;
use crate::domain::session::{SellReason, SessionState};
use crate::ports::broker_port::BrokerPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopLossMode {
    PerPosition,
    MarketWide,
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrder {
    MarketFirst,
    PositionFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawdownConfig {
    /// Reduce once total value < starting cash * (1 - limit).
    pub limit: f64,
    /// Fraction of each position kept after a reduction.
    pub keep_fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopLossConfig {
    pub enabled: bool,
    pub mode: StopLossMode,
    pub order: TriggerOrder,
    pub loss_limit: f64,
    pub take_profit_multiple: Option<f64>,
    pub market_drop_limit: f64,
    /// Index whose constituents form the breadth basket.
    pub breadth_index: String,
    pub drawdown: Option<DrawdownConfig>,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        StopLossConfig {
            enabled: true,
            mode: StopLossMode::Combined,
            order: TriggerOrder::MarketFirst,
            loss_limit: 0.10,
            take_profit_multiple: Some(2.0),
            market_drop_limit: 0.05,
            breadth_index: "399101.XSHE".into(),
            drawdown: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    TakeProfit,
    PositionLoss,
    MarketDrop,
    LimitUpOpened,
}

impl Trigger {
    /// Session sell reason recorded when this trigger fires.
    pub fn sell_reason(self) -> Option<SellReason> {
        match self {
            Trigger::TakeProfit => None,
            Trigger::PositionLoss | Trigger::MarketDrop => Some(SellReason::StopLoss),
            Trigger::LimitUpOpened => Some(SellReason::LimitUp),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Liquidation {
    pub code: String,
    pub trigger: Trigger,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StopLossDecision {
    pub basket_return: Option<f64>,
    pub market_triggered: bool,
    pub liquidations: Vec<Liquidation>,
}

/// Per-position triggers: take profit first, then the loss limit.
pub fn check_position(position: &Position, config: &StopLossConfig) -> Option<Trigger> {
    if position.avg_cost <= 0.0 {
        return None;
    }
    if let Some(multiple) = config.take_profit_multiple {
        if position.price >= position.avg_cost * multiple {
            return Some(Trigger::TakeProfit);
        }
    }
    if position.price < position.avg_cost * (1.0 - config.loss_limit) {
        return Some(Trigger::PositionLoss);
    }
    None
}

/// Mean `close / open - 1` over the basket's bars. `None` for an empty basket.
pub fn basket_return(bars: &[OhlcvBar]) -> Option<f64> {
    let returns: Vec<f64> = bars.iter().filter_map(|b| b.intraday_return()).collect();
    if returns.is_empty() {
        return None;
    }
    Some(returns.iter().sum::<f64>() / returns.len() as f64)
}

pub fn market_drop_triggered(basket_return: f64, market_drop_limit: f64) -> bool {
    basket_return <= -market_drop_limit
}

/// Decide which positions to liquidate. `basket_return` is `None` when the
/// breadth data is unavailable, in which case the market trigger cannot fire.
pub fn evaluate(
    positions: &[Position],
    basket_return: Option<f64>,
    config: &StopLossConfig,
) -> StopLossDecision {
    let mut decision = StopLossDecision {
        basket_return,
        ..Default::default()
    };
    if !config.enabled {
        return decision;
    }

    let uses_market = matches!(config.mode, StopLossMode::MarketWide | StopLossMode::Combined);
    let uses_position = matches!(config.mode, StopLossMode::PerPosition | StopLossMode::Combined);

    let market_fired = uses_market
        && match basket_return {
            Some(r) => market_drop_triggered(r, config.market_drop_limit),
            None => {
                warn!("breadth basket unavailable, market trigger skipped");
                false
            }
        };
    decision.market_triggered = market_fired;

    let position_first =
        config.mode == StopLossMode::Combined && config.order == TriggerOrder::PositionFirst;

    if market_fired && !position_first {
        decision.liquidations = positions
            .iter()
            .map(|p| liquidation(p, Trigger::MarketDrop))
            .collect();
        return decision;
    }

    if uses_position {
        for p in positions {
            if let Some(trigger) = check_position(p, config) {
                decision.liquidations.push(liquidation(p, trigger));
            }
        }
    }

    if market_fired {
        let remaining: Vec<Liquidation> = positions
            .iter()
            .filter(|p| !decision.liquidations.iter().any(|l| l.code == p.code))
            .map(|p| liquidation(p, Trigger::MarketDrop))
            .collect();
        decision.liquidations.extend(remaining);
    }

    decision
}

fn liquidation(position: &Position, trigger: Trigger) -> Liquidation {
    Liquidation {
        code: position.code.clone(),
        trigger,
        price: position.price,
    }
}

/// Locked-up holdings whose latest price fell below today's ceiling.
pub fn check_limit_up(locked: &BTreeSet<String>, snapshot: &[Instrument]) -> Vec<Liquidation> {
    let mut out = Vec::new();
    for code in locked {
        match snapshot.iter().find(|i| &i.code == code) {
            Some(inst) if !inst.at_up_limit() => {
                info!(code = %code, price = inst.price, ceiling = inst.high_limit, "limit-up opened");
                out.push(Liquidation {
                    code: code.clone(),
                    trigger: Trigger::LimitUpOpened,
                    price: inst.price,
                });
            }
            Some(_) => info!(code = %code, "still locked at ceiling, holding"),
            None => warn!(code = %code, "no snapshot for locked-up holding, holding"),
        }
    }
    out
}

/// Whether the account is below its drawdown floor.
pub fn drawdown_breached(total_value: f64, starting_cash: f64, config: &DrawdownConfig) -> bool {
    total_value < starting_cash * (1.0 - config.limit)
}

/// Target share counts after a drawdown reduction, rounded down to lots.
pub fn reduction_targets(
    positions: &[Position],
    config: &DrawdownConfig,
    lot_size: i64,
) -> Vec<(String, i64)> {
    positions
        .iter()
        .map(|p| {
            let keep = (p.quantity as f64 * config.keep_fraction).floor() as i64;
            (p.code.clone(), round_down_to_lot(keep, lot_size))
        })
        .collect()
}

/// Send liquidation orders and record the sell reason in the session. The
/// reason is recorded when the trigger fires, whether or not the order fills.
pub fn execute_liquidations(
    broker: &mut dyn BrokerPort,
    liquidations: &[Liquidation],
    session: &mut SessionState,
    report: &mut ExecutionReport,
) {
    for liq in liquidations {
        if let Some(reason) = liq.trigger.sell_reason() {
            session.record_sell(reason);
        }
        match broker.order_target_shares(&liq.code, 0) {
            Ok(fill) if fill.is_complete() => {
                info!(code = %liq.code, trigger = ?liq.trigger, "liquidated");
                report.sold.push(liq.code.clone());
            }
            Ok(fill) => {
                warn!(
                    code = %liq.code,
                    trigger = ?liq.trigger,
                    filled = fill.filled,
                    requested = fill.requested,
                    "liquidation incomplete, retried next pass"
                );
                report.unsold.push(liq.code.clone());
            }
            Err(e) => {
                warn!(code = %liq.code, error = %e, "liquidation rejected, retried next pass");
                report.unsold.push(liq.code.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn position(code: &str, avg_cost: f64, price: f64) -> Position {
        Position {
            code: code.to_string(),
            quantity: 1000,
            closeable_quantity: 1000,
            avg_cost,
            price,
        }
    }

    fn combined() -> StopLossConfig {
        StopLossConfig {
            market_drop_limit: 0.03,
            ..Default::default()
        }
    }

    fn codes(decision: &StopLossDecision) -> Vec<&str> {
        decision.liquidations.iter().map(|l| l.code.as_str()).collect()
    }

    #[test]
    fn loss_threshold_boundary() {
        let config = StopLossConfig::default();
        // 11.50 * 0.90 = 10.35
        assert_eq!(
            check_position(&position("A", 11.50, 10.00), &config),
            Some(Trigger::PositionLoss)
        );
        assert_eq!(check_position(&position("A", 11.50, 10.40), &config), None);
    }

    #[test]
    fn take_profit_checked_first() {
        let config = StopLossConfig::default();
        assert_eq!(
            check_position(&position("A", 5.0, 10.0), &config),
            Some(Trigger::TakeProfit)
        );
        let no_tp = StopLossConfig {
            take_profit_multiple: None,
            ..Default::default()
        };
        assert_eq!(check_position(&position("A", 5.0, 10.0), &no_tp), None);
    }

    #[test]
    fn combined_market_drop_liquidates_everything() {
        let positions = vec![
            position("WIN", 10.0, 15.0),
            position("FLAT", 10.0, 10.0),
            position("LOSS", 10.0, 8.0),
        ];
        let decision = evaluate(&positions, Some(-0.04), &combined());
        assert!(decision.market_triggered);
        assert_eq!(codes(&decision), vec!["WIN", "FLAT", "LOSS"]);
        assert!(
            decision
                .liquidations
                .iter()
                .all(|l| l.trigger == Trigger::MarketDrop)
        );
    }

    #[test]
    fn combined_without_market_drop_falls_back_to_positions() {
        let positions = vec![
            position("WIN", 10.0, 15.0),
            position("FLAT", 10.0, 10.0),
            position("LOSS", 10.0, 8.0),
        ];
        let decision = evaluate(&positions, Some(-0.01), &combined());
        assert!(!decision.market_triggered);
        assert_eq!(codes(&decision), vec!["LOSS"]);
        assert_eq!(decision.liquidations[0].trigger, Trigger::PositionLoss);
    }

    #[test]
    fn rally_does_not_fire_market_trigger() {
        let decision = evaluate(&[position("A", 10.0, 10.0)], Some(0.08), &combined());
        assert!(!decision.market_triggered);
        assert!(decision.liquidations.is_empty());
    }

    #[test]
    fn position_first_ordering_keeps_position_triggers() {
        let config = StopLossConfig {
            order: TriggerOrder::PositionFirst,
            ..combined()
        };
        let positions = vec![position("LOSS", 10.0, 8.0), position("FLAT", 10.0, 10.0)];
        let decision = evaluate(&positions, Some(-0.05), &config);
        assert_eq!(codes(&decision), vec!["LOSS", "FLAT"]);
        assert_eq!(decision.liquidations[0].trigger, Trigger::PositionLoss);
        assert_eq!(decision.liquidations[1].trigger, Trigger::MarketDrop);
    }

    #[test]
    fn per_position_mode_ignores_market() {
        let config = StopLossConfig {
            mode: StopLossMode::PerPosition,
            ..combined()
        };
        let decision = evaluate(&[position("FLAT", 10.0, 10.0)], Some(-0.5), &config);
        assert!(!decision.market_triggered);
        assert!(decision.liquidations.is_empty());
    }

    #[test]
    fn market_mode_ignores_positions() {
        let config = StopLossConfig {
            mode: StopLossMode::MarketWide,
            ..combined()
        };
        let decision = evaluate(&[position("LOSS", 10.0, 5.0)], Some(0.0), &config);
        assert!(decision.liquidations.is_empty());
    }

    #[test]
    fn missing_basket_skips_market_trigger() {
        let decision = evaluate(&[position("LOSS", 10.0, 8.0)], None, &combined());
        assert!(!decision.market_triggered);
        assert_eq!(codes(&decision), vec!["LOSS"]);
    }

    #[test]
    fn disabled_does_nothing() {
        let config = StopLossConfig {
            enabled: false,
            ..combined()
        };
        let decision = evaluate(&[position("LOSS", 10.0, 1.0)], Some(-0.9), &config);
        assert!(decision.liquidations.is_empty());
    }

    #[test]
    fn basket_return_is_mean_of_intraday_returns() {
        let bar = |open: f64, close: f64| OhlcvBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 0,
            high_limit: open * 1.1,
            low_limit: open * 0.9,
        };
        let r = basket_return(&[bar(10.0, 9.0), bar(10.0, 10.5)]).unwrap();
        assert!((r - (-0.025)).abs() < 1e-12);
        assert!(basket_return(&[]).is_none());
    }

    #[test]
    fn limit_up_unwind_only_when_lock_breaks() {
        let inst = |code: &str, price: f64| Instrument {
            code: code.to_string(),
            display_name: code.to_string(),
            category: "c".into(),
            price,
            high_limit: 11.0,
            low_limit: 9.0,
            listing_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            special_treatment: false,
            suspended: false,
        };
        let locked: BTreeSet<String> = ["OPEN", "SHUT", "GONE"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let snapshot = vec![inst("OPEN", 10.8), inst("SHUT", 11.0)];
        let out = check_limit_up(&locked, &snapshot);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, "OPEN");
        assert_eq!(out[0].trigger.sell_reason(), Some(SellReason::LimitUp));
    }

    #[test]
    fn drawdown_reduction() {
        let config = DrawdownConfig {
            limit: 0.15,
            keep_fraction: 0.5,
        };
        assert!(drawdown_breached(84_000.0, 100_000.0, &config));
        assert!(!drawdown_breached(85_000.0, 100_000.0, &config));

        let mut p = position("A", 10.0, 10.0);
        p.quantity = 1500;
        let targets = reduction_targets(&[p], &config, 100);
        assert_eq!(targets, vec![("A".to_string(), 700)]);
    }
}
