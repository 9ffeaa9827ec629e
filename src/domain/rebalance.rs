//! Reconciliation of current holdings against a target list.
//!
//! Sells: held codes not in the target and not locked up since yesterday.
//! Buys: equal-weight split of available cash over the shortfall
//! (`target_count - held_count`), in whole lots, skipping names already held.
//! The per-name amount is fixed at the start of the buy pass. Failed orders
//! are not retried; the next pass sees the position and reconciles again.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::domain::position::{Position, round_down_to_lot};
use crate::domain::session::SessionState;
use crate::ports::broker_port::BrokerPort;

pub const DEFAULT_LOT_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct BuyOrder {
    pub code: String,
    /// Cash allocated to this name.
    pub value: f64,
    pub price: f64,
    /// Whole-lot share count.
    pub shares: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuySkip {
    AlreadyHeld,
    NoPrice,
    /// Allocation buys less than one lot.
    BelowOneLot { value: f64, price: f64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuyPlan {
    /// Open slots: target count minus names already held.
    pub slots: usize,
    /// Equal-weight amount per new name.
    pub per_name_value: f64,
    /// Eligible orders in target order. Execution stops once `slots` fill.
    pub orders: Vec<BuyOrder>,
    pub skipped: Vec<(String, BuySkip)>,
}

impl BuyPlan {
    /// The orders that fill the open slots if every one succeeds.
    pub fn admitted(&self) -> &[BuyOrder] {
        &self.orders[..self.slots.min(self.orders.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RebalancePlan {
    pub sells: Vec<String>,
    pub buys: BuyPlan,
}

/// Held codes to sell: not targeted and not locked up.
pub fn plan_sells(
    target: &[String],
    holdings: &[String],
    locked: &BTreeSet<String>,
) -> Vec<String> {
    holdings
        .iter()
        .filter(|code| !target.contains(*code) && !locked.contains(*code))
        .cloned()
        .collect()
}

/// Plan equal-weight buys for the names in `target` not already held.
///
/// `held` maps code to quantity; only nonzero quantities count as held. Open
/// slots are `target_count - held_count`; `target` may list more candidates
/// than slots so that a skipped name leaves room for the next.
pub fn plan_buys(
    target: &[String],
    target_count: usize,
    held: &HashMap<String, i64>,
    cash: f64,
    prices: &HashMap<String, f64>,
    lot_size: i64,
) -> BuyPlan {
    let held_count = held.values().filter(|q| **q > 0).count();
    let slots = target_count.saturating_sub(held_count);
    let mut plan = BuyPlan {
        slots,
        ..Default::default()
    };
    if slots == 0 || cash <= 0.0 {
        return plan;
    }

    plan.per_name_value = cash / slots as f64;

    for code in target {
        if held.get(code).is_some_and(|q| *q > 0) {
            plan.skipped.push((code.clone(), BuySkip::AlreadyHeld));
            continue;
        }
        let Some(price) = prices.get(code).copied().filter(|p| *p > 0.0) else {
            plan.skipped.push((code.clone(), BuySkip::NoPrice));
            continue;
        };
        let raw_shares = (plan.per_name_value / price).floor() as i64;
        let shares = round_down_to_lot(raw_shares, lot_size);
        if shares == 0 {
            plan.skipped.push((
                code.clone(),
                BuySkip::BelowOneLot {
                    value: plan.per_name_value,
                    price,
                },
            ));
            continue;
        }
        plan.orders.push(BuyOrder {
            code: code.clone(),
            value: plan.per_name_value,
            price,
            shares,
        });
    }

    plan
}

/// Pure reconciliation: sells, then buys sized from `cash` over the names the
/// sells leave behind.
pub fn rebalance(
    target: &[String],
    holdings: &[Position],
    locked: &BTreeSet<String>,
    cash: f64,
    prices: &HashMap<String, f64>,
    lot_size: i64,
) -> RebalancePlan {
    let held_codes: Vec<String> = holdings
        .iter()
        .filter(|p| p.quantity > 0)
        .map(|p| p.code.clone())
        .collect();
    let sells = plan_sells(target, &held_codes, locked);
    let retained: HashMap<String, i64> = holdings
        .iter()
        .filter(|p| !sells.contains(&p.code))
        .map(|p| (p.code.clone(), p.quantity))
        .collect();
    let buys = plan_buys(target, target.len(), &retained, cash, prices, lot_size);
    RebalancePlan { sells, buys }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionReport {
    pub sold: Vec<String>,
    /// Sells not fully filled; the position stays for the next pass.
    pub unsold: Vec<String>,
    pub bought: Vec<String>,
    pub unfilled: Vec<String>,
    pub skipped: Vec<(String, BuySkip)>,
}

/// Close each position in `codes`. Not retried on failure.
pub fn execute_sells(broker: &mut dyn BrokerPort, codes: &[String], report: &mut ExecutionReport) {
    for code in codes {
        match broker.order_target_shares(code, 0) {
            Ok(fill) if fill.is_complete() => {
                info!(code = %code, shares = -fill.filled, "sold");
                report.sold.push(code.clone());
            }
            Ok(fill) => {
                warn!(
                    code = %code,
                    requested = fill.requested,
                    filled = fill.filled,
                    "sell not fully filled, left for next pass"
                );
                report.unsold.push(code.clone());
            }
            Err(e) => {
                warn!(code = %code, error = %e, "sell rejected, left for next pass");
                report.unsold.push(code.clone());
            }
        }
    }
}

/// Buy towards `target` against the broker's current holdings and cash.
///
/// The allocation is computed once from the shortfall at the start of the
/// pass. Successful buys are recorded in the session's not-rebuy list. Buying
/// stops once the broker holds `target_count` names.
pub fn execute_buys(
    broker: &mut dyn BrokerPort,
    target: &[String],
    target_count: usize,
    prices: &HashMap<String, f64>,
    lot_size: i64,
    session: &mut SessionState,
    report: &mut ExecutionReport,
) {
    let held: HashMap<String, i64> = broker
        .positions()
        .into_iter()
        .map(|p| (p.code, p.quantity))
        .collect();
    let cash = broker.available_cash();
    let plan = plan_buys(target, target_count, &held, cash, prices, lot_size);
    info!(
        held = held.len(),
        target = target_count,
        cash,
        per_name = plan.per_name_value,
        "buy pass"
    );
    report.skipped.extend(plan.skipped.iter().cloned());

    if plan.slots == 0 {
        debug!("no open slots, nothing to buy");
        return;
    }

    for order in &plan.orders {
        if held_count(broker) >= target_count {
            break;
        }
        match broker.order_target_shares(&order.code, order.shares) {
            Ok(fill) if fill.any_filled() => {
                info!(
                    code = %order.code,
                    shares = fill.filled,
                    value = order.value,
                    "bought"
                );
                session.mark_bought([order.code.as_str()]);
                report.bought.push(order.code.clone());
            }
            Ok(_) => {
                warn!(code = %order.code, "buy not filled");
                report.unfilled.push(order.code.clone());
            }
            Err(e) => {
                warn!(code = %order.code, error = %e, "buy rejected");
                report.unfilled.push(order.code.clone());
            }
        }
    }
}

fn held_count(broker: &dyn BrokerPort) -> usize {
    broker.positions().iter().filter(|p| p.quantity > 0).count()
}
