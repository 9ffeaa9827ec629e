//! Cycle-scoped state carried between the daily callbacks.
//!
//! Reset points:
//! - [`SessionState::start_day`] at the first callback of every session
//!   (hold list, yesterday's locked-up list, no-trading flag).
//! - [`SessionState::start_week`] at the start of the weekly adjustment
//!   (not-rebuy list).
//! - [`SessionState::end_afternoon`] after the afternoon pass (sell reason).

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    /// Per-position or market-wide stop loss. Blocks same-day replenishment.
    StopLoss,
    /// A limit-up lock opened. Freed cash may be reinvested the same day.
    LimitUp,
}

impl SellReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SellReason::StopLoss => "stoploss",
            SellReason::LimitUp => "limitup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Codes held at the start of the session.
    pub hold_list: Vec<String>,
    /// Held codes that closed on their ceiling in the prior session.
    pub yesterday_locked_up: BTreeSet<String>,
    /// This week's target list.
    pub target_list: Vec<String>,
    /// Ranked names behind the target list, used for same-day replenishment.
    pub reserve_list: Vec<String>,
    /// Codes bought this week; never rebought within the week.
    pub not_rebuy: BTreeSet<String>,
    pub sell_reason: Option<SellReason>,
    pub no_trading_today: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_day(
        &mut self,
        hold_list: Vec<String>,
        yesterday_locked_up: BTreeSet<String>,
        no_trading_today: bool,
    ) {
        self.hold_list = hold_list;
        self.yesterday_locked_up = yesterday_locked_up;
        self.no_trading_today = no_trading_today;
    }

    pub fn start_week(&mut self) {
        self.not_rebuy.clear();
    }

    /// Record a liquidation reason. A stop loss outranks a limit-up unwind for
    /// the rest of the day.
    pub fn record_sell(&mut self, reason: SellReason) {
        match (self.sell_reason, reason) {
            (Some(SellReason::StopLoss), SellReason::LimitUp) => {}
            _ => self.sell_reason = Some(reason),
        }
    }

    pub fn end_afternoon(&mut self) {
        self.sell_reason = None;
    }

    pub fn mark_bought<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.not_rebuy.extend(codes.into_iter().map(Into::into));
    }

    /// Drop codes already bought this week, keeping order.
    pub fn filter_not_rebuy(&self, codes: &[String]) -> Vec<String> {
        codes
            .iter()
            .filter(|c| !self.not_rebuy.contains(*c))
            .cloned()
            .collect()
    }

    pub fn is_locked_up(&self, code: &str) -> bool {
        self.yesterday_locked_up.contains(code)
    }
}
