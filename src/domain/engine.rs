//! Daily schedule tying the components together.
//!
//! Callbacks in time order:
//! - `prepare_day` (09:55): hold list, yesterday's locked-up list, no-trading flag
//! - `weekly_adjustment` (10:00 on the rebalance weekday): regime gate, then
//!   filter, score, select, sell, buy
//! - `run_stop_loss` (10:01): stop-loss triggers and drawdown reduction
//! - `afternoon_check` (14:00): limit-up unwinds and same-day replenishment
//! - `close_account` (14:50): liquidate everything on a no-trading day
//!
//! All cycle state lives in the [`SessionState`] passed to each call.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::error::RotatraderError;
use crate::domain::position::HoldingsReport;
use crate::domain::rebalance::{ExecutionReport, execute_buys, execute_sells, plan_sells};
use crate::domain::regime::{self, RegimeRanking};
use crate::domain::scoring::{self, ScoredInstrument, ScoringOutcome};
use crate::domain::selection::{SelectionOutcome, rank_order, select_diversified};
use crate::domain::session::{SellReason, SessionState};
use crate::domain::stoploss::{
    self, Liquidation, StopLossDecision, StopLossMode, check_limit_up, execute_liquidations,
};
use crate::domain::strategy::StrategyConfig;
use crate::domain::universe::{FilterOutcome, filter_universe};
use crate::ports::broker_port::BrokerPort;
use crate::ports::market_data_port::MarketDataPort;

/// Why the weekly pass did or did not pick stocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gate {
    #[default]
    Proceed,
    NoTradingDay,
    /// The risk-on reference did not rank first; holdings were liquidated.
    RiskOff { leader: Option<String> },
    /// Benchmark below its moving average; holdings were liquidated.
    TrendFilter,
    /// Candidate data could not be fetched; the target list is empty.
    DataUnavailable { reason: String },
}

/// Filter, scoring and selection results behind one target list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetSelection {
    pub filter: FilterOutcome,
    pub scoring: ScoringOutcome,
    pub selection: SelectionOutcome,
    /// Scored names behind the selection, best first.
    pub reserve: Vec<String>,
    /// Latest price of every instrument that passed the filter.
    pub prices: HashMap<String, f64>,
}

impl TargetSelection {
    pub fn target(&self) -> Vec<String> {
        self.selection.codes()
    }

    pub fn scored(&self, code: &str) -> Option<&ScoredInstrument> {
        self.scoring.scored.iter().find(|s| s.code() == code)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeeklyOutcome {
    pub gate: Gate,
    pub ranking: Option<RegimeRanking>,
    pub selection: Option<TargetSelection>,
    pub report: ExecutionReport,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StopLossOutcome {
    pub decision: StopLossDecision,
    /// Codes cut back by the drawdown reduction.
    pub reduced: Vec<String>,
    pub report: ExecutionReport,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AfternoonOutcome {
    pub unwound: Vec<Liquidation>,
    pub replenished: bool,
    pub report: ExecutionReport,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DayOutcome {
    pub weekly: Option<WeeklyOutcome>,
    pub stop_loss: StopLossOutcome,
    pub afternoon: AfternoonOutcome,
    pub close: ExecutionReport,
}

pub struct Engine<'a> {
    config: &'a StrategyConfig,
    market: &'a dyn MarketDataPort,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a StrategyConfig, market: &'a dyn MarketDataPort) -> Self {
        Engine { config, market }
    }

    pub fn config(&self) -> &StrategyConfig {
        self.config
    }

    /// Run every callback of one session in schedule order.
    pub fn run_day(
        &self,
        broker: &mut dyn BrokerPort,
        session: &mut SessionState,
        today: NaiveDate,
        weekly: bool,
    ) -> Result<DayOutcome, RotatraderError> {
        self.prepare_day(broker, session, today);
        let weekly = if weekly {
            Some(self.weekly_adjustment(broker, session, today)?)
        } else {
            None
        };
        let stop_loss = self.run_stop_loss(broker, session, today);
        let afternoon = self.afternoon_check(broker, session, today);
        let close = self.close_account(broker, session);
        Ok(DayOutcome {
            weekly,
            stop_loss,
            afternoon,
            close,
        })
    }

    /// Start-of-session refresh.
    pub fn prepare_day(&self, broker: &dyn BrokerPort, session: &mut SessionState, today: NaiveDate) {
        let hold_list = held_codes(broker);
        let mut locked = BTreeSet::new();
        if let Some(prev) = today.pred_opt() {
            for code in &hold_list {
                match self.market.history(code, prev, 1) {
                    Ok(bars) => {
                        if bars.last().is_some_and(|b| b.closed_at_high_limit()) {
                            locked.insert(code.clone());
                        }
                    }
                    Err(e) => warn!(code = %code, error = %e, "no prior bar, not treated as locked"),
                }
            }
        }
        let no_trading = self.config.calendar.is_no_trading(today);
        info!(
            %today,
            held = hold_list.len(),
            locked = locked.len(),
            no_trading,
            "session prepared"
        );
        session.start_day(hold_list, locked, no_trading);
    }

    /// Weekly cycle. Regime and trend-filter failures propagate; candidate data
    /// failures leave an empty target list.
    pub fn weekly_adjustment(
        &self,
        broker: &mut dyn BrokerPort,
        session: &mut SessionState,
        today: NaiveDate,
    ) -> Result<WeeklyOutcome, RotatraderError> {
        let mut outcome = WeeklyOutcome::default();
        session.start_week();
        if session.no_trading_today {
            info!(%today, "no-trading day, weekly adjustment skipped");
            outcome.gate = Gate::NoTradingDay;
            return Ok(outcome);
        }

        let regime = &self.config.regime;
        if regime.enabled {
            let ranking = regime::rank(self.market, &regime.references, today, regime.window_days)?;
            let favoured = ranking.favours(&regime.risk_on);
            let leader = ranking.leader().map(str::to_string);
            outcome.ranking = Some(ranking);
            if !favoured {
                info!(leader = ?leader, risk_on = %regime.risk_on, "risk-on reference not leading, liquidating");
                self.liquidate_all(broker, &mut outcome.report);
                outcome.gate = Gate::RiskOff { leader };
                return Ok(outcome);
            }
        }

        if let Some(tf) = &regime.trend_filter {
            if !regime::trend_filter(self.market, &tf.benchmark, today, tf.window)? {
                info!(benchmark = %tf.benchmark, window = tf.window, "benchmark below moving average, liquidating");
                self.liquidate_all(broker, &mut outcome.report);
                outcome.gate = Gate::TrendFilter;
                return Ok(outcome);
            }
        }

        let held = held_codes(broker);
        let selection = match self.select_targets(&held, today) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "candidate data unavailable, moving to cash");
                outcome.gate = Gate::DataUnavailable {
                    reason: e.to_string(),
                };
                TargetSelection::default()
            }
        };

        let target = selection.target();
        session.target_list = target.clone();
        session.reserve_list = selection.reserve.clone();

        let sells = plan_sells(&target, &held, &session.yesterday_locked_up);
        execute_sells(broker, &sells, &mut outcome.report);
        execute_buys(
            broker,
            &target,
            target.len(),
            &selection.prices,
            self.config.rebalance.lot_size,
            session,
            &mut outcome.report,
        );
        session.mark_bought(held_codes(broker));

        info!(
            target = ?target,
            sold = outcome.report.sold.len(),
            bought = outcome.report.bought.len(),
            "weekly adjustment complete"
        );
        outcome.selection = Some(selection);
        Ok(outcome)
    }

    /// Universe filter, factor scoring and diversified selection for `today`.
    pub fn select_targets(
        &self,
        held: &[String],
        today: NaiveDate,
    ) -> Result<TargetSelection, RotatraderError> {
        let rb = &self.config.rebalance;
        let universe = self.market.constituents(&rb.universe_index)?;
        let snapshot = self.market.snapshot(&universe, today)?;
        let held: HashSet<String> = held.iter().cloned().collect();
        let filter = filter_universe(&snapshot, today, &held, &self.config.filter);

        let scoring = scoring::score(
            self.market,
            &filter.codes(),
            today,
            &self.config.weights,
            self.config.prescreen.as_ref(),
        )?;
        let selection = select_diversified(&scoring.scored, rb.stock_num, rb.max_category_share);

        let mut ranked: Vec<&ScoredInstrument> = scoring.scored.iter().collect();
        ranked.sort_by(|a, b| rank_order(a, b));
        let chosen: HashSet<String> = selection.codes().into_iter().collect();
        let reserve: Vec<String> = ranked
            .iter()
            .map(|s| s.code().to_string())
            .filter(|c| !chosen.contains(c))
            .collect();

        for s in &selection.selected {
            info!(code = %s.code, score = s.score, category = %s.category, "selected");
        }

        let prices = filter
            .kept
            .iter()
            .map(|i| (i.code.clone(), i.price))
            .collect();
        Ok(TargetSelection {
            filter,
            scoring,
            selection,
            reserve,
            prices,
        })
    }

    /// Stop-loss triggers, then the drawdown reduction if configured.
    pub fn run_stop_loss(
        &self,
        broker: &mut dyn BrokerPort,
        session: &mut SessionState,
        today: NaiveDate,
    ) -> StopLossOutcome {
        let cfg = &self.config.stoploss;
        let mut outcome = StopLossOutcome::default();
        if !cfg.enabled {
            return outcome;
        }

        let positions = broker.positions();
        let basket = if cfg.mode == StopLossMode::PerPosition || positions.is_empty() {
            None
        } else {
            self.breadth_return(today)
        };
        outcome.decision = stoploss::evaluate(&positions, basket, cfg);
        if outcome.decision.market_triggered {
            warn!(
                basket_return = ?outcome.decision.basket_return,
                limit = cfg.market_drop_limit,
                "market-wide stop loss"
            );
        }
        execute_liquidations(
            broker,
            &outcome.decision.liquidations,
            session,
            &mut outcome.report,
        );

        if let Some(dd) = &cfg.drawdown {
            let total = broker.total_value();
            let start = broker.starting_cash();
            if stoploss::drawdown_breached(total, start, dd) {
                warn!(total, start, limit = dd.limit, "drawdown limit breached, reducing positions");
                let targets = stoploss::reduction_targets(
                    &broker.positions(),
                    dd,
                    self.config.rebalance.lot_size,
                );
                for (code, shares) in targets {
                    match broker.order_target_shares(&code, shares) {
                        Ok(fill) if fill.any_filled() => outcome.reduced.push(code),
                        Ok(_) => debug!(code = %code, "reduction not filled"),
                        Err(e) => warn!(code = %code, error = %e, "reduction rejected"),
                    }
                }
            }
        }
        outcome
    }

    /// Mean return of the breadth basket over the last session before
    /// `today`; `None` when unavailable.
    fn breadth_return(&self, today: NaiveDate) -> Option<f64> {
        let index = &self.config.stoploss.breadth_index;
        let codes = match self.market.constituents(index) {
            Ok(codes) => codes,
            Err(e) => {
                warn!(index = %index, error = %e, "breadth basket unavailable");
                return None;
            }
        };
        let mut bars = Vec::with_capacity(codes.len());
        for code in &codes {
            match self.market.history(code, today, 2) {
                Ok(history) => {
                    if let Some(bar) = history.into_iter().rev().find(|b| b.date < today) {
                        bars.push(bar);
                    }
                }
                Err(e) => debug!(code = %code, error = %e, "no bar for breadth basket"),
            }
        }
        let basket = stoploss::basket_return(&bars);
        debug!(index = %index, members = bars.len(), basket_return = ?basket, "breadth basket");
        basket
    }

    /// Limit-up unwinds, then reinvest freed cash when the day's only
    /// liquidations were unwinds.
    pub fn afternoon_check(
        &self,
        broker: &mut dyn BrokerPort,
        session: &mut SessionState,
        today: NaiveDate,
    ) -> AfternoonOutcome {
        let mut outcome = AfternoonOutcome::default();
        if session.no_trading_today {
            session.end_afternoon();
            return outcome;
        }

        let locked: BTreeSet<String> = session
            .yesterday_locked_up
            .iter()
            .filter(|c| broker.holds(c))
            .cloned()
            .collect();
        if !locked.is_empty() {
            let codes: Vec<String> = locked.iter().cloned().collect();
            match self.market.snapshot(&codes, today) {
                Ok(snapshot) => outcome.unwound = check_limit_up(&locked, &snapshot),
                Err(e) => warn!(error = %e, "snapshot unavailable, locked holdings kept"),
            }
        }
        execute_liquidations(broker, &outcome.unwound, session, &mut outcome.report);

        if session.sell_reason == Some(SellReason::LimitUp) {
            outcome.replenished = true;
            self.replenish(broker, session, today, &mut outcome.report);
        } else if let Some(reason) = session.sell_reason {
            info!(reason = reason.as_str(), "no replenishment after stop loss");
        }
        session.end_afternoon();
        outcome
    }

    fn replenish(
        &self,
        broker: &mut dyn BrokerPort,
        session: &mut SessionState,
        today: NaiveDate,
        report: &mut ExecutionReport,
    ) {
        let held: HashSet<String> = held_codes(broker).into_iter().collect();
        let candidates: Vec<String> = session
            .target_list
            .iter()
            .chain(session.reserve_list.iter())
            .filter(|c| !held.contains(*c) && !session.not_rebuy.contains(*c))
            .cloned()
            .collect();
        if candidates.is_empty() {
            debug!("no replenishment candidates");
            return;
        }

        let snapshot = match self.market.snapshot(&candidates, today) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "snapshot unavailable, replenishment skipped");
                return;
            }
        };
        let filter = filter_universe(&snapshot, today, &held, &self.config.filter);
        let prices: HashMap<String, f64> = filter
            .kept
            .iter()
            .map(|i| (i.code.clone(), i.price))
            .collect();
        let eligible: Vec<String> = candidates
            .into_iter()
            .filter(|c| prices.contains_key(c))
            .collect();

        info!(candidates = eligible.len(), "replenishing after limit-up unwind");
        execute_buys(
            broker,
            &eligible,
            self.config.rebalance.stock_num,
            &prices,
            self.config.rebalance.lot_size,
            session,
            report,
        );
    }

    /// Liquidate everything on a no-trading day.
    pub fn close_account(
        &self,
        broker: &mut dyn BrokerPort,
        session: &SessionState,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if session.no_trading_today {
            self.liquidate_all(broker, &mut report);
        }
        report
    }

    pub fn holdings_report(&self, broker: &dyn BrokerPort) -> HoldingsReport {
        let report = HoldingsReport::build(
            &broker.positions(),
            broker.total_value(),
            broker.starting_cash(),
        );
        for line in &report.lines {
            info!(
                code = %line.code,
                avg_cost = line.avg_cost,
                price = line.price,
                return_pct = line.return_pct,
                quantity = line.quantity,
                value = line.market_value,
                "holding"
            );
        }
        info!(
            total = report.total_value,
            account_return = report.account_return(),
            "account"
        );
        report
    }

    fn liquidate_all(&self, broker: &mut dyn BrokerPort, report: &mut ExecutionReport) {
        let held = held_codes(broker);
        execute_sells(broker, &held, report);
    }
}

fn held_codes(broker: &dyn BrokerPort) -> Vec<String> {
    broker
        .positions()
        .into_iter()
        .filter(|p| p.quantity > 0)
        .map(|p| p.code)
        .collect()
}
