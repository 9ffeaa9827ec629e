//! In-memory broker filling orders at the latest quote.
//!
//! Buys round down to whole lots and shrink to what cash covers. Sells are
//! limited to closeable shares, so shares bought today only become sellable
//! after [`PaperBroker::settle`]. Orders on suspended or unquoted codes are
//! rejected.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::error::RotatraderError;
use crate::domain::execution::{ExecutionConfig, Side, affordable_shares, price_fill};
use crate::domain::instrument::Instrument;
use crate::domain::portfolio::Portfolio;
use crate::domain::position::{OrderFill, Position, round_down_to_lot};
use crate::domain::strategy::PaperConfig;
use crate::ports::broker_port::BrokerPort;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub suspended: bool,
}

pub struct PaperBroker {
    portfolio: Portfolio,
    costs: ExecutionConfig,
    lot_size: i64,
    quotes: HashMap<String, Quote>,
}

impl PaperBroker {
    pub fn new(config: &PaperConfig, lot_size: i64) -> Self {
        PaperBroker {
            portfolio: Portfolio::new(config.starting_cash),
            costs: config.costs.clone(),
            lot_size,
            quotes: HashMap::new(),
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn set_quote(&mut self, code: &str, price: f64, suspended: bool) {
        self.quotes
            .insert(code.to_string(), Quote { price, suspended });
    }

    /// Refresh quotes from a market snapshot.
    pub fn update_quotes(&mut self, instruments: &[Instrument]) {
        for inst in instruments {
            self.set_quote(&inst.code, inst.price, inst.suspended);
        }
    }

    /// Start a new session.
    pub fn settle(&mut self) {
        self.portfolio.settle();
    }

    fn prices(&self) -> HashMap<String, f64> {
        self.quotes
            .iter()
            .filter(|(_, q)| q.price > 0.0)
            .map(|(code, q)| (code.clone(), q.price))
            .collect()
    }

    fn tradable_quote(&self, code: &str) -> Result<Quote, RotatraderError> {
        let quote = self
            .quotes
            .get(code)
            .copied()
            .filter(|q| q.price > 0.0)
            .ok_or_else(|| RotatraderError::ExecutionRejected {
                code: code.to_string(),
                reason: "no quote".to_string(),
            })?;
        if quote.suspended {
            return Err(RotatraderError::ExecutionRejected {
                code: code.to_string(),
                reason: "suspended".to_string(),
            });
        }
        Ok(quote)
    }
}

impl BrokerPort for PaperBroker {
    fn order_target_value(&mut self, code: &str, value: f64) -> Result<OrderFill, RotatraderError> {
        let quote = self.tradable_quote(code)?;
        let shares = if value <= 0.0 {
            0
        } else {
            round_down_to_lot((value / quote.price).floor() as i64, self.lot_size)
        };
        self.order_target_shares(code, shares)
    }

    fn order_target_shares(
        &mut self,
        code: &str,
        shares: i64,
    ) -> Result<OrderFill, RotatraderError> {
        let current = self.portfolio.quantity(code);
        let requested = shares.max(0) - current;
        if requested == 0 {
            return Ok(OrderFill {
                code: code.to_string(),
                requested: 0,
                filled: 0,
            });
        }
        let quote = self.tradable_quote(code)?;

        let filled = if requested > 0 {
            let wanted = round_down_to_lot(requested, self.lot_size);
            let qty = affordable_shares(
                wanted,
                quote.price,
                self.portfolio.cash,
                self.lot_size,
                &self.costs,
            );
            if qty > 0 {
                let fill = price_fill(qty, quote.price, Side::Buy, &self.costs);
                self.portfolio.apply_buy(code, qty, fill.buy_outlay());
                debug!(code = %code, qty, price = fill.execution_price, fees = fill.fees, "paper buy");
            }
            qty
        } else {
            let closeable = self
                .portfolio
                .get_holding(code)
                .map_or(0, |h| h.closeable);
            let qty = (-requested).min(closeable);
            if qty > 0 {
                let fill = price_fill(qty, quote.price, Side::Sell, &self.costs);
                self.portfolio.apply_sell(code, qty, fill.sell_proceeds());
                debug!(code = %code, qty, price = fill.execution_price, fees = fill.fees, "paper sell");
            }
            -qty
        };

        Ok(OrderFill {
            code: code.to_string(),
            requested,
            filled,
        })
    }

    fn positions(&self) -> Vec<Position> {
        self.portfolio.positions(&self.prices())
    }

    fn available_cash(&self) -> f64 {
        self.portfolio.cash
    }

    fn starting_cash(&self) -> f64 {
        self.portfolio.starting_cash
    }

    fn total_value(&self) -> f64 {
        self.portfolio.total_value(&self.prices())
    }
}
