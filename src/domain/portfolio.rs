//! Cash and share ledger behind the paper broker.

use std::collections::{BTreeMap, HashMap};

use super::position::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub quantity: i64,
    /// Shares held since before today's session.
    pub closeable: i64,
    /// Average cost per share, fees included.
    pub avg_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub starting_cash: f64,
    pub holdings: BTreeMap<String, Holding>,
}

impl Portfolio {
    pub fn new(starting_cash: f64) -> Self {
        Portfolio {
            cash: starting_cash,
            starting_cash,
            holdings: BTreeMap::new(),
        }
    }

    pub fn get_holding(&self, code: &str) -> Option<&Holding> {
        self.holdings.get(code)
    }

    pub fn quantity(&self, code: &str) -> i64 {
        self.holdings.get(code).map_or(0, |h| h.quantity)
    }

    pub fn position_count(&self) -> usize {
        self.holdings.len()
    }

    /// Add `quantity` shares bought for `outlay` cash. New shares are not
    /// closeable until [`Portfolio::settle`].
    pub fn apply_buy(&mut self, code: &str, quantity: i64, outlay: f64) {
        if quantity <= 0 {
            return;
        }
        self.cash -= outlay;
        let holding = self.holdings.entry(code.to_string()).or_insert(Holding {
            quantity: 0,
            closeable: 0,
            avg_cost: 0.0,
        });
        let total_cost = holding.avg_cost * holding.quantity as f64 + outlay;
        holding.quantity += quantity;
        holding.avg_cost = total_cost / holding.quantity as f64;
    }

    /// Remove `quantity` closeable shares sold for `proceeds` cash. A fully
    /// sold holding is dropped.
    pub fn apply_sell(&mut self, code: &str, quantity: i64, proceeds: f64) {
        let Some(holding) = self.holdings.get_mut(code) else {
            return;
        };
        let sold = quantity.min(holding.closeable).max(0);
        if sold == 0 {
            return;
        }
        holding.quantity -= sold;
        holding.closeable -= sold;
        self.cash += proceeds;
        if holding.quantity == 0 {
            self.holdings.remove(code);
        }
    }

    /// Start of a new session: everything held becomes sellable.
    pub fn settle(&mut self) {
        for holding in self.holdings.values_mut() {
            holding.closeable = holding.quantity;
        }
    }

    /// Positions valued at `prices`; a code without a quote is valued at cost.
    pub fn positions(&self, prices: &HashMap<String, f64>) -> Vec<Position> {
        self.holdings
            .iter()
            .map(|(code, h)| Position {
                code: code.clone(),
                quantity: h.quantity,
                closeable_quantity: h.closeable,
                avg_cost: h.avg_cost,
                price: prices.get(code).copied().unwrap_or(h.avg_cost),
            })
            .collect()
    }

    pub fn total_value(&self, prices: &HashMap<String, f64>) -> f64 {
        self.cash
            + self
                .positions(prices)
                .iter()
                .map(Position::market_value)
                .sum::<f64>()
    }
}
