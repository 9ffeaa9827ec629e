//! Fill pricing: slippage, commissions and stamp tax.
//!
//! Rates are percentages of trade value, as configured.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Cost parameters for simulated fills.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub buy_commission_pct: f64,
    pub sell_commission_pct: f64,
    /// Charged on sells only.
    pub stamp_tax_pct: f64,
    /// Floor applied to the commission of each fill.
    pub min_commission: f64,
    pub slippage_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            buy_commission_pct: 0.03,
            sell_commission_pct: 0.03,
            stamp_tax_pct: 0.1,
            min_commission: 5.0,
            slippage_pct: 0.0,
        }
    }
}

/// Commission plus stamp tax for a fill of `trade_value`.
pub fn calculate_commission(trade_value: f64, side: Side, config: &ExecutionConfig) -> f64 {
    if trade_value <= 0.0 {
        return 0.0;
    }
    let rate = match side {
        Side::Buy => config.buy_commission_pct,
        Side::Sell => config.sell_commission_pct,
    };
    let commission = (trade_value * rate / 100.0).max(config.min_commission);
    let tax = match side {
        Side::Buy => 0.0,
        Side::Sell => trade_value * config.stamp_tax_pct / 100.0,
    };
    commission + tax
}

/// Buys fill above the quote, sells below.
pub fn apply_slippage(market_price: f64, side: Side, slippage_pct: f64) -> f64 {
    match side {
        Side::Buy => market_price * (1.0 + slippage_pct / 100.0),
        Side::Sell => market_price * (1.0 - slippage_pct / 100.0),
    }
}

/// Priced fill of `quantity` shares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillCost {
    pub execution_price: f64,
    pub gross: f64,
    pub fees: f64,
}

impl FillCost {
    /// Cash leaving the account for a buy.
    pub fn buy_outlay(&self) -> f64 {
        self.gross + self.fees
    }

    /// Cash entering the account for a sell.
    pub fn sell_proceeds(&self) -> f64 {
        self.gross - self.fees
    }
}

pub fn price_fill(
    quantity: i64,
    market_price: f64,
    side: Side,
    config: &ExecutionConfig,
) -> FillCost {
    let execution_price = apply_slippage(market_price, side, config.slippage_pct);
    let gross = quantity as f64 * execution_price;
    FillCost {
        execution_price,
        gross,
        fees: calculate_commission(gross, side, config),
    }
}

/// Largest multiple of `lot_size` not above `wanted` whose buy outlay fits in `cash`.
pub fn affordable_shares(
    wanted: i64,
    market_price: f64,
    cash: f64,
    lot_size: i64,
    config: &ExecutionConfig,
) -> i64 {
    let step = lot_size.max(1);
    let mut shares = (wanted.max(0) / step) * step;
    while shares > 0 && price_fill(shares, market_price, Side::Buy, config).buy_outlay() > cash {
        shares -= step;
    }
    shares
}
