//! Positions, order fills and the holdings report.

/// A held position as reported by the account collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub code: String,
    pub quantity: i64,
    /// Shares that may be sold this session (T+1: today's buys are locked).
    pub closeable_quantity: i64,
    pub avg_cost: f64,
    pub price: f64,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity as f64 * (self.price - self.avg_cost)
    }

    /// price / avg_cost - 1, or 0 for a zero-cost position.
    pub fn return_pct(&self) -> f64 {
        if self.avg_cost > 0.0 {
            self.price / self.avg_cost - 1.0
        } else {
            0.0
        }
    }
}

/// Outcome of an order request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub code: String,
    /// Signed share delta requested (positive buys, negative sells).
    pub requested: i64,
    /// Signed share delta actually filled.
    pub filled: i64,
}

impl OrderFill {
    pub fn is_complete(&self) -> bool {
        self.filled == self.requested
    }

    pub fn is_partial(&self) -> bool {
        self.filled != 0 && self.filled != self.requested
    }

    pub fn any_filled(&self) -> bool {
        self.filled != 0
    }
}

/// Round a share count down to whole lots.
pub fn round_down_to_lot(shares: i64, lot_size: i64) -> i64 {
    if lot_size <= 0 {
        return shares.max(0);
    }
    (shares.max(0) / lot_size) * lot_size
}

/// One row of the holdings report.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingLine {
    pub code: String,
    pub avg_cost: f64,
    pub price: f64,
    pub return_pct: f64,
    pub quantity: i64,
    pub market_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldingsReport {
    pub lines: Vec<HoldingLine>,
    pub total_value: f64,
    pub starting_cash: f64,
}

impl HoldingsReport {
    /// Build a report with lines sorted by code.
    pub fn build(positions: &[Position], total_value: f64, starting_cash: f64) -> Self {
        let mut lines: Vec<HoldingLine> = positions
            .iter()
            .map(|p| HoldingLine {
                code: p.code.clone(),
                avg_cost: p.avg_cost,
                price: p.price,
                return_pct: p.return_pct(),
                quantity: p.quantity,
                market_value: p.market_value(),
            })
            .collect();
        lines.sort_by(|a, b| a.code.cmp(&b.code));
        HoldingsReport {
            lines,
            total_value,
            starting_cash,
        }
    }

    pub fn account_return(&self) -> f64 {
        if self.starting_cash > 0.0 {
            self.total_value / self.starting_cash - 1.0
        } else {
            0.0
        }
    }
}
