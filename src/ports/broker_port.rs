//! Order placement and account access port.

use crate::domain::error::RotatraderError;
use crate::domain::position::{OrderFill, Position};

pub trait BrokerPort {
    /// Adjust the position in `code` so its market value is `value`.
    fn order_target_value(&mut self, code: &str, value: f64) -> Result<OrderFill, RotatraderError>;

    /// Adjust the position in `code` to exactly `shares`.
    fn order_target_shares(&mut self, code: &str, shares: i64)
    -> Result<OrderFill, RotatraderError>;

    /// Current holdings with nonzero quantity.
    fn positions(&self) -> Vec<Position>;

    fn available_cash(&self) -> f64;

    fn starting_cash(&self) -> f64;

    fn total_value(&self) -> f64;

    fn position(&self, code: &str) -> Option<Position> {
        self.positions().into_iter().find(|p| p.code == code)
    }

    fn holds(&self, code: &str) -> bool {
        self.position(code).is_some_and(|p| p.quantity > 0)
    }
}
