//! Core domain types and logic.

pub mod ohlcv;
pub mod instrument;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod universe;
pub mod scoring;
pub mod selection;
pub mod regime;
pub mod session;
pub mod rebalance;
pub mod stoploss;
pub mod strategy;
pub mod config_validation;
pub mod engine;
pub mod error;
