//! Port traits for the host trading platform's collaborators.

pub mod broker_port;
pub mod config_port;
pub mod market_data_port;
