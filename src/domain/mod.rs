//! Core domain types and logic.

pub mod error;
pub mod stats;
pub mod price_series;
pub mod snapshot;
pub mod filter;
pub mod selection;
pub mod weights;
pub mod trade;
pub mod ledger;
pub mod rebalance;
pub mod risk;
pub mod trend;
pub mod position_sizing;
pub mod stop_loss;
pub mod signal_rules;
pub mod signal;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod signal_backtest;
pub mod universe;
pub mod config_validation;
pub mod batch;
pub mod task_registry;
