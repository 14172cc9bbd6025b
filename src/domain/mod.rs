//! Core domain types and logic.

pub mod ohlcv;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod indicator;
pub mod risk;
pub mod fusion;
pub mod metrics;
pub mod backtest;
pub mod config_validation;
pub mod error;
