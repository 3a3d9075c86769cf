//! Comparative-learning research lab for trading strategies.
//!
//! A deterministic backtest simulator sits inside a research loop that
//! generates scenarios, compares results across runs, accumulates
//! confidence-scored insights, and proposes the next experiments by expected
//! information gain.

pub mod config;
pub mod data;
pub mod evaluator;
pub mod indicators;
pub mod logging;
pub mod memory;
pub mod proposal;
pub mod regime;
pub mod research;
pub mod scenario;
pub mod simulator;
pub mod storage;
