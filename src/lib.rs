//! # Hedge Guardian
//!
//! Execution and reconciliation engine for delta-neutral funding-rate
//! hedges across two perpetuals venues (X10 and Lighter).
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Venue capability interface and the paper venue
//! - `ledger`: Hedge trade model and the ledger seam
//! - `persistence`: SQLite-backed ledger
//! - `risk`: Blacklist/backoff, symbol claims and critical alerts
//! - `strategy`: Open/close coordinators, position monitor, reconciliation
//!   guardian and the scan loop
//! - `utils`: Injectable clock

pub mod config;
pub mod exchange;
pub mod ledger;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
