//! Configuration management for the hedge guardian.
//!
//! Loads settings from an optional `config` file and `HG__`-prefixed
//! environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Position sizing and admission caps
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Order submission timeouts and retry budgets
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Blacklist and pause durations
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// Exit trigger thresholds
    #[serde(default)]
    pub exit: ExitConfig,
    /// Ledger vs. venue reconciliation
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Opportunity scanning cadence and filters
    #[serde(default)]
    pub scan: ScanConfig,
    /// Paper venues used by the `run` command
    #[serde(default)]
    pub paper: PaperConfig,
    /// SQLite ledger location
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Desired notional per hedge in USD (used when an opportunity has none)
    #[serde(default = "default_desired_notional")]
    pub desired_notional_usd: Decimal,
    /// Absolute floor for a hedge notional
    #[serde(default = "default_hard_min_notional")]
    pub hard_min_notional_usd: Decimal,
    /// Ceiling for a hedge notional
    #[serde(default = "default_max_notional")]
    pub max_notional_usd: Decimal,
    /// Required free balance per venue as a multiple of the margin (1.05 = 5% buffer)
    #[serde(default = "default_balance_buffer")]
    pub balance_buffer: Decimal,
    /// Leverage applied when computing required margin
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
    /// Maximum concurrent hedges
    #[serde(default = "default_max_open_trades")]
    pub max_open_trades: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout for each leg submission in seconds
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Attempts for the taker leg (leg B)
    #[serde(default = "default_leg_b_max_attempts")]
    pub leg_b_max_attempts: u32,
    /// Delay between leg B attempts in milliseconds
    #[serde(default = "default_leg_b_retry_delay")]
    pub leg_b_retry_delay_ms: u64,
    /// Timeout for each rollback/cleanup call in seconds
    #[serde(default = "default_rollback_timeout")]
    pub rollback_timeout_secs: u64,
    /// Attempts for a rollback close before degrading to an alert
    #[serde(default = "default_rollback_max_attempts")]
    pub rollback_max_attempts: u32,
    /// Delay between rollback attempts in milliseconds
    #[serde(default = "default_rollback_retry_delay")]
    pub rollback_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Symbol cooldown after any leg failure
    #[serde(default = "default_leg_failure_cooldown")]
    pub leg_failure_secs: i64,
    /// Global pause after a leg B failure or ledger failure
    #[serde(default = "default_global_pause")]
    pub global_pause_secs: i64,
    /// Extended symbol cooldown after a ledger failure
    #[serde(default = "default_ledger_failure_cooldown")]
    pub ledger_failure_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Close when pnl < -notional * stop_loss_pct
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Close when pnl > notional * take_profit_pct
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    /// Maximum lifetime of a farm trade in seconds
    #[serde(default = "default_farm_max_hold")]
    pub farm_max_hold_secs: i64,
    /// Safety expiry for any trade in hours (0 = disabled)
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: i64,
    /// Round-trip fee estimate as a fraction of notional
    #[serde(default = "default_round_trip_fee")]
    pub round_trip_fee_pct: Decimal,
    /// Look for a new opportunity on a symbol right after closing it
    #[serde(default = "default_reentry_enabled")]
    pub reentry_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Suppress ghost handling for symbols touched this recently
    #[serde(default = "default_grace_window")]
    pub grace_window_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds between control loop ticks
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
    /// Minimum seconds between two opportunity scans
    #[serde(default = "default_scan_min_interval")]
    pub min_interval_secs: u64,
    /// Seconds between PnL status logs
    #[serde(default = "default_pnl_log_interval")]
    pub pnl_log_interval_secs: u64,
    /// Symbols tradeable on both venues
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Minimum annualized net funding to consider a symbol
    #[serde(default = "default_min_apy")]
    pub min_apy: Decimal,
    /// Maximum cross-venue price spread at entry (fraction)
    #[serde(default = "default_max_spread")]
    pub max_spread_pct: Decimal,
    /// Produce farm trades instead of funding trades
    #[serde(default)]
    pub farm_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMarketConfig {
    pub symbol: String,
    pub x10_price: Decimal,
    pub lighter_price: Decimal,
    /// Hourly funding rate on X10
    pub x10_funding: Decimal,
    /// Hourly funding rate on Lighter
    pub lighter_funding: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting balance on each paper venue
    #[serde(default = "default_paper_balance")]
    pub balance_usd: Decimal,
    /// Minimum order notional on each paper venue
    #[serde(default = "default_paper_min_notional")]
    pub min_notional_usd: Decimal,
    #[serde(default = "default_paper_markets")]
    pub markets: Vec<PaperMarketConfig>,
}

// Default value functions
fn default_database_path() -> String {
    "data/hedge_guardian.db".to_string()
}

fn default_desired_notional() -> Decimal {
    Decimal::new(50, 0) // $50 per hedge
}

fn default_hard_min_notional() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_notional() -> Decimal {
    Decimal::new(60, 0) // desired + 20%
}

fn default_balance_buffer() -> Decimal {
    Decimal::new(105, 2) // 1.05
}

fn default_leverage() -> Decimal {
    Decimal::ONE
}

fn default_max_open_trades() -> usize {
    5
}

fn default_order_timeout() -> u64 {
    10
}

fn default_leg_b_max_attempts() -> u32 {
    2
}

fn default_leg_b_retry_delay() -> u64 {
    1000
}

fn default_rollback_timeout() -> u64 {
    5
}

fn default_rollback_max_attempts() -> u32 {
    2
}

fn default_rollback_retry_delay() -> u64 {
    500
}

fn default_leg_failure_cooldown() -> i64 {
    600 // 10 minutes
}

fn default_global_pause() -> i64 {
    30
}

fn default_ledger_failure_cooldown() -> i64 {
    3600
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_farm_max_hold() -> i64 {
    14400 // 4h
}

fn default_max_hold_hours() -> i64 {
    24
}

fn default_round_trip_fee() -> Decimal {
    // 0.0225% taker on X10, 0% on Lighter, entry + exit
    Decimal::new(45, 5) // 0.00045
}

fn default_reentry_enabled() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_grace_window() -> i64 {
    15
}

fn default_scan_interval() -> u64 {
    5
}

fn default_scan_min_interval() -> u64 {
    3
}

fn default_pnl_log_interval() -> u64 {
    60
}

fn default_symbols() -> Vec<String> {
    ["BTC-USD", "ETH-USD", "SOL-USD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_apy() -> Decimal {
    Decimal::new(5, 2) // 5% APY
}

fn default_max_spread() -> Decimal {
    Decimal::new(6, 3) // 0.6%
}

fn default_paper_balance() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_paper_min_notional() -> Decimal {
    Decimal::new(10, 0)
}

fn default_paper_markets() -> Vec<PaperMarketConfig> {
    vec![
        PaperMarketConfig {
            symbol: "BTC-USD".to_string(),
            x10_price: Decimal::new(65000, 0),
            lighter_price: Decimal::new(65010, 0),
            x10_funding: Decimal::new(1, 5),
            lighter_funding: Decimal::new(8, 5),
        },
        PaperMarketConfig {
            symbol: "ETH-USD".to_string(),
            x10_price: Decimal::new(3200, 0),
            lighter_price: Decimal::new(3201, 0),
            x10_funding: Decimal::new(6, 5),
            lighter_funding: Decimal::new(-2, 5),
        },
    ]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("HG"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let one = Decimal::ONE;

        anyhow::ensure!(
            self.sizing.hard_min_notional_usd > Decimal::ZERO
                && self.sizing.hard_min_notional_usd <= self.sizing.max_notional_usd,
            "hard_min_notional_usd must be positive and <= max_notional_usd"
        );

        anyhow::ensure!(
            self.sizing.balance_buffer >= one,
            "balance_buffer must be >= 1"
        );

        anyhow::ensure!(self.sizing.leverage >= one, "leverage must be >= 1");

        anyhow::ensure!(
            self.sizing.max_open_trades >= 1,
            "max_open_trades must be >= 1"
        );

        anyhow::ensure!(
            self.execution.leg_b_max_attempts >= 1 && self.execution.rollback_max_attempts >= 1,
            "retry attempts must be >= 1"
        );

        anyhow::ensure!(
            self.exit.stop_loss_pct > Decimal::ZERO && self.exit.stop_loss_pct < one,
            "stop_loss_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.exit.take_profit_pct > Decimal::ZERO && self.exit.take_profit_pct < one,
            "take_profit_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.reconciliation.grace_window_secs >= 0,
            "grace_window_secs must be >= 0"
        );

        anyhow::ensure!(
            self.scan.interval_secs > 0
                && self.scan.pnl_log_interval_secs > 0
                && self.reconciliation.interval_secs > 0,
            "loop intervals must be > 0"
        );

        Ok(())
    }
}

impl ExecutionConfig {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.rollback_timeout_secs)
    }
}

impl CooldownConfig {
    pub fn leg_failure(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.leg_failure_secs)
    }

    pub fn global_pause(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.global_pause_secs)
    }

    pub fn ledger_failure(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_failure_secs)
    }
}

impl ReconciliationConfig {
    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sizing: SizingConfig::default(),
            execution: ExecutionConfig::default(),
            cooldown: CooldownConfig::default(),
            exit: ExitConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            scan: ScanConfig::default(),
            paper: PaperConfig::default(),
            database_path: default_database_path(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            desired_notional_usd: default_desired_notional(),
            hard_min_notional_usd: default_hard_min_notional(),
            max_notional_usd: default_max_notional(),
            balance_buffer: default_balance_buffer(),
            leverage: default_leverage(),
            max_open_trades: default_max_open_trades(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_secs: default_order_timeout(),
            leg_b_max_attempts: default_leg_b_max_attempts(),
            leg_b_retry_delay_ms: default_leg_b_retry_delay(),
            rollback_timeout_secs: default_rollback_timeout(),
            rollback_max_attempts: default_rollback_max_attempts(),
            rollback_retry_delay_ms: default_rollback_retry_delay(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            leg_failure_secs: default_leg_failure_cooldown(),
            global_pause_secs: default_global_pause(),
            ledger_failure_secs: default_ledger_failure_cooldown(),
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            farm_max_hold_secs: default_farm_max_hold(),
            max_hold_hours: default_max_hold_hours(),
            round_trip_fee_pct: default_round_trip_fee(),
            reentry_enabled: default_reentry_enabled(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            grace_window_secs: default_grace_window(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            min_interval_secs: default_scan_min_interval(),
            pnl_log_interval_secs: default_pnl_log_interval(),
            symbols: default_symbols(),
            min_apy: default_min_apy(),
            max_spread_pct: default_max_spread(),
            farm_mode: false,
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            balance_usd: default_paper_balance(),
            min_notional_usd: default_paper_min_notional(),
            markets: default_paper_markets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cooldown.leg_failure(), chrono::Duration::seconds(600));
        assert_eq!(config.exit.stop_loss_pct, dec!(0.02));
    }

    #[test]
    fn test_inverted_sizing_bounds_rejected() {
        let mut config = Config::default();
        config.sizing.hard_min_notional_usd = dec!(100);
        config.sizing.max_notional_usd = dec!(50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.execution.leg_b_max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
