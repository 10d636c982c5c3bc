//! Hedge trade ledger model.
//!
//! A [`HedgeTrade`] is the unit of state: one delta-neutral pair of legs
//! on two venues for one symbol. The [`Ledger`] trait is the persistence
//! seam; see [`crate::persistence::SqliteLedger`] for the SQLite store.
//!
//! Invariants upheld by every implementation:
//! - at most one non-CLOSED trade per symbol
//! - CLOSED trades are immutable and live only in the history record

use crate::exchange::{Side, Venue};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a hedge trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    Opening,
    Open,
    Closing,
    Closed,
    Aborted,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Opening => "OPENING",
            TradeStatus::Open => "OPEN",
            TradeStatus::Closing => "CLOSING",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPENING" => Some(TradeStatus::Opening),
            "OPEN" => Some(TradeStatus::Open),
            "CLOSING" => Some(TradeStatus::Closing),
            "CLOSED" => Some(TradeStatus::Closed),
            "ABORTED" => Some(TradeStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a hedge, held on one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeLeg {
    pub venue: Venue,
    pub side: Side,
    pub filled_notional_usd: Decimal,
    pub entry_price: Decimal,
    pub order_ref: Option<String>,
}

/// A two-leg funding hedge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeTrade {
    pub symbol: String,
    pub status: TradeStatus,
    pub leg_a: HedgeLeg,
    pub leg_b: HedgeLeg,
    pub notional_usd: Decimal,
    /// Cross-venue price spread at entry, as a fraction
    pub entry_spread_pct: Decimal,
    /// Net funding earned per hour at entry, as a fraction of notional
    pub entry_net_rate_hourly: Decimal,
    pub created_at: DateTime<Utc>,
    pub funding_collected: Decimal,
    pub close_reason: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_farm_trade: bool,
}

impl HedgeTrade {
    /// Legs are on opposite sides.
    pub fn is_delta_neutral(&self) -> bool {
        self.leg_a.side == self.leg_b.side.opposite()
    }

    pub fn long_leg(&self) -> &HedgeLeg {
        if self.leg_a.side == Side::Long {
            &self.leg_a
        } else {
            &self.leg_b
        }
    }

    pub fn short_leg(&self) -> &HedgeLeg {
        if self.leg_a.side == Side::Short {
            &self.leg_a
        } else {
            &self.leg_b
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Still blocks new activity on its symbol.
    pub fn is_active(&self) -> bool {
        self.status != TradeStatus::Closed
    }
}

/// Partial update of an active trade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeUpdate {
    pub status: Option<TradeStatus>,
    pub funding_collected: Option<Decimal>,
    pub close_reason: Option<String>,
}

impl TradeUpdate {
    pub fn status(status: TradeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn funding(funding_collected: Decimal) -> Self {
        Self {
            funding_collected: Some(funding_collected),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = Some(reason.into());
        self
    }
}

/// Persistent store of active hedge trades and their closed history.
///
/// Write failures must surface as errors; callers decide how to degrade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Persist a new active trade. Fails if the symbol is already active.
    async fn create_open(&self, trade: &HedgeTrade) -> Result<()>;

    async fn update(&self, symbol: &str, fields: TradeUpdate) -> Result<()>;

    /// Mark the trade CLOSED and move it to history.
    async fn close(&self, symbol: &str, reason: &str, pnl: Decimal) -> Result<()>;

    /// All trades whose status is not CLOSED.
    async fn get_open_trades(&self) -> Result<Vec<HedgeTrade>>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    /// ETH hedge: long X10, short Lighter, $100 notional.
    pub fn sample_trade(symbol: &str, created_at: DateTime<Utc>) -> HedgeTrade {
        HedgeTrade {
            symbol: symbol.to_string(),
            status: TradeStatus::Open,
            leg_a: HedgeLeg {
                venue: Venue::X10,
                side: Side::Long,
                filled_notional_usd: dec!(100),
                entry_price: dec!(2000),
                order_ref: Some("X10-1".to_string()),
            },
            leg_b: HedgeLeg {
                venue: Venue::Lighter,
                side: Side::Short,
                filled_notional_usd: dec!(100),
                entry_price: dec!(2000),
                order_ref: Some("LIT-1".to_string()),
            },
            notional_usd: dec!(100),
            entry_spread_pct: Decimal::ZERO,
            entry_net_rate_hourly: dec!(0.0001),
            created_at,
            funding_collected: Decimal::ZERO,
            close_reason: None,
            realized_pnl: None,
            closed_at: None,
            is_farm_trade: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_trade;
    use super::*;

    #[test]
    fn test_leg_accessors() {
        let trade = sample_trade("ETH-USD", Utc::now());
        assert!(trade.is_delta_neutral());
        assert_eq!(trade.long_leg().venue, Venue::X10);
        assert_eq!(trade.short_leg().venue, Venue::Lighter);
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            TradeStatus::Opening,
            TradeStatus::Open,
            TradeStatus::Closing,
            TradeStatus::Closed,
            TradeStatus::Aborted,
        ] {
            assert_eq!(TradeStatus::parse(status.as_str()), Some(status));
        }
    }
}
