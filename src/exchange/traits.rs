//! Venue-agnostic trading interface.
//!
//! Both perpetuals venues expose the same capability set to the hedge
//! coordinators:
//! - Mark price and hourly funding reads
//! - Available balance and open position snapshots
//! - Mutating open/close order submission
//!
//! Coordinators are generic over [`VenueClient`] and never depend on a
//! concrete venue. Implementations are responsible for serializing their
//! own mutating calls (at most one in flight per venue).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue identifier for the two hedge legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    X10,
    Lighter,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::X10 => write!(f, "X10"),
            Venue::Lighter => write!(f, "Lighter"),
        }
    }
}

impl Venue {
    /// Short code for display (2-3 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::X10 => "X10",
            Venue::Lighter => "LIT",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "X10" => Some(Venue::X10),
            "Lighter" => Some(Venue::Lighter),
            _ => None,
        }
    }
}

/// Position direction of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The direction that flattens a position of this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Side of a signed position size (positive = long).
    pub fn from_signed_size(size: Decimal) -> Option<Side> {
        if size > Decimal::ZERO {
            Some(Side::Long)
        } else if size < Decimal::ZERO {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Side::Long),
            "SHORT" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order submission flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderOptions {
    /// Only reduce an existing position, never open or flip one
    pub reduce_only: bool,
    /// Rest on the book as maker where the venue supports it
    pub maker_preferred: bool,
}

impl OrderOptions {
    pub fn taker() -> Self {
        Self::default()
    }

    pub fn maker() -> Self {
        Self {
            reduce_only: false,
            maker_preferred: true,
        }
    }

    pub fn reduce_only() -> Self {
        Self {
            reduce_only: true,
            maker_preferred: false,
        }
    }
}

/// Venue acknowledgement for a mutating call.
///
/// `ok == false` is a rejection (distinct from a transport error) and is
/// treated the same way by the coordinators: the leg did not fill.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub ok: bool,
    pub order_ref: Option<String>,
    /// Average fill price, when the venue reports one
    pub fill_price: Option<Decimal>,
}

impl OrderAck {
    pub fn filled(order_ref: impl Into<String>, fill_price: Option<Decimal>) -> Self {
        Self {
            ok: true,
            order_ref: Some(order_ref.into()),
            fill_price,
        }
    }

    pub fn rejected() -> Self {
        Self {
            ok: false,
            order_ref: None,
            fill_price: None,
        }
    }
}

/// A live position as reported by a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    pub symbol: String,
    /// Base-asset size, positive for long and negative for short
    pub signed_size: Decimal,
    /// When the venue first reported the position, if known
    pub opened_at: Option<DateTime<Utc>>,
}

impl VenuePosition {
    pub fn is_flat(&self) -> bool {
        self.signed_size.is_zero()
    }
}

/// Capability interface of one perpetuals venue.
///
/// All calls may fail or hang; `None`/`ok == false` results mean
/// "cannot proceed now" just like errors do.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Whether the venue accepts resting (maker) orders.
    fn supports_resting_orders(&self) -> bool;

    /// Venue-enforced minimum order notional for a symbol, in USD.
    async fn min_notional_usd(&self, symbol: &str) -> anyhow::Result<Decimal>;

    async fn get_mark_price(&self, symbol: &str) -> anyhow::Result<Option<Decimal>>;

    /// Funding rate normalized to one hour.
    async fn get_funding_rate(&self, symbol: &str) -> anyhow::Result<Option<Decimal>>;

    async fn get_available_balance(&self) -> anyhow::Result<Decimal>;

    /// Non-flat positions only.
    async fn get_open_positions(&self) -> anyhow::Result<Vec<VenuePosition>>;

    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        notional_usd: Decimal,
        opts: OrderOptions,
    ) -> anyhow::Result<OrderAck>;

    /// Submit a reduce-only order of `side` for `notional_usd`.
    ///
    /// `side` is the order direction, i.e. the opposite of the position
    /// being closed.
    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        notional_usd: Decimal,
    ) -> anyhow::Result<OrderAck>;
}
