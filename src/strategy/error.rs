//! Precondition rejections raised before any venue order is sent.

use crate::exchange::Venue;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HedgeError {
    #[error("{symbol} is blacklisted for another {remaining_secs}s")]
    Blacklisted { symbol: String, remaining_secs: i64 },

    #[error("global entry pause is active")]
    GlobalPause,

    #[error("open trade cap reached ({open}/{cap})")]
    CapReached { open: usize, cap: usize },

    #[error("{symbol} already has an active hedge")]
    AlreadyActive { symbol: String },

    #[error("{symbol} is being handled by another coordinator")]
    SymbolBusy { symbol: String },

    #[error("legs must be on different venues with opposite sides")]
    InvalidLegs,

    #[error("insufficient balance on {venue}: available {available}, required {required}")]
    InsufficientBalance {
        venue: Venue,
        available: Decimal,
        required: Decimal,
    },

    #[error("cannot size {symbol}: venue minimum {venue_min} exceeds maximum {max}")]
    SizingOutOfBounds {
        symbol: String,
        venue_min: Decimal,
        max: Decimal,
    },

    #[error("missing {what} for {symbol} on {venue}")]
    MissingMarketData {
        symbol: String,
        venue: Venue,
        what: &'static str,
    },

    #[error("precondition check failed: {0}")]
    Unavailable(String),
}
