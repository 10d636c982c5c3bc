//! Mark-to-market PnL model for an open hedge.
//!
//! - Net funding per hour is the rate received on the short venue minus
//!   the rate paid on the long venue
//! - Price PnL is taken per leg relative to its own entry price
//! - Fees are a flat round-trip estimate on the trade notional

use crate::exchange::{Side, Venue};
use crate::ledger::{HedgeLeg, HedgeTrade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const SECONDS_PER_HOUR: i64 = 3600;
const HOURS_PER_YEAR: i64 = 24 * 365;

/// Current prices and hourly funding for both venues of one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    pub x10_price: Decimal,
    pub lighter_price: Decimal,
    pub x10_funding_hourly: Option<Decimal>,
    pub lighter_funding_hourly: Option<Decimal>,
}

impl MarketSnapshot {
    pub fn price(&self, venue: Venue) -> Decimal {
        match venue {
            Venue::X10 => self.x10_price,
            Venue::Lighter => self.lighter_price,
        }
    }

    pub fn funding(&self, venue: Venue) -> Option<Decimal> {
        match venue {
            Venue::X10 => self.x10_funding_hourly,
            Venue::Lighter => self.lighter_funding_hourly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PnlBreakdown {
    pub price_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
}

/// Net hourly funding earned by a long/short pair.
pub fn net_funding_hourly(long_rate: Decimal, short_rate: Decimal) -> Decimal {
    short_rate - long_rate
}

/// Annualize an hourly rate.
pub fn hourly_to_apy(rate_hourly: Decimal) -> Decimal {
    rate_hourly * Decimal::from(HOURS_PER_YEAR)
}

/// Fractional hours between `from` and `to`, never negative.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let secs = (to - from).num_seconds().max(0);
    Decimal::from(secs) / Decimal::from(SECONDS_PER_HOUR)
}

/// PnL of one leg moving from its entry price to `price`.
pub fn leg_price_pnl(leg: &HedgeLeg, price: Decimal) -> Decimal {
    if leg.entry_price.is_zero() {
        return Decimal::ZERO;
    }
    let change = (price - leg.entry_price) / leg.entry_price;
    match leg.side {
        Side::Long => change * leg.filled_notional_usd,
        Side::Short => -change * leg.filled_notional_usd,
    }
}

pub fn round_trip_fee(notional: Decimal, fee_pct: Decimal) -> Decimal {
    notional * fee_pct
}

/// Funding accrued since entry at the current net rate.
///
/// Falls back to the entry net rate when either venue has no rate.
pub fn accrued_funding(trade: &HedgeTrade, market: &MarketSnapshot, now: DateTime<Utc>) -> Decimal {
    let long = trade.long_leg();
    let short = trade.short_leg();
    let rate = match (market.funding(long.venue), market.funding(short.venue)) {
        (Some(long_rate), Some(short_rate)) => net_funding_hourly(long_rate, short_rate),
        _ => trade.entry_net_rate_hourly,
    };
    rate * hours_between(trade.created_at, now) * trade.notional_usd
}

/// Mark-to-market estimate of a hedge.
pub fn estimate(
    trade: &HedgeTrade,
    market: &MarketSnapshot,
    now: DateTime<Utc>,
    fee_pct: Decimal,
) -> PnlBreakdown {
    let price_pnl = leg_price_pnl(&trade.leg_a, market.price(trade.leg_a.venue))
        + leg_price_pnl(&trade.leg_b, market.price(trade.leg_b.venue));
    let funding_pnl = accrued_funding(trade, market, now);
    let fees = round_trip_fee(trade.notional_usd, fee_pct);

    PnlBreakdown {
        price_pnl,
        funding_pnl,
        fees,
        net: price_pnl + funding_pnl - fees,
    }
}

/// Realized PnL from exit fill prices plus the funding already booked.
pub fn realized(
    trade: &HedgeTrade,
    exit_a: Decimal,
    exit_b: Decimal,
    fee_pct: Decimal,
) -> Decimal {
    leg_price_pnl(&trade.leg_a, exit_a) + leg_price_pnl(&trade.leg_b, exit_b)
        + trade.funding_collected
        - round_trip_fee(trade.notional_usd, fee_pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::sample_trade;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn flat_market(price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            x10_price: price,
            lighter_price: price,
            x10_funding_hourly: Some(dec!(0.00001)),
            lighter_funding_hourly: Some(dec!(0.00011)),
        }
    }

    #[test]
    fn test_hedged_price_moves_cancel() {
        let trade = sample_trade("ETH-USD", Utc::now());
        let pnl = estimate(&trade, &flat_market(dec!(2100)), trade.created_at, Decimal::ZERO);
        assert_eq!(pnl.price_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_funding_accrues_at_net_rate() {
        // long X10 pays 0.001%, short Lighter receives 0.011%: net 0.01%/h
        let trade = sample_trade("ETH-USD", Utc::now());
        let now = trade.created_at + Duration::hours(10);
        let pnl = estimate(&trade, &flat_market(dec!(2000)), now, dec!(0.00045));

        assert_eq!(pnl.funding_pnl, dec!(0.1));
        assert_eq!(pnl.fees, dec!(0.045));
        assert_eq!(pnl.net, dec!(0.055));
    }

    #[test]
    fn test_missing_rate_uses_entry_rate() {
        let trade = sample_trade("ETH-USD", Utc::now());
        let mut market = flat_market(dec!(2000));
        market.lighter_funding_hourly = None;
        let now = trade.created_at + Duration::hours(2);
        assert_eq!(accrued_funding(&trade, &market, now), dec!(0.02));
    }

    #[test]
    fn test_one_sided_move_shows_in_price_pnl() {
        let trade = sample_trade("ETH-USD", Utc::now());
        let market = MarketSnapshot {
            x10_price: dec!(1900),
            lighter_price: dec!(2000),
            x10_funding_hourly: None,
            lighter_funding_hourly: None,
        };
        let pnl = estimate(&trade, &market, trade.created_at, Decimal::ZERO);
        assert_eq!(pnl.price_pnl, dec!(-5));
    }

    #[test]
    fn test_apy_annualization() {
        assert_eq!(hourly_to_apy(dec!(0.0001)), dec!(0.876));
        assert_eq!(net_funding_hourly(dec!(0.0001), dec!(0.0003)), dec!(0.0002));
    }
}
