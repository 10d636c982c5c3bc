//! Exit-condition evaluation for open hedges.

use crate::config::ExitConfig;
use crate::exchange::{Venue, VenueSet};
use crate::ledger::HedgeTrade;
use crate::strategy::pnl::{self, MarketSnapshot, PnlBreakdown};
use chrono::{DateTime, Duration, Utc};
use tracing::trace;

/// Why a hedge should be closed. Variants are listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    FarmMaxDuration,
    StopLoss,
    TakeProfit,
    MaxHoldExpired,
}

impl ExitTrigger {
    /// Close reason recorded in the ledger.
    pub fn reason(&self) -> &'static str {
        match self {
            ExitTrigger::FarmMaxDuration => "Farm Max Duration",
            ExitTrigger::StopLoss => "Stop Loss",
            ExitTrigger::TakeProfit => "Take Profit",
            ExitTrigger::MaxHoldExpired => "Max Hold Expired",
        }
    }
}

/// Result of evaluating one open hedge.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub pnl: PnlBreakdown,
    pub trigger: Option<ExitTrigger>,
}

/// Evaluates exit triggers for open hedges.
pub struct PositionMonitor {
    config: ExitConfig,
}

impl PositionMonitor {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    /// Read marks and funding for the trade's symbol on both venues.
    ///
    /// Returns `None` when either mark price is unavailable.
    pub async fn snapshot(&self, venues: &VenueSet, symbol: &str) -> Option<MarketSnapshot> {
        let x10 = venues.get(Venue::X10);
        let lighter = venues.get(Venue::Lighter);

        let x10_price = x10.get_mark_price(symbol).await.ok().flatten()?;
        let lighter_price = lighter.get_mark_price(symbol).await.ok().flatten()?;

        Some(MarketSnapshot {
            x10_price,
            lighter_price,
            x10_funding_hourly: x10.get_funding_rate(symbol).await.ok().flatten(),
            lighter_funding_hourly: lighter.get_funding_rate(symbol).await.ok().flatten(),
        })
    }

    /// Mark-to-market PnL and the first matching exit trigger.
    pub fn evaluate(
        &self,
        trade: &HedgeTrade,
        market: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let pnl = pnl::estimate(trade, market, now, self.config.round_trip_fee_pct);
        let age = trade.age(now);
        let notional = trade.notional_usd;

        let trigger = if trade.is_farm_trade
            && age > Duration::seconds(self.config.farm_max_hold_secs)
        {
            Some(ExitTrigger::FarmMaxDuration)
        } else if pnl.net < -(notional * self.config.stop_loss_pct) {
            Some(ExitTrigger::StopLoss)
        } else if pnl.net > notional * self.config.take_profit_pct {
            Some(ExitTrigger::TakeProfit)
        } else if self.config.max_hold_hours > 0
            && age > Duration::hours(self.config.max_hold_hours)
        {
            Some(ExitTrigger::MaxHoldExpired)
        } else {
            None
        };

        trace!(
            symbol = %trade.symbol,
            net = %pnl.net,
            funding = %pnl.funding_pnl,
            age_secs = age.num_seconds(),
            trigger = ?trigger,
            "Hedge evaluated"
        );

        Evaluation { pnl, trigger }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::sample_trade;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn market(x10: Decimal, lighter: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            x10_price: x10,
            lighter_price: lighter,
            x10_funding_hourly: Some(Decimal::ZERO),
            lighter_funding_hourly: Some(Decimal::ZERO),
        }
    }

    fn monitor() -> PositionMonitor {
        PositionMonitor::new(ExitConfig::default())
    }

    #[test]
    fn test_quiet_market_no_trigger() {
        let trade = sample_trade("ETH-USD", Utc::now());
        let eval = monitor().evaluate(&trade, &market(dec!(2000), dec!(2000)), trade.created_at);
        assert_eq!(eval.trigger, None);
    }

    #[test]
    fn test_stop_loss_and_take_profit() {
        let trade = sample_trade("ETH-USD", Utc::now());
        let now = trade.created_at + Duration::minutes(5);

        // Long X10 leg down 3%: -3 < -2
        let eval = monitor().evaluate(&trade, &market(dec!(1940), dec!(2000)), now);
        assert_eq!(eval.trigger, Some(ExitTrigger::StopLoss));

        // Short Lighter leg up 6% in our favour: +6 > +5
        let eval = monitor().evaluate(&trade, &market(dec!(2000), dec!(1880)), now);
        assert_eq!(eval.trigger, Some(ExitTrigger::TakeProfit));
    }

    #[test]
    fn test_farm_duration_wins_over_stop_loss() {
        let mut trade = sample_trade("SOL-USD", Utc::now());
        trade.is_farm_trade = true;
        let now = trade.created_at + Duration::seconds(14401);

        let eval = monitor().evaluate(&trade, &market(dec!(1900), dec!(2000)), now);
        assert_eq!(eval.trigger, Some(ExitTrigger::FarmMaxDuration));
        assert_eq!(eval.trigger.map(|t| t.reason()), Some("Farm Max Duration"));
    }

    #[test]
    fn test_max_hold_is_lowest_priority() {
        let trade = sample_trade("BTC-USD", Utc::now());
        let now = trade.created_at + Duration::hours(25);

        let eval = monitor().evaluate(&trade, &market(dec!(2000), dec!(2000)), now);
        assert_eq!(eval.trigger, Some(ExitTrigger::MaxHoldExpired));

        let mut config = ExitConfig::default();
        config.max_hold_hours = 0;
        let eval = PositionMonitor::new(config).evaluate(&trade, &market(dec!(2000), dec!(2000)), now);
        assert_eq!(eval.trigger, None);
    }
}
