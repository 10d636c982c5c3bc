//! Cross-venue funding spread scanner.
//!
//! Produces ranked [`Opportunity`] values for the open coordinator:
//! long on the venue paying the lower hourly rate, short on the higher.

use crate::config::ScanConfig;
use crate::exchange::{Side, Venue, VenueSet};
use crate::strategy::pnl::{hourly_to_apy, net_funding_hourly};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info, instrument, trace};

/// Venue and direction of one planned leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegPlan {
    pub venue: Venue,
    pub side: Side,
}

/// A ranked candidate hedge.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub symbol: String,
    /// Submitted first, maker-preferred where the venue rests orders
    pub leg_a: LegPlan,
    /// Submitted second as taker, retried
    pub leg_b: LegPlan,
    pub target_notional: Decimal,
    /// Ranking score (annualized net funding)
    pub score: Decimal,
    pub net_rate_hourly: Decimal,
    /// Cross-venue mark price spread as a fraction
    pub spread_pct: Decimal,
    pub is_farm: bool,
}

/// Source of ranked opportunities.
#[async_trait]
pub trait OpportunityFeed: Send + Sync {
    /// Best first. Symbols in `exclude` are never returned.
    async fn rank_opportunities(&self, exclude: &HashSet<String>) -> Result<Vec<Opportunity>>;
}

#[derive(Debug, Clone, Copy)]
enum RejectReason {
    MissingData,
    WideSpread,
    LowFunding,
}

/// Scans configured symbols on both venues.
pub struct FundingSpreadScanner {
    venues: VenueSet,
    config: ScanConfig,
    target_notional: Decimal,
}

impl FundingSpreadScanner {
    pub fn new(venues: VenueSet, config: ScanConfig, target_notional: Decimal) -> Self {
        Self {
            venues,
            config,
            target_notional,
        }
    }

    async fn qualify(&self, symbol: &str) -> Result<Opportunity, RejectReason> {
        let x10 = self.venues.get(Venue::X10);
        let lighter = self.venues.get(Venue::Lighter);

        let read = |r: Result<Option<Decimal>>| r.ok().flatten().ok_or(RejectReason::MissingData);
        let x10_rate = read(x10.get_funding_rate(symbol).await)?;
        let lighter_rate = read(lighter.get_funding_rate(symbol).await)?;
        let x10_price = read(x10.get_mark_price(symbol).await)?;
        let lighter_price = read(lighter.get_mark_price(symbol).await)?;

        let low_price = x10_price.min(lighter_price);
        if low_price <= Decimal::ZERO {
            return Err(RejectReason::MissingData);
        }
        let spread_pct = (x10_price - lighter_price).abs() / low_price;
        if spread_pct > self.config.max_spread_pct {
            trace!(%symbol, %spread_pct, "Spread above threshold");
            return Err(RejectReason::WideSpread);
        }

        let (long_venue, long_rate, short_rate) = if x10_rate <= lighter_rate {
            (Venue::X10, x10_rate, lighter_rate)
        } else {
            (Venue::Lighter, lighter_rate, x10_rate)
        };
        let net_rate_hourly = net_funding_hourly(long_rate, short_rate);
        let apy = hourly_to_apy(net_rate_hourly);

        // Farm trades chase volume, not funding
        if !self.config.farm_mode && apy < self.config.min_apy {
            trace!(%symbol, %apy, "Net funding below threshold");
            return Err(RejectReason::LowFunding);
        }

        let plan = |venue: Venue| LegPlan {
            venue,
            side: if venue == long_venue {
                Side::Long
            } else {
                Side::Short
            },
        };
        let maker = self.venues.maker_venue();
        let taker = if maker == Venue::X10 {
            Venue::Lighter
        } else {
            Venue::X10
        };

        Ok(Opportunity {
            symbol: symbol.to_string(),
            leg_a: plan(maker),
            leg_b: plan(taker),
            target_notional: self.target_notional,
            score: apy,
            net_rate_hourly,
            spread_pct,
            is_farm: self.config.farm_mode,
        })
    }
}

#[async_trait]
impl OpportunityFeed for FundingSpreadScanner {
    #[instrument(skip(self, exclude), fields(excluded = exclude.len()))]
    async fn rank_opportunities(&self, exclude: &HashSet<String>) -> Result<Vec<Opportunity>> {
        let mut rejected_missing_data = 0usize;
        let mut rejected_wide_spread = 0usize;
        let mut rejected_low_funding = 0usize;

        let mut ranked = Vec::new();
        for symbol in self.config.symbols.iter().filter(|s| !exclude.contains(*s)) {
            match self.qualify(symbol).await {
                Ok(opp) => ranked.push(opp),
                Err(reason) => match reason {
                    RejectReason::MissingData => rejected_missing_data += 1,
                    RejectReason::WideSpread => rejected_wide_spread += 1,
                    RejectReason::LowFunding => rejected_low_funding += 1,
                },
            }
        }

        ranked.sort_by(|a, b| b.score.cmp(&a.score));

        if ranked.is_empty() {
            debug!(
                rejected_missing_data,
                rejected_wide_spread, rejected_low_funding, "No opportunities"
            );
        } else {
            info!(
                qualified = ranked.len(),
                best = %ranked[0].symbol,
                best_apy = %ranked[0].score,
                rejected_missing_data,
                rejected_wide_spread,
                rejected_low_funding,
                "Opportunity scan complete"
            );
        }

        Ok(ranked)
    }
}
