//! Shared fixtures for coordinator tests: two paper venues, an in-memory
//! ledger and a manual clock.

use crate::config::Config;
use crate::exchange::{PaperVenue, Side, Venue, VenueSet};
use crate::ledger::Ledger;
use crate::persistence::SqliteLedger;
use crate::risk::{AlertBook, CooldownStore};
use crate::strategy::context::HedgeContext;
use crate::strategy::scanner::{LegPlan, Opportunity};
use crate::utils::ManualClock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub x10: Arc<PaperVenue>,
    pub lighter: Arc<PaperVenue>,
    pub ledger: Arc<SqliteLedger>,
    pub cooldowns: Arc<CooldownStore>,
    pub alerts: Arc<AlertBook>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let x10 = Arc::new(PaperVenue::new(Venue::X10, dec!(1000), clock.clone()));
        let lighter = Arc::new(PaperVenue::new(Venue::Lighter, dec!(1000), clock.clone()));
        for venue in [&x10, &lighter] {
            venue.set_market("BTC-USD", dec!(50000), dec!(0.00001));
            venue.set_market("ETH-USD", dec!(2000), dec!(0.00001));
            venue.set_market("SOL-USD", dec!(100), dec!(0.00001));
            venue.set_market("XRP-USD", dec!(0.5), dec!(0.00001));
        }
        let ledger = Arc::new(
            SqliteLedger::with_clock(":memory:", clock.clone()).expect("in-memory ledger"),
        );
        let cooldowns = Arc::new(CooldownStore::new(clock.clone()));

        Self {
            clock: clock.clone(),
            x10,
            lighter,
            ledger,
            cooldowns,
            alerts: Arc::new(AlertBook::new(clock.clone())),
            config: test_config(),
        }
    }

    pub fn venues(&self) -> VenueSet {
        VenueSet::new(self.x10.clone(), self.lighter.clone())
    }

    pub fn context(&self) -> HedgeContext {
        self.context_with_ledger(self.ledger.clone())
    }

    pub fn context_with_ledger(&self, ledger: Arc<dyn Ledger>) -> HedgeContext {
        HedgeContext::new(
            self.venues(),
            ledger,
            self.cooldowns.clone(),
            self.alerts.clone(),
        )
    }
}

/// Defaults with no retry sleeps and short timeouts.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.execution.leg_b_retry_delay_ms = 0;
    config.execution.rollback_retry_delay_ms = 0;
    config.execution.order_timeout_secs = 1;
    config.execution.rollback_timeout_secs = 1;
    config.sizing.max_notional_usd = dec!(200);
    config
}

/// Long X10 / short Lighter for `notional`.
pub fn long_x10_short_lighter(symbol: &str, notional: Decimal) -> Opportunity {
    Opportunity {
        symbol: symbol.to_string(),
        leg_a: LegPlan {
            venue: Venue::X10,
            side: Side::Long,
        },
        leg_b: LegPlan {
            venue: Venue::Lighter,
            side: Side::Short,
        },
        target_notional: notional,
        score: dec!(0.5),
        net_rate_hourly: dec!(0.0001),
        spread_pct: Decimal::ZERO,
        is_farm: false,
    }
}
