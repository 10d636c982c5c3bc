//! The pair of venues a hedge spans.

use super::traits::{Venue, VenueClient};
use std::sync::Arc;

/// Handles to both venue clients, addressed by [`Venue`].
#[derive(Clone)]
pub struct VenueSet {
    x10: Arc<dyn VenueClient>,
    lighter: Arc<dyn VenueClient>,
}

impl VenueSet {
    pub fn new(x10: Arc<dyn VenueClient>, lighter: Arc<dyn VenueClient>) -> Self {
        Self { x10, lighter }
    }

    pub fn get(&self, venue: Venue) -> &dyn VenueClient {
        match venue {
            Venue::X10 => self.x10.as_ref(),
            Venue::Lighter => self.lighter.as_ref(),
        }
    }

    pub fn all(&self) -> [&dyn VenueClient; 2] {
        [self.x10.as_ref(), self.lighter.as_ref()]
    }

    /// The venue that accepts resting orders, preferred for the first leg.
    pub fn maker_venue(&self) -> Venue {
        if self.lighter.supports_resting_orders() {
            Venue::Lighter
        } else {
            Venue::X10
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperVenue;
    use crate::utils::ManualClock;
    use rust_decimal_macros::dec;

    fn venues(lighter_resting: bool) -> VenueSet {
        let clock = Arc::new(ManualClock::starting_now());
        let x10 = PaperVenue::new(Venue::X10, dec!(1000), clock.clone());
        let lighter = PaperVenue::new(Venue::Lighter, dec!(1000), clock)
            .with_resting_orders(lighter_resting);
        VenueSet::new(Arc::new(x10), Arc::new(lighter))
    }

    #[test]
    fn test_maker_venue_prefers_lighter() {
        let set = venues(true);
        assert_eq!(set.maker_venue(), Venue::Lighter);
        assert_eq!(set.get(Venue::X10).venue(), Venue::X10);
        assert_eq!(set.all().map(|v| v.venue()), [Venue::X10, Venue::Lighter]);
    }

    #[test]
    fn test_maker_venue_falls_back_to_x10() {
        assert_eq!(venues(false).maker_venue(), Venue::X10);
    }
}
