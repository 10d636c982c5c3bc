//! Venue integrations for the two hedge legs.
//!
//! - [`VenueClient`]: capability interface shared by X10 and Lighter
//! - [`VenueSet`]: both clients, addressed by [`Venue`]
//! - [`PaperVenue`]: in-process simulated venue for paper runs and tests

pub mod paper;
mod traits;
mod venue_set;

pub use paper::{OrderKind, OrderRecord, PaperVenue, ScriptedFault};
pub use traits::*;
pub use venue_set::VenueSet;
