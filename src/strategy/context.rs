use crate::exchange::VenueSet;
use crate::ledger::Ledger;
use crate::risk::{AlertBook, CooldownStore};
use std::sync::Arc;

/// Collaborators shared by the coordinators and the reconciliation guardian.
#[derive(Clone)]
pub struct HedgeContext {
    pub venues: VenueSet,
    pub ledger: Arc<dyn Ledger>,
    pub cooldowns: Arc<CooldownStore>,
    pub alerts: Arc<AlertBook>,
}

impl HedgeContext {
    pub fn new(
        venues: VenueSet,
        ledger: Arc<dyn Ledger>,
        cooldowns: Arc<CooldownStore>,
        alerts: Arc<AlertBook>,
    ) -> Self {
        Self {
            venues,
            ledger,
            cooldowns,
            alerts,
        }
    }
}
