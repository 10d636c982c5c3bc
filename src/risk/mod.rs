//! Risk state for hedge execution.
//!
//! - Symbol blacklist with cooldowns and the global entry pause
//! - Per-symbol claims and recent order submissions
//! - Critical alerting for asymmetric and ledger failures

mod alert;
mod cooldown;

pub use alert::{AlertBook, AlertSeverity, HedgeAlert, HedgeAlertKind};
pub use cooldown::{CooldownStore, SymbolClaim};
