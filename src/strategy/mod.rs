//! Hedge execution and reconciliation.
//!
//! Contains the core logic for:
//! - Opportunity scanning across both venues
//! - Two-leg open with rollback and two-leg close with alerting
//! - Exit trigger evaluation for open hedges
//! - Ledger vs. venue reconciliation
//! - The engine tying these together for the control loop

mod closer;
mod context;
mod engine;
mod error;
mod monitor;
mod opener;
pub mod pnl;
mod reconciler;
mod retry;
mod scanner;
#[cfg(test)]
mod testkit;

pub use closer::{CloseOutcome, HedgeCloser};
pub use context::HedgeContext;
pub use engine::{HedgeEngine, MonitorReport, ScanReport};
pub use error::HedgeError;
pub use monitor::{Evaluation, ExitTrigger, PositionMonitor};
pub use opener::{size_notional, HedgeOpener, OpenOutcome, OpenPhase};
pub use reconciler::{
    ReconciliationGuardian, ReconciliationReport, ReconciliationView, GHOST_CLEANUP_REASON,
};
pub use retry::RetryPolicy;
pub use scanner::{FundingSpreadScanner, LegPlan, Opportunity, OpportunityFeed};
