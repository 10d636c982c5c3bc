//! Critical hedge alerts.
//!
//! Asymmetric failures and ledger failures are never dropped silently:
//! they produce a [`HedgeAlert`] emitted as a structured JSON log line
//! under the `hedge_alert` target and kept in an [`AlertBook`] until
//! acknowledged.

use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

const MAX_RETAINED_ALERTS: usize = 100;

/// What went wrong.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum HedgeAlertKind {
    /// Leg B failed and the compensating close of leg A failed too
    RollbackFailed,
    /// Both legs filled but the ledger write failed
    LedgerWriteFailed,
    /// Leg B closed, leg A still open
    AsymmetricClose,
    /// Both legs closed but the archive write failed
    ArchiveFailed,
    /// A stray venue position could not be force-closed
    ZombieCloseFailed,
    /// An open hedge has one leg missing on its venue
    LegMissing,
}

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

/// A human-facing hedge alert.
#[derive(Debug, Clone, Serialize)]
pub struct HedgeAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: HedgeAlertKind,
    pub severity: AlertSeverity,
    pub symbol: String,
    pub message: String,
    pub requires_manual_intervention: bool,
}

impl HedgeAlert {
    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Warning => warn!(target: "hedge_alert", "HEDGE_ALERT: {}", json),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(target: "hedge_alert", "HEDGE_ALERT: {}", json)
            }
        }
    }
}

/// Retains recently raised alerts for inspection and status output.
pub struct AlertBook {
    clock: Arc<dyn Clock>,
    alerts: Mutex<VecDeque<HedgeAlert>>,
    sequence: AtomicU64,
}

impl AlertBook {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            alerts: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Build, emit and retain an alert.
    pub fn raise(
        &self,
        kind: HedgeAlertKind,
        severity: AlertSeverity,
        symbol: &str,
        message: impl Into<String>,
    ) -> HedgeAlert {
        let timestamp = self.clock.now();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let alert = HedgeAlert {
            alert_id: format!("hedge-{}-{}", timestamp.timestamp(), seq),
            timestamp,
            kind,
            severity,
            symbol: symbol.to_string(),
            message: message.into(),
            requires_manual_intervention: severity == AlertSeverity::Critical,
        };
        alert.emit();

        let mut alerts = self.alerts.lock();
        alerts.push_back(alert.clone());
        while alerts.len() > MAX_RETAINED_ALERTS {
            alerts.pop_front();
        }
        alert
    }

    pub fn active(&self) -> Vec<HedgeAlert> {
        self.alerts.lock().iter().cloned().collect()
    }

    pub fn for_symbol(&self, symbol: &str) -> Vec<HedgeAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Whether an unacknowledged alert of `kind` exists for `symbol`.
    pub fn is_active(&self, symbol: &str, kind: HedgeAlertKind) -> bool {
        self.alerts
            .lock()
            .iter()
            .any(|a| a.symbol == symbol && a.kind == kind)
    }

    pub fn has_critical(&self) -> bool {
        self.alerts
            .lock()
            .iter()
            .any(|a| a.severity == AlertSeverity::Critical)
    }

    /// Clear alerts for a symbol once it has been resolved by hand.
    pub fn acknowledge(&self, symbol: &str) {
        self.alerts.lock().retain(|a| a.symbol != symbol);
    }
}
