//! Reconciliation guardian.
//!
//! Compares the ledger's active symbols with the union of live positions
//! on both venues:
//! - on a venue but not in the ledger: force-close the stray position
//! - in the ledger but on no venue: archive the trade with zero PnL
//! - in the ledger with one leg missing on its venue: raise a critical alert
//!
//! Symbols touched within the grace window, and symbols currently claimed
//! by a coordinator, are left alone for this pass.

use crate::config::{Config, ExecutionConfig, ReconciliationConfig};
use crate::exchange::{Side, Venue, VenuePosition};
use crate::ledger::{HedgeTrade, TradeStatus};
use crate::risk::{AlertSeverity, HedgeAlertKind};
use crate::strategy::context::HedgeContext;
use crate::strategy::retry::RetryPolicy;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, instrument, warn};

pub const GHOST_CLEANUP_REASON: &str = "GHOST_CLEANUP";

/// Ghost sets found by one pass, excluding suppressed symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationView {
    pub ghost_on_exchange: BTreeSet<String>,
    pub ghost_in_ledger: BTreeSet<String>,
}

impl ReconciliationView {
    pub fn is_clean(&self) -> bool {
        self.ghost_on_exchange.is_empty() && self.ghost_in_ledger.is_empty()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub view: ReconciliationView,
    /// Candidates skipped because of the grace window or a claim
    pub suppressed: BTreeSet<String>,
    /// Stray venue positions that were closed
    pub zombies_closed: Vec<(String, Venue)>,
    /// Ledger trades archived as ghosts
    pub ghosts_archived: Vec<String>,
    /// Open trades whose leg on the given venue has no position
    pub one_legged: Vec<(String, Venue)>,
    /// Cleanup actions that failed
    pub failures: usize,
}

pub struct ReconciliationGuardian {
    ctx: HedgeContext,
    config: ReconciliationConfig,
    execution: ExecutionConfig,
}

impl ReconciliationGuardian {
    pub fn new(ctx: HedgeContext, config: &Config) -> Self {
        Self {
            ctx,
            config: config.reconciliation.clone(),
            execution: config.execution.clone(),
        }
    }

    /// Run one pass. Fails without side effects if any snapshot is unavailable.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let mut exchange: HashMap<String, Vec<(Venue, VenuePosition)>> = HashMap::new();
        for venue in self.ctx.venues.all() {
            let positions = venue
                .get_open_positions()
                .await
                .with_context(|| format!("Failed to snapshot {} positions", venue.venue()))?;
            for position in positions.into_iter().filter(|p| !p.is_flat()) {
                exchange
                    .entry(position.symbol.clone())
                    .or_default()
                    .push((venue.venue(), position));
            }
        }

        let ledger_trades = self
            .ctx
            .ledger
            .get_open_trades()
            .await
            .context("Failed to read ledger for reconciliation")?;
        let ledger: HashMap<String, HedgeTrade> = ledger_trades
            .into_iter()
            .map(|t| (t.symbol.clone(), t))
            .collect();

        let now = self.ctx.cooldowns.now();
        let mut report = ReconciliationReport::default();

        // Venue positions with no ledger record
        for (symbol, positions) in &exchange {
            if let Some(trade) = ledger.get(symbol) {
                self.check_legs(trade, positions, now, &mut report);
                continue;
            }
            let recent = positions
                .iter()
                .filter_map(|(_, p)| p.opened_at)
                .chain(self.ctx.cooldowns.last_submission(symbol))
                .max();
            if self.should_suppress(symbol, recent, now) {
                report.suppressed.insert(symbol.clone());
                continue;
            }

            warn!(%symbol, venues = positions.len(), "Ghost position on exchange, force-closing");
            report.view.ghost_on_exchange.insert(symbol.clone());
            for (venue, position) in positions {
                if self.close_zombie(*venue, position).await {
                    report.zombies_closed.push((symbol.clone(), *venue));
                } else {
                    report.failures += 1;
                }
            }
        }

        // Ledger records with no venue position
        for (symbol, trade) in &ledger {
            if exchange.contains_key(symbol) {
                continue;
            }
            if self.should_suppress(symbol, Some(trade.created_at), now) {
                report.suppressed.insert(symbol.clone());
                continue;
            }

            warn!(%symbol, "Ghost trade in ledger, archiving");
            report.view.ghost_in_ledger.insert(symbol.clone());
            match self
                .ctx
                .ledger
                .close(symbol, GHOST_CLEANUP_REASON, Decimal::ZERO)
                .await
            {
                Ok(()) => report.ghosts_archived.push(symbol.clone()),
                Err(e) => {
                    error!(%symbol, error = %e, "Failed to archive ghost trade");
                    report.failures += 1;
                }
            }
        }

        if report.view.is_clean() {
            debug!(
                exchange_symbols = exchange.len(),
                ledger_symbols = ledger.len(),
                one_legged = report.one_legged.len(),
                suppressed = report.suppressed.len(),
                "Reconciliation clean"
            );
        } else {
            info!(
                ghost_on_exchange = ?report.view.ghost_on_exchange,
                ghost_in_ledger = ?report.view.ghost_in_ledger,
                zombies_closed = report.zombies_closed.len(),
                ghosts_archived = report.ghosts_archived.len(),
                one_legged = report.one_legged.len(),
                failures = report.failures,
                "Reconciliation complete"
            );
        }

        Ok(report)
    }

    /// Alert on an open trade whose leg has vanished from its venue.
    fn check_legs(
        &self,
        trade: &HedgeTrade,
        positions: &[(Venue, VenuePosition)],
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) {
        if trade.status != TradeStatus::Open {
            return;
        }
        let symbol = trade.symbol.as_str();
        let missing: Vec<Venue> = [&trade.leg_a, &trade.leg_b]
            .into_iter()
            .filter(|leg| {
                !positions.iter().any(|(venue, p)| {
                    *venue == leg.venue && Side::from_signed_size(p.signed_size) == Some(leg.side)
                })
            })
            .map(|leg| leg.venue)
            .collect();
        if missing.is_empty() {
            return;
        }

        let recent = std::iter::once(trade.created_at)
            .chain(self.ctx.cooldowns.last_submission(symbol))
            .max();
        if self.should_suppress(symbol, recent, now) {
            report.suppressed.insert(symbol.to_string());
            return;
        }

        for venue in missing {
            error!(%symbol, %venue, "Open hedge has no position on leg venue");
            report.one_legged.push((symbol.to_string(), venue));
            if self.ctx.alerts.is_active(symbol, HedgeAlertKind::LegMissing) {
                continue;
            }
            self.ctx.alerts.raise(
                HedgeAlertKind::LegMissing,
                AlertSeverity::Critical,
                symbol,
                format!(
                    "Ledger hedge {} is open but {} reports no position; remaining leg is unhedged",
                    symbol, venue
                ),
            );
        }
    }

    fn should_suppress(
        &self,
        symbol: &str,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.ctx.cooldowns.is_claimed(symbol) {
            debug!(%symbol, "Reconciliation skipped, symbol claimed");
            return true;
        }
        match last_activity {
            Some(at) if now - at < self.config.grace_window() => {
                debug!(%symbol, age_secs = (now - at).num_seconds(), "Within grace window");
                true
            }
            _ => false,
        }
    }

    /// Reduce-only close of a stray position sized from its mark value.
    async fn close_zombie(&self, venue: Venue, position: &VenuePosition) -> bool {
        let symbol = position.symbol.as_str();
        let client = self.ctx.venues.get(venue);
        let Some(position_side) = Side::from_signed_size(position.signed_size) else {
            return true;
        };

        let mark = match client.get_mark_price(symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => price,
            _ => {
                self.zombie_alert(venue, position, "no mark price to size the close");
                return false;
            }
        };
        let notional = position.signed_size.abs() * mark;
        let side = position_side.opposite();

        let result = RetryPolicy::rollback(&self.execution)
            .run("zombie close", symbol, move || {
                client.close_position(symbol, side, notional)
            })
            .await;

        match result {
            Ok(_) => {
                info!(%symbol, %venue, size = %position.signed_size, %notional, "Zombie position closed");
                true
            }
            Err(e) => {
                self.zombie_alert(venue, position, &format!("{:#}", e));
                false
            }
        }
    }

    fn zombie_alert(&self, venue: Venue, position: &VenuePosition, detail: &str) {
        self.ctx.alerts.raise(
            HedgeAlertKind::ZombieCloseFailed,
            AlertSeverity::Error,
            &position.symbol,
            format!(
                "Stray {} position of {} on {} could not be closed: {}",
                position.symbol, position.signed_size, venue, detail
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ScriptedFault;
    use crate::ledger::fixtures::sample_trade;
    use crate::ledger::Ledger;
    use crate::strategy::testkit::Harness;
    use crate::utils::Clock;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn guardian(h: &Harness) -> ReconciliationGuardian {
        ReconciliationGuardian::new(h.context(), &h.config)
    }

    #[tokio::test]
    async fn test_zombie_closed_after_grace_window() {
        let h = Harness::new();
        h.lighter
            .inject_position("SOL-USD", dec!(-2), h.clock.now());

        // Fresh position: suppressed
        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.view.is_clean());
        assert!(report.suppressed.contains("SOL-USD"));
        assert_eq!(h.lighter.position_size("SOL-USD"), dec!(-2));

        h.clock.advance(Duration::seconds(16));
        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.view.ghost_on_exchange.contains("SOL-USD"));
        assert_eq!(report.zombies_closed, vec![("SOL-USD".to_string(), Venue::Lighter)]);
        assert_eq!(h.lighter.position_size("SOL-USD"), Decimal::ZERO);

        // Short 2 @ 100 bought back reduce-only for $200
        let close = h.lighter.orders().pop().unwrap();
        assert_eq!(close.side, Side::Long);
        assert_eq!(close.notional_usd, dec!(200));
        assert!(close.opts.reduce_only);
    }

    #[tokio::test]
    async fn test_recent_submission_suppresses_zombie() {
        let h = Harness::new();
        h.x10
            .inject_position("BTC-USD", dec!(0.001), h.clock.now() - Duration::minutes(10));
        h.cooldowns.note_submission("BTC-USD");

        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.suppressed.contains("BTC-USD"));
        assert!(h.x10.orders().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_ghost_archived_with_zero_pnl() {
        let h = Harness::new();
        let trade = sample_trade("XRP-USD", h.clock.now() - Duration::hours(1));
        h.ledger.create_open(&trade).await.unwrap();

        let report = guardian(&h).reconcile().await.unwrap();

        assert_eq!(report.ghosts_archived, vec!["XRP-USD".to_string()]);
        assert!(h.ledger.get_open_trades().await.unwrap().is_empty());
        let history = h.ledger.history(1).unwrap();
        assert_eq!(history[0].close_reason.as_deref(), Some(GHOST_CLEANUP_REASON));
        assert_eq!(history[0].realized_pnl, Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_matched_symbols_untouched() {
        let h = Harness::new();
        let trade = sample_trade("ETH-USD", h.clock.now() - Duration::hours(1));
        h.ledger.create_open(&trade).await.unwrap();
        h.x10
            .inject_position("ETH-USD", dec!(0.05), trade.created_at);
        h.lighter
            .inject_position("ETH-USD", dec!(-0.05), trade.created_at);

        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.view.is_clean());
        assert!(report.suppressed.is_empty());
        assert!(report.one_legged.is_empty());
        assert!(h.alerts.active().is_empty());
        assert!(h.x10.orders().is_empty());
        assert_eq!(h.ledger.get_open_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_leg_raises_critical_alert_once() {
        let h = Harness::new();
        let trade = sample_trade("ETH-USD", h.clock.now() - Duration::hours(1));
        h.ledger.create_open(&trade).await.unwrap();
        // Lighter short gone, X10 long left unhedged
        h.x10
            .inject_position("ETH-USD", dec!(0.05), trade.created_at);

        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.view.is_clean());
        assert_eq!(report.one_legged, vec![("ETH-USD".to_string(), Venue::Lighter)]);

        let alerts = h.alerts.for_symbol("ETH-USD");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, HedgeAlertKind::LegMissing);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        // Surviving leg and ledger row are left for the operator
        assert_eq!(h.x10.position_size("ETH-USD"), dec!(0.05));
        assert_eq!(h.ledger.get_open_trades().await.unwrap().len(), 1);

        // Still one-legged next pass, no duplicate alert
        let report = guardian(&h).reconcile().await.unwrap();
        assert_eq!(report.one_legged.len(), 1);
        assert_eq!(h.alerts.for_symbol("ETH-USD").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_leg_within_grace_window_suppressed() {
        let h = Harness::new();
        let trade = sample_trade("ETH-USD", h.clock.now());
        h.ledger.create_open(&trade).await.unwrap();
        h.x10
            .inject_position("ETH-USD", dec!(0.05), trade.created_at);

        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.suppressed.contains("ETH-USD"));
        assert!(report.one_legged.is_empty());
        assert!(h.alerts.active().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_pass() {
        let h = Harness::new();
        let trade = sample_trade("XRP-USD", h.clock.now() - Duration::hours(1));
        h.ledger.create_open(&trade).await.unwrap();
        h.x10.fail_position_reads(true);

        assert!(guardian(&h).reconcile().await.is_err());
        // A partial snapshot must not archive anything
        assert_eq!(h.ledger.get_open_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_zombie_close_raises_alert() {
        let h = Harness::new();
        h.x10
            .inject_position("SOL-USD", dec!(1), h.clock.now() - Duration::minutes(5));
        h.x10
            .script_close_faults(&[ScriptedFault::Error, ScriptedFault::Error]);

        let report = guardian(&h).reconcile().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(
            h.alerts.for_symbol("SOL-USD")[0].kind,
            HedgeAlertKind::ZombieCloseFailed
        );
        assert_eq!(h.x10.position_size("SOL-USD"), dec!(1));
    }

    #[tokio::test]
    async fn test_claimed_symbol_skipped() {
        let h = Harness::new();
        h.x10
            .inject_position("SOL-USD", dec!(1), h.clock.now() - Duration::minutes(5));
        let _claim = h.cooldowns.claim("SOL-USD").unwrap();

        let report = guardian(&h).reconcile().await.unwrap();
        assert!(report.suppressed.contains("SOL-USD"));
        assert!(h.x10.orders().is_empty());
    }
}
