//! Hedge engine: the surface driven by the control loop.
//!
//! - `reconcile()`: ledger vs. venue cleanup
//! - `monitor_open_trades()`: exit evaluation, closes and re-entry
//! - `try_open(opportunity)` / `close(trade, reason)`: single actions
//! - `run_scan_cycle()`: monitor, then open new hedges up to the cap
//!
//! The open-trade count used for the admission cap is read from the ledger
//! at the start of each scan cycle and adjusted in-process after every
//! open and close, so a burst of opportunities in one cycle cannot exceed
//! the cap.

use crate::config::Config;
use crate::ledger::{HedgeTrade, TradeStatus, TradeUpdate};
use crate::strategy::closer::HedgeCloser;
use crate::strategy::context::HedgeContext;
use crate::strategy::monitor::PositionMonitor;
use crate::strategy::opener::HedgeOpener;
use crate::strategy::reconciler::{ReconciliationGuardian, ReconciliationReport};
use crate::strategy::scanner::{Opportunity, OpportunityFeed};
use crate::strategy::pnl;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub evaluated: usize,
    /// Symbols closed on a trigger
    pub closed: Vec<String>,
    pub close_failures: usize,
    /// Freed symbols reopened by the re-entry check
    pub reentered: Vec<String>,
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub monitor: MonitorReport,
    pub open_count: usize,
    pub attempted: usize,
    pub opened: Vec<String>,
}

pub struct HedgeEngine {
    ctx: HedgeContext,
    feed: Arc<dyn OpportunityFeed>,
    opener: HedgeOpener,
    closer: HedgeCloser,
    monitor: PositionMonitor,
    guardian: ReconciliationGuardian,
    max_open_trades: usize,
    reentry_enabled: bool,
    fee_pct: Decimal,
    open_count: AtomicUsize,
}

impl HedgeEngine {
    pub fn new(ctx: HedgeContext, feed: Arc<dyn OpportunityFeed>, config: &Config) -> Self {
        Self {
            opener: HedgeOpener::new(ctx.clone(), config),
            closer: HedgeCloser::new(ctx.clone(), config),
            monitor: PositionMonitor::new(config.exit.clone()),
            guardian: ReconciliationGuardian::new(ctx.clone(), config),
            ctx,
            feed,
            max_open_trades: config.sizing.max_open_trades,
            reentry_enabled: config.exit.reentry_enabled,
            fee_pct: config.exit.round_trip_fee_pct,
            open_count: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> &HedgeContext {
        &self.ctx
    }

    /// Active hedges as tracked for the admission cap.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Re-read the active hedge count from the ledger.
    pub async fn refresh_open_count(&self) -> Result<usize> {
        let count = self.ctx.ledger.get_open_trades().await?.len();
        self.open_count.store(count, Ordering::SeqCst);
        Ok(count)
    }

    fn release_slot(&self) {
        let _ = self
            .open_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let report = self.guardian.reconcile().await?;
        if !report.ghosts_archived.is_empty() {
            self.refresh_open_count().await?;
        }
        Ok(report)
    }

    /// Attempt one open. True only if both legs filled and the ledger has it.
    pub async fn try_open(&self, opp: &Opportunity) -> bool {
        let outcome = self.opener.open(opp, self.open_count()).await;
        if outcome.occupies_slot() {
            self.open_count.fetch_add(1, Ordering::SeqCst);
        }
        outcome.is_success()
    }

    /// Close one hedge. True only if both legs closed and the trade is archived.
    pub async fn close(&self, trade: &HedgeTrade, reason: &str) -> bool {
        let outcome = self.closer.close(trade, reason, None).await;
        if outcome.is_success() {
            self.release_slot();
        }
        outcome.is_success()
    }

    /// Evaluate every OPEN hedge, book funding and close on a trigger.
    pub async fn monitor_open_trades(&self) -> Result<MonitorReport> {
        let trades = self
            .ctx
            .ledger
            .get_open_trades()
            .await
            .context("Failed to load open trades")?;
        let now = self.ctx.cooldowns.now();
        let mut report = MonitorReport::default();
        let mut freed = Vec::new();

        for trade in trades.iter().filter(|t| t.status == TradeStatus::Open) {
            let symbol = trade.symbol.as_str();
            let Some(market) = self.monitor.snapshot(&self.ctx.venues, symbol).await else {
                debug!(%symbol, "No prices, skipping evaluation");
                continue;
            };
            let eval = self.monitor.evaluate(trade, &market, now);
            report.evaluated += 1;

            let mut trade = trade.clone();
            if eval.pnl.funding_pnl != trade.funding_collected {
                trade.funding_collected = eval.pnl.funding_pnl;
                if let Err(e) = self
                    .ctx
                    .ledger
                    .update(symbol, TradeUpdate::funding(eval.pnl.funding_pnl))
                    .await
                {
                    warn!(%symbol, error = %e, "Failed to book funding accrual");
                }
            }

            let Some(trigger) = eval.trigger else {
                continue;
            };

            info!(%symbol, reason = trigger.reason(), pnl = %eval.pnl.net, "Exit triggered");
            let outcome = self
                .closer
                .close(&trade, trigger.reason(), Some(eval.pnl.net))
                .await;
            if outcome.is_success() {
                self.release_slot();
                report.closed.push(trade.symbol.clone());
                if self.reentry_enabled && !trade.is_farm_trade {
                    freed.push(trade.symbol.clone());
                }
            } else {
                report.close_failures += 1;
            }
        }

        if !freed.is_empty() {
            report.reentered = self.reenter(&freed).await;
        }

        Ok(report)
    }

    /// Look for a fresh opportunity on just-closed symbols.
    async fn reenter(&self, freed: &[String]) -> Vec<String> {
        let exclude = self.blocked_or_active().await;
        let opps = match self.feed.rank_opportunities(&exclude).await {
            Ok(opps) => opps,
            Err(e) => {
                warn!(error = %e, "Re-entry scan failed");
                return Vec::new();
            }
        };

        let mut reentered = Vec::new();
        for opp in opps.iter().filter(|o| freed.contains(&o.symbol)) {
            if self.open_count() >= self.max_open_trades {
                break;
            }
            if self.try_open(opp).await {
                info!(symbol = %opp.symbol, "Re-entered after close");
                reentered.push(opp.symbol.clone());
            }
        }
        reentered
    }

    /// Symbols that must not be offered: active in the ledger or cooling down.
    async fn blocked_or_active(&self) -> HashSet<String> {
        let mut exclude = self.ctx.cooldowns.blocked_symbols();
        match self.ctx.ledger.get_open_trades().await {
            Ok(trades) => exclude.extend(trades.into_iter().map(|t| t.symbol)),
            Err(e) => warn!(error = %e, "Failed to read ledger for exclusions"),
        }
        exclude
    }

    /// One control loop tick: monitor existing hedges, then open new ones.
    pub async fn run_scan_cycle(&self) -> Result<ScanReport> {
        self.ctx.cooldowns.clear_expired();

        let monitor = match self.monitor_open_trades().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Monitor pass failed");
                MonitorReport::default()
            }
        };

        let active = self
            .ctx
            .ledger
            .get_open_trades()
            .await
            .context("Failed to read open trade count")?;
        self.open_count.store(active.len(), Ordering::SeqCst);

        let mut report = ScanReport {
            monitor,
            open_count: active.len(),
            ..Default::default()
        };

        if self.ctx.cooldowns.is_paused() {
            debug!("Global pause active, skipping opportunity scan");
            return Ok(report);
        }
        if self.open_count() >= self.max_open_trades {
            debug!(open = self.open_count(), cap = self.max_open_trades, "Open trade cap reached");
            return Ok(report);
        }

        let mut exclude = self.ctx.cooldowns.blocked_symbols();
        exclude.extend(active.into_iter().map(|t| t.symbol));

        let opps = self.feed.rank_opportunities(&exclude).await?;
        for opp in &opps {
            if self.open_count() >= self.max_open_trades {
                break;
            }
            if self.ctx.cooldowns.is_paused() {
                debug!("Global pause activated mid-cycle");
                break;
            }
            report.attempted += 1;
            if self.try_open(opp).await {
                report.opened.push(opp.symbol.clone());
            }
        }

        report.open_count = self.open_count();
        if !report.opened.is_empty() {
            info!(
                opened = ?report.opened,
                open = report.open_count,
                cap = self.max_open_trades,
                "Scan cycle opened hedges"
            );
        }
        Ok(report)
    }

    /// Log mark-to-market PnL of every active hedge.
    pub async fn log_pnl_status(&self) -> Result<Decimal> {
        let trades = self.ctx.ledger.get_open_trades().await?;
        let now = self.ctx.cooldowns.now();
        let mut total = Decimal::ZERO;

        for trade in &trades {
            let Some(market) = self.monitor.snapshot(&self.ctx.venues, &trade.symbol).await else {
                continue;
            };
            let estimate = pnl::estimate(trade, &market, now, self.fee_pct);
            total += estimate.net;
            info!(
                symbol = %trade.symbol,
                status = %trade.status,
                notional = %trade.notional_usd,
                price_pnl = %estimate.price_pnl.round_dp(4),
                funding = %estimate.funding_pnl.round_dp(4),
                net = %estimate.net.round_dp(4),
                age_mins = trade.age(now).num_minutes(),
                "Hedge PnL"
            );
        }

        info!(
            active = trades.len(),
            net_pnl = %total.round_dp(4),
            alerts = self.ctx.alerts.active().len(),
            "PnL status"
        );
        Ok(total)
    }
}
