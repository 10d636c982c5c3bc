//! Guardian open: two-leg hedge entry.
//!
//! The open runs as a small saga:
//!
//! ```text
//! OpeningA -> OpeningB -> Open
//!                |
//!                +-> RollingBackA -> Aborted
//! ```
//!
//! Leg A is sent once. Leg B is retried under [`RetryPolicy::leg_b`]; if it
//! still fails, leg A is compensated with an opposite close of the same
//! notional. The trade is persisted only after both legs fill.

use crate::config::{Config, CooldownConfig, ExecutionConfig, SizingConfig};
use crate::exchange::{OrderOptions, Venue};
use crate::ledger::{HedgeLeg, HedgeTrade, TradeStatus};
use crate::risk::{AlertSeverity, HedgeAlertKind};
use crate::strategy::context::HedgeContext;
use crate::strategy::error::HedgeError;
use crate::strategy::retry::RetryPolicy;
use crate::strategy::scanner::Opportunity;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

/// Saga state of one open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPhase {
    OpeningA,
    OpeningB,
    Open,
    RollingBackA,
    Aborted,
}

/// Result of an open attempt.
#[derive(Debug)]
pub enum OpenOutcome {
    /// Both legs filled and the trade is persisted as OPEN
    Opened(HedgeTrade),
    /// Refused before any order was sent
    Rejected(HedgeError),
    /// Leg A did not fill; nothing is open
    LegAFailed,
    /// Leg B failed and leg A was closed again
    RolledBack,
    /// Leg B failed and leg A could not be closed; trade kept as ABORTED
    RollbackFailed,
    /// Both legs filled but the ledger write failed
    LedgerWriteFailed,
}

impl OpenOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OpenOutcome::Opened(_))
    }

    /// Whether live exposure now exists for the symbol.
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            OpenOutcome::Opened(_) | OpenOutcome::RollbackFailed | OpenOutcome::LedgerWriteFailed
        )
    }
}

struct EntryPlan {
    notional: Decimal,
    mark_a: Decimal,
    mark_b: Decimal,
}

/// Compute the hedge notional from the desired size and both venue minimums.
///
/// `clamp(max(desired, max(min_a, min_b)), hard_min, max)`. Fails when a
/// venue minimum is above the configured maximum.
pub fn size_notional(
    symbol: &str,
    desired: Decimal,
    min_a: Decimal,
    min_b: Decimal,
    sizing: &SizingConfig,
) -> Result<Decimal, HedgeError> {
    let venue_min = min_a.max(min_b);
    if venue_min > sizing.max_notional_usd {
        return Err(HedgeError::SizingOutOfBounds {
            symbol: symbol.to_string(),
            venue_min,
            max: sizing.max_notional_usd,
        });
    }
    Ok(desired
        .max(venue_min)
        .max(sizing.hard_min_notional_usd)
        .min(sizing.max_notional_usd))
}

/// Opens two-leg hedges.
pub struct HedgeOpener {
    ctx: HedgeContext,
    sizing: SizingConfig,
    execution: ExecutionConfig,
    cooldown: CooldownConfig,
}

impl HedgeOpener {
    pub fn new(ctx: HedgeContext, config: &Config) -> Self {
        Self {
            ctx,
            sizing: config.sizing.clone(),
            execution: config.execution.clone(),
            cooldown: config.cooldown.clone(),
        }
    }

    /// Attempt to open `opp` given the current number of active hedges.
    #[instrument(skip(self, opp), fields(symbol = %opp.symbol))]
    pub async fn open(&self, opp: &Opportunity, open_count: usize) -> OpenOutcome {
        if let Err(e) = self.check_admission(opp, open_count) {
            debug!(symbol = %opp.symbol, reason = %e, "Open rejected");
            return OpenOutcome::Rejected(e);
        }

        let Some(_claim) = self.ctx.cooldowns.claim(&opp.symbol) else {
            return OpenOutcome::Rejected(HedgeError::SymbolBusy {
                symbol: opp.symbol.clone(),
            });
        };

        let plan = match self.prepare(opp).await {
            Ok(plan) => plan,
            Err(e) => {
                info!(symbol = %opp.symbol, reason = %e, "Open rejected");
                return OpenOutcome::Rejected(e);
            }
        };

        self.execute(opp, plan).await
    }

    /// Checks that need no I/O.
    fn check_admission(&self, opp: &Opportunity, open_count: usize) -> Result<(), HedgeError> {
        if opp.leg_a.venue == opp.leg_b.venue || opp.leg_a.side == opp.leg_b.side {
            return Err(HedgeError::InvalidLegs);
        }
        if self.ctx.cooldowns.is_paused() {
            return Err(HedgeError::GlobalPause);
        }
        if self.ctx.cooldowns.is_blacklisted(&opp.symbol) {
            let remaining_secs = self
                .ctx
                .cooldowns
                .remaining(&opp.symbol)
                .map_or(0, |d| d.num_seconds());
            return Err(HedgeError::Blacklisted {
                symbol: opp.symbol.clone(),
                remaining_secs,
            });
        }
        if open_count >= self.sizing.max_open_trades {
            return Err(HedgeError::CapReached {
                open: open_count,
                cap: self.sizing.max_open_trades,
            });
        }
        Ok(())
    }

    /// Read-only checks against the ledger and both venues.
    async fn prepare(&self, opp: &Opportunity) -> Result<EntryPlan, HedgeError> {
        let symbol = opp.symbol.as_str();
        let unavailable = |e: anyhow::Error| HedgeError::Unavailable(format!("{:#}", e));

        let active = self.ctx.ledger.get_open_trades().await.map_err(unavailable)?;
        if active.iter().any(|t| t.symbol == symbol) {
            return Err(HedgeError::AlreadyActive {
                symbol: symbol.to_string(),
            });
        }

        let venue_a = self.ctx.venues.get(opp.leg_a.venue);
        let venue_b = self.ctx.venues.get(opp.leg_b.venue);

        let min_a = venue_a.min_notional_usd(symbol).await.map_err(unavailable)?;
        let min_b = venue_b.min_notional_usd(symbol).await.map_err(unavailable)?;
        let notional = size_notional(symbol, opp.target_notional, min_a, min_b, &self.sizing)?;

        let mark_a = self.mark_price(opp.leg_a.venue, symbol).await?;
        let mark_b = self.mark_price(opp.leg_b.venue, symbol).await?;

        let required = notional / self.sizing.leverage * self.sizing.balance_buffer;
        for venue in [opp.leg_a.venue, opp.leg_b.venue] {
            let available = self
                .ctx
                .venues
                .get(venue)
                .get_available_balance()
                .await
                .map_err(unavailable)?;
            if available < required {
                return Err(HedgeError::InsufficientBalance {
                    venue,
                    available,
                    required,
                });
            }
        }

        Ok(EntryPlan {
            notional,
            mark_a,
            mark_b,
        })
    }

    async fn mark_price(&self, venue: Venue, symbol: &str) -> Result<Decimal, HedgeError> {
        let missing = || HedgeError::MissingMarketData {
            symbol: symbol.to_string(),
            venue,
            what: "mark price",
        };
        match self.ctx.venues.get(venue).get_mark_price(symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => Ok(price),
            Ok(_) => Err(missing()),
            Err(e) => {
                debug!(%symbol, %venue, error = %e, "Mark price read failed");
                Err(missing())
            }
        }
    }

    fn advance(phase: &mut OpenPhase, next: OpenPhase, symbol: &str) {
        debug!(%symbol, from = ?*phase, to = ?next, "Open phase");
        *phase = next;
    }

    async fn execute(&self, opp: &Opportunity, plan: EntryPlan) -> OpenOutcome {
        let symbol = opp.symbol.as_str();
        let notional = plan.notional;
        let venue_a = self.ctx.venues.get(opp.leg_a.venue);
        let venue_b = self.ctx.venues.get(opp.leg_b.venue);
        let mut phase = OpenPhase::OpeningA;

        info!(
            %symbol,
            leg_a = %format!("{} {}", opp.leg_a.venue, opp.leg_a.side),
            leg_b = %format!("{} {}", opp.leg_b.venue, opp.leg_b.side),
            %notional,
            "Opening hedge"
        );

        let opts_a = if venue_a.supports_resting_orders() {
            OrderOptions::maker()
        } else {
            OrderOptions::taker()
        };
        let side_a = opp.leg_a.side;
        self.ctx.cooldowns.note_submission(symbol);

        let ack_a = RetryPolicy::once(self.execution.order_timeout())
            .run("leg A open", symbol, move || {
                venue_a.open_position(symbol, side_a, notional, opts_a)
            })
            .await;

        let ack_a = match ack_a {
            Ok(ack) => ack,
            Err(e) => {
                warn!(%symbol, venue = %opp.leg_a.venue, error = %e, "Leg A failed, nothing opened");
                self.ctx
                    .cooldowns
                    .block(symbol, self.cooldown.leg_failure());
                Self::advance(&mut phase, OpenPhase::Aborted, symbol);
                return OpenOutcome::LegAFailed;
            }
        };

        let leg_a = HedgeLeg {
            venue: opp.leg_a.venue,
            side: side_a,
            filled_notional_usd: notional,
            entry_price: ack_a.fill_price.unwrap_or(plan.mark_a),
            order_ref: ack_a.order_ref,
        };
        Self::advance(&mut phase, OpenPhase::OpeningB, symbol);

        let side_b = opp.leg_b.side;
        let ack_b = RetryPolicy::leg_b(&self.execution)
            .run("leg B open", symbol, move || {
                venue_b.open_position(symbol, side_b, notional, OrderOptions::taker())
            })
            .await;

        let ack_b = match ack_b {
            Ok(ack) => ack,
            Err(e) => {
                warn!(%symbol, venue = %opp.leg_b.venue, error = %e, "Leg B failed, rolling back leg A");
                Self::advance(&mut phase, OpenPhase::RollingBackA, symbol);
                return self.roll_back(opp, leg_a, &mut phase).await;
            }
        };

        let leg_b = HedgeLeg {
            venue: opp.leg_b.venue,
            side: side_b,
            filled_notional_usd: notional,
            entry_price: ack_b.fill_price.unwrap_or(plan.mark_b),
            order_ref: ack_b.order_ref,
        };

        let low = leg_a.entry_price.min(leg_b.entry_price);
        let entry_spread_pct = if low > Decimal::ZERO {
            (leg_a.entry_price - leg_b.entry_price).abs() / low
        } else {
            opp.spread_pct
        };

        let trade = HedgeTrade {
            symbol: symbol.to_string(),
            status: TradeStatus::Open,
            leg_a,
            leg_b,
            notional_usd: notional,
            entry_spread_pct,
            entry_net_rate_hourly: opp.net_rate_hourly,
            created_at: self.ctx.cooldowns.now(),
            funding_collected: Decimal::ZERO,
            close_reason: None,
            realized_pnl: None,
            closed_at: None,
            is_farm_trade: opp.is_farm,
        };

        if let Err(e) = self.ctx.ledger.create_open(&trade).await {
            self.on_ledger_failure(&trade, e);
            return OpenOutcome::LedgerWriteFailed;
        }

        Self::advance(&mut phase, OpenPhase::Open, symbol);
        info!(
            %symbol,
            %notional,
            entry_a = %trade.leg_a.entry_price,
            entry_b = %trade.leg_b.entry_price,
            net_rate_hourly = %trade.entry_net_rate_hourly,
            farm = trade.is_farm_trade,
            "Hedge opened"
        );
        OpenOutcome::Opened(trade)
    }

    /// Compensate a filled leg A after leg B gave up.
    async fn roll_back(&self, opp: &Opportunity, leg_a: HedgeLeg, phase: &mut OpenPhase) -> OpenOutcome {
        let symbol = opp.symbol.as_str();
        let venue_a = self.ctx.venues.get(leg_a.venue);
        let close_side = leg_a.side.opposite();
        let notional = leg_a.filled_notional_usd;

        // Leg B failures are usually margin or liquidity wide
        self.ctx
            .cooldowns
            .block(symbol, self.cooldown.leg_failure());
        self.ctx.cooldowns.pause_all(self.cooldown.global_pause());

        let result = RetryPolicy::rollback(&self.execution)
            .run("leg A rollback", symbol, move || {
                venue_a.close_position(symbol, close_side, notional)
            })
            .await;
        Self::advance(phase, OpenPhase::Aborted, symbol);

        let err = match result {
            Ok(_) => {
                warn!(%symbol, venue = %leg_a.venue, %notional, "Leg A rolled back");
                return OpenOutcome::RolledBack;
            }
            Err(e) => e,
        };

        self.ctx.alerts.raise(
            HedgeAlertKind::RollbackFailed,
            AlertSeverity::Critical,
            symbol,
            format!(
                "Leg B on {} failed and rollback of {} {} ${} on {} failed: {:#}. One-sided exposure open.",
                opp.leg_b.venue, leg_a.venue, leg_a.side, notional, leg_a.venue, err
            ),
        );

        let trade = HedgeTrade {
            symbol: symbol.to_string(),
            status: TradeStatus::Aborted,
            leg_b: HedgeLeg {
                venue: opp.leg_b.venue,
                side: opp.leg_b.side,
                filled_notional_usd: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                order_ref: None,
            },
            leg_a,
            notional_usd: notional,
            entry_spread_pct: opp.spread_pct,
            entry_net_rate_hourly: opp.net_rate_hourly,
            created_at: self.ctx.cooldowns.now(),
            funding_collected: Decimal::ZERO,
            close_reason: Some("ROLLBACK_FAILED".to_string()),
            realized_pnl: None,
            closed_at: None,
            is_farm_trade: opp.is_farm,
        };
        if let Err(e) = self.ctx.ledger.create_open(&trade).await {
            error!(%symbol, error = %e, "Failed to record aborted hedge");
        }

        OpenOutcome::RollbackFailed
    }

    fn on_ledger_failure(&self, trade: &HedgeTrade, err: anyhow::Error) {
        let symbol = trade.symbol.as_str();
        self.ctx
            .cooldowns
            .block(symbol, self.cooldown.ledger_failure());
        self.ctx.cooldowns.pause_all(self.cooldown.global_pause());

        // Positions stay open; reconciliation picks up the untracked hedge
        self.ctx.alerts.raise(
            HedgeAlertKind::LedgerWriteFailed,
            AlertSeverity::Critical,
            symbol,
            format!(
                "Both legs filled ({} {} / {} {}, ${}) but ledger write failed: {:#}",
                trade.leg_a.venue,
                trade.leg_a.side,
                trade.leg_b.venue,
                trade.leg_b.side,
                trade.notional_usd,
                err
            ),
        );
    }
}
