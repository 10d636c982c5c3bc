//! Guardian close: two-leg hedge exit.
//!
//! Legs unwind in reverse open order. Leg B (the taker leg) closes first;
//! leg A is only touched once leg B is flat.

use crate::config::{Config, CooldownConfig, ExecutionConfig, ExitConfig};
use crate::exchange::Side;
use crate::ledger::{HedgeLeg, HedgeTrade, TradeStatus, TradeUpdate};
use crate::risk::{AlertSeverity, HedgeAlertKind};
use crate::strategy::context::HedgeContext;
use crate::strategy::pnl;
use crate::strategy::retry::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

/// Result of a close attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Both legs flat and the trade archived
    Closed { realized_pnl: Decimal },
    /// Trade is not OPEN or another coordinator holds the symbol
    Skipped,
    /// Leg B did not close; both legs remain open
    LegBFailed,
    /// Leg B closed but leg A did not; trade left CLOSING
    Asymmetric,
    /// Both legs closed but the archive write failed
    ArchiveFailed,
}

impl CloseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CloseOutcome::Closed { .. })
    }
}

/// Closes two-leg hedges.
pub struct HedgeCloser {
    ctx: HedgeContext,
    execution: ExecutionConfig,
    cooldown: CooldownConfig,
    exit: ExitConfig,
}

impl HedgeCloser {
    pub fn new(ctx: HedgeContext, config: &Config) -> Self {
        Self {
            ctx,
            execution: config.execution.clone(),
            cooldown: config.cooldown.clone(),
            exit: config.exit.clone(),
        }
    }

    /// Close `trade` for `reason`.
    ///
    /// `pnl_hint` is used as realized PnL when a venue reports no fill price.
    #[instrument(skip(self, trade, pnl_hint), fields(symbol = %trade.symbol))]
    pub async fn close(
        &self,
        trade: &HedgeTrade,
        reason: &str,
        pnl_hint: Option<Decimal>,
    ) -> CloseOutcome {
        let symbol = trade.symbol.as_str();
        if trade.status != TradeStatus::Open {
            debug!(%symbol, status = %trade.status, "Close skipped, trade not open");
            return CloseOutcome::Skipped;
        }
        let Some(_claim) = self.ctx.cooldowns.claim(symbol) else {
            debug!(%symbol, "Close skipped, symbol busy");
            return CloseOutcome::Skipped;
        };

        info!(%symbol, %reason, notional = %trade.notional_usd, "Closing hedge");

        let exit_b = match self.close_leg(symbol, &trade.leg_b, "leg B close").await {
            Ok(price) => price,
            Err(e) => {
                // Both legs still open, monitor re-triggers next cycle
                warn!(%symbol, venue = %trade.leg_b.venue, error = %e, "Leg B close failed, hedge left open");
                return CloseOutcome::LegBFailed;
            }
        };

        let exit_a = match self.close_leg(symbol, &trade.leg_a, "leg A close").await {
            Ok(price) => price,
            Err(e) => {
                self.on_asymmetric(trade, reason, e).await;
                return CloseOutcome::Asymmetric;
            }
        };

        let realized_pnl = match (exit_a, exit_b) {
            (Some(a), Some(b)) => pnl::realized(trade, a, b, self.exit.round_trip_fee_pct),
            _ => pnl_hint.unwrap_or_else(|| {
                trade.funding_collected
                    - pnl::round_trip_fee(trade.notional_usd, self.exit.round_trip_fee_pct)
            }),
        };

        if let Err(e) = self.ctx.ledger.close(symbol, reason, realized_pnl).await {
            self.ctx
                .cooldowns
                .block(symbol, self.cooldown.ledger_failure());
            self.ctx.alerts.raise(
                HedgeAlertKind::ArchiveFailed,
                AlertSeverity::Critical,
                symbol,
                format!(
                    "Both legs closed ({}) but archive write failed: {:#}",
                    reason, e
                ),
            );
            return CloseOutcome::ArchiveFailed;
        }

        info!(%symbol, %reason, pnl = %realized_pnl, "Hedge closed");
        CloseOutcome::Closed { realized_pnl }
    }

    /// Reduce-only close of one leg sized from its live position.
    ///
    /// A leg already flat on its venue counts as closed. Returns the exit
    /// fill price if reported.
    async fn close_leg(&self, symbol: &str, leg: &HedgeLeg, action: &str) -> Result<Option<Decimal>> {
        let venue = self.ctx.venues.get(leg.venue);
        let timeout = self.execution.order_timeout();

        let positions = tokio::time::timeout(timeout, venue.get_open_positions())
            .await
            .map_err(|_| anyhow!("{} position read timed out after {:?}", leg.venue, timeout))?
            .with_context(|| format!("Failed to read {} positions", leg.venue))?;
        let Some(size) = positions
            .iter()
            .find(|p| p.symbol == symbol && Side::from_signed_size(p.signed_size) == Some(leg.side))
            .map(|p| p.signed_size)
        else {
            warn!(%symbol, venue = %leg.venue, "Leg already flat on venue, treating as closed");
            return Ok(None);
        };

        let mark = match tokio::time::timeout(timeout, venue.get_mark_price(symbol)).await {
            Ok(Ok(Some(price))) if price > Decimal::ZERO => price,
            _ => bail!("No {} mark price to size the {} close", leg.venue, symbol),
        };
        let side = leg.side.opposite();
        let notional = size.abs() * mark;

        let ack = RetryPolicy::once(timeout)
            .run(action, symbol, move || venue.close_position(symbol, side, notional))
            .await?;

        debug!(%symbol, venue = %leg.venue, %side, %size, %notional, "Leg closed");
        Ok(ack.fill_price)
    }

    async fn on_asymmetric(&self, trade: &HedgeTrade, reason: &str, err: anyhow::Error) {
        let symbol = trade.symbol.as_str();

        self.ctx.alerts.raise(
            HedgeAlertKind::AsymmetricClose,
            AlertSeverity::Critical,
            symbol,
            format!(
                "Leg B on {} closed but leg A {} {} ${} on {} failed to close: {:#}. Hedge is not delta-neutral.",
                trade.leg_b.venue,
                trade.leg_a.venue,
                trade.leg_a.side,
                trade.leg_a.filled_notional_usd,
                trade.leg_a.venue,
                err
            ),
        );

        let update = TradeUpdate::status(TradeStatus::Closing)
            .with_reason(format!("{} (leg A close failed)", reason));
        if let Err(e) = self.ctx.ledger.update(symbol, update).await {
            error!(%symbol, error = %e, "Failed to flag asymmetric hedge as CLOSING");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderKind, ScriptedFault, Side};
    use crate::ledger::{Ledger, MockLedger};
    use crate::strategy::opener::{HedgeOpener, OpenOutcome};
    use crate::strategy::testkit::{long_x10_short_lighter, Harness};
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn open_eth(h: &Harness) -> HedgeTrade {
        let opener = HedgeOpener::new(h.context(), &h.config);
        match opener.open(&long_x10_short_lighter("ETH-USD", dec!(100)), 0).await {
            OpenOutcome::Opened(trade) => trade,
            other => panic!("open failed: {:?}", other),
        }
    }

    fn closer(h: &Harness) -> HedgeCloser {
        HedgeCloser::new(h.context(), &h.config)
    }

    #[tokio::test]
    async fn test_close_unwinds_leg_b_first_and_archives() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        h.x10.set_mark_price("ETH-USD", dec!(2100));
        h.lighter.set_mark_price("ETH-USD", dec!(2100));

        let outcome = closer(&h).close(&trade, "Take Profit", None).await;

        // Price legs cancel; only the fee remains
        assert_eq!(outcome, CloseOutcome::Closed { realized_pnl: dec!(-0.045) });
        assert!(h.ledger.get_open_trades().await.unwrap().is_empty());

        let history = h.ledger.history(10).unwrap();
        assert_eq!(history[0].close_reason.as_deref(), Some("Take Profit"));
        assert_eq!(history[0].status, TradeStatus::Closed);

        assert_eq!(h.x10.position_size("ETH-USD"), Decimal::ZERO);
        assert_eq!(h.lighter.position_size("ETH-USD"), Decimal::ZERO);

        // Lighter short is bought back, X10 long is sold
        let lighter_close = &h.lighter.orders()[1];
        assert_eq!(lighter_close.kind, OrderKind::Close);
        assert_eq!(lighter_close.side, Side::Long);
        assert_eq!(h.x10.orders()[1].side, Side::Short);
    }

    #[tokio::test]
    async fn test_leg_b_failure_never_touches_leg_a() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        h.lighter.script_close_faults(&[ScriptedFault::Error]);

        let outcome = closer(&h).close(&trade, "Stop Loss", None).await;

        assert_eq!(outcome, CloseOutcome::LegBFailed);
        assert!(h.x10.orders().iter().all(|o| o.kind == OrderKind::Open));
        let stored = h.ledger.get_open_trades().await.unwrap();
        assert_eq!(stored[0].status, TradeStatus::Open);
        assert!(h.alerts.active().is_empty());
    }

    #[tokio::test]
    async fn test_leg_a_failure_flags_closing_and_alerts() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        h.x10.script_close_faults(&[ScriptedFault::Reject]);

        let outcome = closer(&h).close(&trade, "Stop Loss", None).await;

        assert_eq!(outcome, CloseOutcome::Asymmetric);
        assert_eq!(h.lighter.position_size("ETH-USD"), Decimal::ZERO);
        assert_eq!(h.x10.position_size("ETH-USD"), dec!(0.05));

        let stored = h.ledger.get_open_trades().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, TradeStatus::Closing);
        assert!(h.ledger.history(10).unwrap().is_empty());

        let alert = &h.alerts.for_symbol("ETH-USD")[0];
        assert_eq!(alert.kind, HedgeAlertKind::AsymmetricClose);
        assert_eq!(alert.severity, AlertSeverity::Critical);

        // A CLOSING trade is not closed again automatically
        let stored = stored[0].clone();
        assert_eq!(closer(&h).close(&stored, "Stop Loss", None).await, CloseOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_archive_failure_alerts_and_blocks() {
        let h = Harness::new();
        let trade = open_eth(&h).await;

        let mut ledger = MockLedger::new();
        ledger
            .expect_close()
            .times(1)
            .returning(|_, _, _| Err(anyhow!("disk I/O error")));
        let closer = HedgeCloser::new(h.context_with_ledger(Arc::new(ledger)), &h.config);

        let outcome = closer.close(&trade, "Max Hold Expired", Some(dec!(1))).await;

        assert_eq!(outcome, CloseOutcome::ArchiveFailed);
        assert!(!outcome.is_success());
        assert!(h.cooldowns.is_blacklisted("ETH-USD"));
        assert_eq!(h.alerts.for_symbol("ETH-USD")[0].kind, HedgeAlertKind::ArchiveFailed);
        assert_eq!(h.x10.position_size("ETH-USD"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_busy_symbol_skipped() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        let _claim = h.cooldowns.claim("ETH-USD").unwrap();

        assert_eq!(closer(&h).close(&trade, "Stop Loss", None).await, CloseOutcome::Skipped);
        assert_eq!(h.lighter.orders().len(), 1);
        assert_eq!(h.x10.orders()[0].kind, OrderKind::Open);
    }

    #[tokio::test]
    async fn test_leg_already_flat_counts_as_closed() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        // Lighter short liquidated outside the engine
        h.lighter.wipe_position("ETH-USD");

        let outcome = closer(&h).close(&trade, "Stop Loss", None).await;

        assert!(outcome.is_success());
        assert_eq!(h.x10.position_size("ETH-USD"), Decimal::ZERO);
        assert!(h.ledger.get_open_trades().await.unwrap().is_empty());
        assert!(h.lighter.orders().iter().all(|o| o.kind == OrderKind::Open));
        assert!(h.alerts.active().is_empty());
    }

    #[tokio::test]
    async fn test_close_sized_from_live_position_value() {
        let h = Harness::new();
        let trade = open_eth(&h).await;
        h.x10.set_mark_price("ETH-USD", dec!(2300));
        h.lighter.set_mark_price("ETH-USD", dec!(2300));

        let outcome = closer(&h).close(&trade, "Take Profit", None).await;

        assert!(outcome.is_success());
        assert_eq!(h.x10.position_size("ETH-USD"), Decimal::ZERO);
        assert_eq!(h.lighter.position_size("ETH-USD"), Decimal::ZERO);
        // 0.05 ETH at 2300, not the $100 entry notional
        assert_eq!(h.lighter.orders()[1].notional_usd, dec!(115));
        assert_eq!(h.x10.orders()[1].notional_usd, dec!(115));
    }
}
