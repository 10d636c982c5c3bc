//! In-memory paper venue for paper trading and tests.
//!
//! Simulates one perpetuals venue: marks, hourly funding, available
//! balance and signed positions. Failures, rejections and latency can be
//! scripted per call kind so coordinator rollback paths can be exercised
//! deterministically. Every mutating attempt is appended to an order log.

use super::traits::{OrderAck, OrderOptions, Side, Venue, VenueClient, VenuePosition};
use crate::utils::Clock;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Reduce-only orders covering at least this share of the position value
/// flatten it entirely (absorbs mark drift between open and close).
/// Residual position value below which a reduce-only close flattens the position.
const DUST_NOTIONAL_USD: Decimal = dec!(0.01);

/// Orders across all paper venues in submission order.
static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Simulated market for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperMarket {
    pub mark_price: Decimal,
    pub funding_rate_hourly: Decimal,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    signed_size: Decimal,
    opened_at: DateTime<Utc>,
}

/// Kind of mutating call recorded in the order log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Open,
    Close,
}

/// One mutating call as seen by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    /// Process-wide submission sequence, comparable across venues
    pub seq: u64,
    pub kind: OrderKind,
    pub symbol: String,
    pub side: Side,
    pub notional_usd: Decimal,
    pub opts: OrderOptions,
    pub filled: bool,
}

/// Scripted outcome for upcoming calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFault {
    /// Transport-level error
    Error,
    /// Venue answers `ok == false`
    Reject,
}

#[derive(Debug, Default)]
struct FaultScript {
    opens: Vec<ScriptedFault>,
    closes: Vec<ScriptedFault>,
    fail_position_reads: bool,
    order_latency: Option<Duration>,
}

#[derive(Debug)]
struct PaperState {
    balance: Decimal,
    markets: HashMap<String, PaperMarket>,
    positions: HashMap<String, PaperPosition>,
    min_notional: Decimal,
    min_notional_overrides: HashMap<String, Decimal>,
    orders: Vec<OrderRecord>,
    faults: FaultScript,
}

/// Paper implementation of [`VenueClient`].
pub struct PaperVenue {
    venue: Venue,
    resting_orders: bool,
    clock: Arc<dyn Clock>,
    state: Mutex<PaperState>,
    /// Serializes mutating calls: at most one in flight per venue
    order_gate: tokio::sync::Mutex<()>,
    order_id_counter: AtomicU64,
}

impl PaperVenue {
    /// Create a paper venue with an initial available balance.
    pub fn new(venue: Venue, balance: Decimal, clock: Arc<dyn Clock>) -> Self {
        Self {
            venue,
            resting_orders: venue == Venue::Lighter,
            clock,
            state: Mutex::new(PaperState {
                balance,
                markets: HashMap::new(),
                positions: HashMap::new(),
                min_notional: dec!(10),
                min_notional_overrides: HashMap::new(),
                orders: Vec::new(),
                faults: FaultScript::default(),
            }),
            order_gate: tokio::sync::Mutex::new(()),
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Override whether maker orders are supported.
    pub fn with_resting_orders(mut self, supported: bool) -> Self {
        self.resting_orders = supported;
        self
    }

    pub fn set_market(&self, symbol: &str, mark_price: Decimal, funding_rate_hourly: Decimal) {
        self.state.lock().markets.insert(
            symbol.to_string(),
            PaperMarket {
                mark_price,
                funding_rate_hourly,
            },
        );
    }

    /// Move the mark price of an existing market.
    pub fn set_mark_price(&self, symbol: &str, mark_price: Decimal) {
        if let Some(market) = self.state.lock().markets.get_mut(symbol) {
            market.mark_price = mark_price;
        }
    }

    pub fn remove_market(&self, symbol: &str) {
        self.state.lock().markets.remove(symbol);
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().balance = balance;
    }

    pub fn set_min_notional(&self, min_notional: Decimal) {
        self.state.lock().min_notional = min_notional;
    }

    pub fn set_symbol_min_notional(&self, symbol: &str, min_notional: Decimal) {
        self.state
            .lock()
            .min_notional_overrides
            .insert(symbol.to_string(), min_notional);
    }

    /// Inject a position directly (manual trade, crash leftovers).
    pub fn inject_position(&self, symbol: &str, signed_size: Decimal, opened_at: DateTime<Utc>) {
        self.state.lock().positions.insert(
            symbol.to_string(),
            PaperPosition {
                signed_size,
                opened_at,
            },
        );
    }

    /// Drop a position without an order (liquidation, manual close).
    pub fn wipe_position(&self, symbol: &str) {
        self.state.lock().positions.remove(symbol);
    }

    /// Script the outcome of the next open calls, in order.
    pub fn script_open_faults(&self, faults: &[ScriptedFault]) {
        self.state.lock().faults.opens.extend_from_slice(faults);
    }

    /// Script the outcome of the next close calls, in order.
    pub fn script_close_faults(&self, faults: &[ScriptedFault]) {
        self.state.lock().faults.closes.extend_from_slice(faults);
    }

    pub fn fail_position_reads(&self, fail: bool) {
        self.state.lock().faults.fail_position_reads = fail;
    }

    /// Delay every mutating call by `latency`.
    pub fn set_order_latency(&self, latency: Option<Duration>) {
        self.state.lock().faults.order_latency = latency;
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state.lock().orders.clone()
    }

    pub fn position_size(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .positions
            .get(symbol)
            .map(|p| p.signed_size)
            .unwrap_or(Decimal::ZERO)
    }

    fn next_order_ref(&self) -> String {
        let id = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.venue.short_code(), id)
    }

    fn take_fault(queue: &mut Vec<ScriptedFault>) -> Option<ScriptedFault> {
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().faults.order_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        state: &mut PaperState,
        kind: OrderKind,
        symbol: &str,
        side: Side,
        notional_usd: Decimal,
        opts: OrderOptions,
        filled: bool,
    ) {
        state.orders.push(OrderRecord {
            seq: ORDER_SEQUENCE.fetch_add(1, Ordering::SeqCst),
            kind,
            symbol: symbol.to_string(),
            side,
            notional_usd,
            opts,
            filled,
        });
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn supports_resting_orders(&self) -> bool {
        self.resting_orders
    }

    async fn min_notional_usd(&self, symbol: &str) -> Result<Decimal> {
        let state = self.state.lock();
        Ok(state
            .min_notional_overrides
            .get(symbol)
            .copied()
            .unwrap_or(state.min_notional))
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.state.lock().markets.get(symbol).map(|m| m.mark_price))
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self
            .state
            .lock()
            .markets
            .get(symbol)
            .map(|m| m.funding_rate_hourly))
    }

    async fn get_available_balance(&self) -> Result<Decimal> {
        Ok(self.state.lock().balance)
    }

    async fn get_open_positions(&self) -> Result<Vec<VenuePosition>> {
        let state = self.state.lock();
        if state.faults.fail_position_reads {
            bail!("{} position snapshot unavailable", self.venue);
        }
        Ok(state
            .positions
            .iter()
            .filter(|(_, p)| !p.signed_size.is_zero())
            .map(|(symbol, p)| VenuePosition {
                symbol: symbol.clone(),
                signed_size: p.signed_size,
                opened_at: Some(p.opened_at),
            })
            .collect())
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        notional_usd: Decimal,
        opts: OrderOptions,
    ) -> Result<OrderAck> {
        let _gate = self.order_gate.lock().await;
        self.simulate_latency().await;

        let mut state = self.state.lock();
        let fault = Self::take_fault(&mut state.faults.opens);
        let mark = state.markets.get(symbol).map(|m| m.mark_price);

        let price = match (fault, mark) {
            (Some(ScriptedFault::Error), _) => {
                self.record(&mut state, OrderKind::Open, symbol, side, notional_usd, opts, false);
                return Err(anyhow!("{} order endpoint error for {}", self.venue, symbol));
            }
            (Some(ScriptedFault::Reject), _) | (None, None) => {
                self.record(&mut state, OrderKind::Open, symbol, side, notional_usd, opts, false);
                return Ok(OrderAck::rejected());
            }
            (None, Some(price)) if price <= Decimal::ZERO => {
                self.record(&mut state, OrderKind::Open, symbol, side, notional_usd, opts, false);
                return Ok(OrderAck::rejected());
            }
            (None, Some(price)) => price,
        };

        let quantity = notional_usd / price * side.sign();
        let now = self.clock.now();
        let position = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| PaperPosition {
                signed_size: Decimal::ZERO,
                opened_at: now,
            });
        if position.signed_size.is_zero() {
            position.opened_at = now;
        }
        position.signed_size += quantity;

        self.record(&mut state, OrderKind::Open, symbol, side, notional_usd, opts, true);
        let order_ref = self.next_order_ref();

        info!(
            venue = %self.venue,
            %symbol,
            %side,
            notional = %notional_usd,
            %price,
            order_ref = %order_ref,
            "Paper open filled"
        );

        Ok(OrderAck::filled(order_ref, Some(price)))
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        notional_usd: Decimal,
    ) -> Result<OrderAck> {
        let _gate = self.order_gate.lock().await;
        self.simulate_latency().await;

        let opts = OrderOptions::reduce_only();
        let mut state = self.state.lock();
        let fault = Self::take_fault(&mut state.faults.closes);

        match fault {
            Some(ScriptedFault::Error) => {
                self.record(&mut state, OrderKind::Close, symbol, side, notional_usd, opts, false);
                return Err(anyhow!("{} close endpoint error for {}", self.venue, symbol));
            }
            Some(ScriptedFault::Reject) => {
                self.record(&mut state, OrderKind::Close, symbol, side, notional_usd, opts, false);
                return Ok(OrderAck::rejected());
            }
            None => {}
        }

        let mark = state.markets.get(symbol).map(|m| m.mark_price);
        let current = state.positions.get(symbol).map(|p| p.signed_size);

        // Reduce-only: there must be an opposite position to reduce
        let (price, size) = match (mark, current) {
            (Some(price), Some(size))
                if price > Decimal::ZERO && Side::from_signed_size(size) == Some(side.opposite()) =>
            {
                (price, size)
            }
            _ => {
                self.record(&mut state, OrderKind::Close, symbol, side, notional_usd, opts, false);
                debug!(venue = %self.venue, %symbol, %side, "Reduce-only close rejected, nothing to reduce");
                return Ok(OrderAck::rejected());
            }
        };

        // Reduce-only never flips the position
        let quantity = notional_usd / price;
        let residual_value = (size.abs() - quantity) * price;
        let remaining = if quantity >= size.abs() || residual_value < DUST_NOTIONAL_USD {
            Decimal::ZERO
        } else {
            size + quantity * side.sign()
        };

        if remaining.is_zero() {
            state.positions.remove(symbol);
        } else if let Some(position) = state.positions.get_mut(symbol) {
            position.signed_size = remaining;
        }

        self.record(&mut state, OrderKind::Close, symbol, side, notional_usd, opts, true);
        let order_ref = self.next_order_ref();

        info!(
            venue = %self.venue,
            %symbol,
            %side,
            notional = %notional_usd,
            %price,
            remaining = %remaining,
            order_ref = %order_ref,
            "Paper close filled"
        );

        Ok(OrderAck::filled(order_ref, Some(price)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn create_test_venue() -> PaperVenue {
        let venue = PaperVenue::new(Venue::X10, dec!(1000), Arc::new(ManualClock::starting_now()));
        venue.set_market("BTC-USD", dec!(50000), dec!(0.0001));
        venue
    }

    #[tokio::test]
    async fn test_open_long_then_close_flattens() {
        let venue = create_test_venue();

        let ack = venue
            .open_position("BTC-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .unwrap();
        assert!(ack.ok);
        assert_eq!(venue.position_size("BTC-USD"), dec!(0.002));

        let ack = venue.close_position("BTC-USD", Side::Short, dec!(100)).await.unwrap();
        assert!(ack.ok);
        assert!(venue.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entry_notional_close_after_rally_is_partial() {
        let venue = create_test_venue();
        venue
            .open_position("BTC-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .unwrap();

        // Long is now worth $120, closing $100 leaves a residual
        venue.set_mark_price("BTC-USD", dec!(60000));
        let ack = venue.close_position("BTC-USD", Side::Short, dec!(100)).await.unwrap();
        assert!(ack.ok);
        let residual = venue.position_size("BTC-USD");
        assert!(residual > Decimal::ZERO && residual < dec!(0.002));

        // Oversized reduce-only close flattens without flipping
        let ack = venue.close_position("BTC-USD", Side::Short, dec!(500)).await.unwrap();
        assert!(ack.ok);
        assert_eq!(venue.position_size("BTC-USD"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reduce_only_rejects_same_side() {
        let venue = create_test_venue();
        venue
            .open_position("BTC-USD", Side::Short, dec!(100), OrderOptions::taker())
            .await
            .unwrap();

        let ack = venue.close_position("BTC-USD", Side::Short, dec!(100)).await.unwrap();
        assert!(!ack.ok);
        assert_eq!(venue.position_size("BTC-USD"), dec!(-0.002));
    }

    #[tokio::test]
    async fn test_scripted_faults_apply_in_order() {
        let venue = create_test_venue();
        venue.script_open_faults(&[ScriptedFault::Error, ScriptedFault::Reject]);

        assert!(venue
            .open_position("BTC-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .is_err());
        let ack = venue
            .open_position("BTC-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .unwrap();
        assert!(!ack.ok);
        let ack = venue
            .open_position("BTC-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .unwrap();
        assert!(ack.ok);

        let orders = venue.orders();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders.iter().filter(|o| o.filled).count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_market_is_rejected() {
        let venue = create_test_venue();
        let ack = venue
            .open_position("DOGE-USD", Side::Long, dec!(100), OrderOptions::taker())
            .await
            .unwrap();
        assert!(!ack.ok);
        assert_eq!(venue.get_mark_price("DOGE-USD").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_position_read_failure() {
        let venue = create_test_venue();
        venue.fail_position_reads(true);
        assert!(venue.get_open_positions().await.is_err());
    }
}
