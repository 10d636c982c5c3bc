//! Symbol blacklist, global pause and per-symbol coordination state.
//!
//! All entries are in-memory and time-based through the injected clock:
//! - per-symbol cooldowns after a leg failure (`block`)
//! - a global pause, the blacklist entry with no symbol key (`pause_all`)
//! - claims held by a coordinator while it mutates a symbol
//! - the time each symbol last had an open order submitted, read by the
//!   reconciliation grace window

use crate::utils::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CooldownState {
    blocked_until: HashMap<String, DateTime<Utc>>,
    paused_until: Option<DateTime<Utc>>,
    claims: HashSet<String>,
    submissions: HashMap<String, DateTime<Utc>>,
}

/// Blacklist/backoff store shared by the coordinators and the guardian.
pub struct CooldownStore {
    clock: Arc<dyn Clock>,
    state: Mutex<CooldownState>,
}

impl CooldownStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(CooldownState::default()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a new open on `symbol` must be refused right now.
    ///
    /// True while the symbol is blacklisted or the global pause is active.
    pub fn is_blocked(&self, symbol: &str) -> bool {
        self.is_paused() || self.is_blacklisted(symbol)
    }

    /// Per-symbol cooldown only. Expired entries are dropped on read.
    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.blocked_until.get(symbol) {
            Some(until) if *until > now => true,
            Some(_) => {
                state.blocked_until.remove(symbol);
                false
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.paused_until {
            Some(until) if until > now => true,
            Some(_) => {
                state.paused_until = None;
                false
            }
            None => false,
        }
    }

    /// Blacklist `symbol` for `duration`. Never shortens an existing entry.
    pub fn block(&self, symbol: &str, duration: Duration) {
        let until = self.clock.now() + duration;
        let mut state = self.state.lock();
        let entry = state
            .blocked_until
            .entry(symbol.to_string())
            .or_insert(until);
        if *entry < until {
            *entry = until;
        }
        warn!(
            %symbol,
            cooldown_secs = duration.num_seconds(),
            until = %entry,
            "Symbol blacklisted"
        );
    }

    /// Pause every new open for `duration`. Never shortens an active pause.
    pub fn pause_all(&self, duration: Duration) {
        let until = self.clock.now() + duration;
        let mut state = self.state.lock();
        let until = state.paused_until.map_or(until, |current| current.max(until));
        state.paused_until = Some(until);
        warn!(
            pause_secs = duration.num_seconds(),
            %until,
            "Global entry pause activated"
        );
    }

    /// Remaining cooldown for a symbol, if any.
    pub fn remaining(&self, symbol: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.state
            .lock()
            .blocked_until
            .get(symbol)
            .map(|until| *until - now)
            .filter(|left| *left > Duration::zero())
    }

    /// Drop expired cooldowns, stale submissions and an elapsed pause.
    ///
    /// Returns the number of symbol cooldowns removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let before = state.blocked_until.len();
        state.blocked_until.retain(|_, until| *until > now);
        let removed = before - state.blocked_until.len();

        if matches!(state.paused_until, Some(until) if until <= now) {
            state.paused_until = None;
            info!("Global entry pause expired");
        }

        // Submissions only matter for the reconciliation grace window
        let horizon = now - Duration::hours(1);
        state.submissions.retain(|_, at| *at > horizon);

        if removed > 0 {
            debug!(removed, "Expired cooldowns cleared");
        }
        removed
    }

    /// Symbols currently under a per-symbol cooldown.
    pub fn blocked_symbols(&self) -> HashSet<String> {
        let now = self.clock.now();
        self.state
            .lock()
            .blocked_until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Take exclusive ownership of a symbol for a mutating action.
    ///
    /// Returns `None` if another coordinator already holds it. The claim is
    /// released when the returned guard drops.
    pub fn claim(self: &Arc<Self>, symbol: &str) -> Option<SymbolClaim> {
        let mut state = self.state.lock();
        if !state.claims.insert(symbol.to_string()) {
            debug!(%symbol, "Symbol already claimed");
            return None;
        }
        Some(SymbolClaim {
            store: Arc::clone(self),
            symbol: symbol.to_string(),
        })
    }

    pub fn is_claimed(&self, symbol: &str) -> bool {
        self.state.lock().claims.contains(symbol)
    }

    /// Record that an opening order was just submitted for `symbol`.
    pub fn note_submission(&self, symbol: &str) {
        let now = self.clock.now();
        self.state.lock().submissions.insert(symbol.to_string(), now);
    }

    pub fn last_submission(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.state.lock().submissions.get(symbol).copied()
    }

    fn release(&self, symbol: &str) {
        self.state.lock().claims.remove(symbol);
    }
}

/// Exclusive hold on a symbol; released on drop.
pub struct SymbolClaim {
    store: Arc<CooldownStore>,
    symbol: String,
}

impl SymbolClaim {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Drop for SymbolClaim {
    fn drop(&mut self) {
        self.store.release(&self.symbol);
    }
}
