//! The trade engine: every mutation of the ledger funnels through this type,
//! owned by a single supervisor task. Venue and chat I/O go through the
//! generic collaborators so the scenario tests can script them.

mod amend;
mod close;
mod entry;
mod events;
mod maintenance;
mod post_entry;
mod stats;

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use entry::{Admission, RejectReason};

use crate::{
    config::Config,
    discord::{ChatError, MessageSource},
    state::{BotState, utc_day_key},
    util::{round_qty, round_to_tick},
    venue::{
        InstrumentRules,
        OrderRequest,
        Position,
        TradingStopRequest,
        Venue,
        VenueError,
    },
};

const RULES_TTL: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Venue: {0}")]
    Venue(#[from] VenueError),
    #[error("Chat: {0}")]
    Chat(#[from] ChatError),
}

struct CachedRules {
    rules: InstrumentRules,
    fetched_at: Instant,
}

/// Equity snapshot and derived size for a new entry.
#[derive(Clone, Copy, Debug)]
pub struct SizedEntry {
    pub qty: Decimal,
    pub equity: Decimal,
    pub risk_amount: Decimal,
}

pub struct TradeEngine<V, M> {
    venue: V,
    chat: M,
    cfg: Config,
    state: BotState,
    rules_cache: Mutex<HashMap<String, CachedRules>>,
    last_stats_day: String,
    dirty: bool,
}

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    pub fn new(venue: V, chat: M, cfg: Config, state: BotState) -> Self {
        Self {
            venue,
            chat,
            cfg,
            state,
            rules_cache: Mutex::new(HashMap::new()),
            last_stats_day: String::new(),
            dirty: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn last_seen_msg_id(&self) -> Option<&str> {
        self.state.last_seen_msg_id.as_deref()
    }

    pub fn set_last_seen_msg_id(&mut self, id: &str) {
        self.state.last_seen_msg_id = Some(id.to_string());
        self.dirty = true;
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Writes the ledger snapshot if anything changed since the last call.
    /// A failed save is surfaced and retried on the next batch.
    pub fn persist(&mut self) {
        if !self.dirty {
            return;
        }
        match self.state.save(&self.cfg.state_file) {
            Ok(()) => self.dirty = false,
            Err(error) => error!(?error, path = %self.cfg.state_file.display(), "state save failed"),
        }
    }

    /// Instrument rules with a short TTL; the venue only changes these with
    /// instrument re-listings.
    async fn rules(&self, symbol: &str) -> Result<InstrumentRules, VenueError> {
        if let Some(cached) = self.rules_cache.lock().unwrap().get(symbol)
            && cached.fetched_at.elapsed() < RULES_TTL
        {
            return Ok(cached.rules);
        }
        let rules = self
            .venue
            .instrument_rules(&self.cfg.category, symbol)
            .await?;
        self.rules_cache.lock().unwrap().insert(
            symbol.to_string(),
            CachedRules {
                rules,
                fetched_at: Instant::now(),
            },
        );
        Ok(rules)
    }

    fn round_price(&self, price: Decimal, rules: &InstrumentRules) -> Decimal {
        round_to_tick(price, rules.tick_size)
    }

    fn round_qty(&self, qty: Decimal, rules: &InstrumentRules) -> Decimal {
        round_qty(qty, rules.qty_step, rules.min_qty)
    }

    /// Risk model: margin = equity * risk%, notional = margin * leverage,
    /// qty = notional / price, floored to lot step and clamped to min qty.
    async fn sized_entry(
        &self,
        symbol: &str,
        price: Decimal,
        rules: &InstrumentRules,
    ) -> Result<SizedEntry, VenueError> {
        let equity = self.venue.wallet_equity(&self.cfg.account_type).await?;
        let risk_amount = equity * self.cfg.risk_pct / Decimal::ONE_HUNDRED;
        let notional = risk_amount * Decimal::from(self.cfg.leverage);
        let qty = self.round_qty(notional / price, rules);
        debug!(%symbol, %equity, %risk_amount, %qty, "sized entry");
        Ok(SizedEntry {
            qty,
            equity,
            risk_amount,
        })
    }

    async fn position_for(&self, symbol: &str) -> Result<Option<Position>, VenueError> {
        let positions = self
            .venue
            .positions(&self.cfg.category, Some(symbol))
            .await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    async fn place_order_guarded(&self, request: &OrderRequest) -> Result<String, VenueError> {
        if self.cfg.dry_run {
            info!(link = %request.order_link_id, ?request, "DRY_RUN place_order");
            return Ok(format!("DRY:{}", request.order_link_id));
        }
        self.venue.place_order(request).await
    }

    async fn cancel_order_guarded(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        if self.cfg.dry_run {
            info!(%symbol, %order_id, "DRY_RUN cancel_order");
            return Ok(());
        }
        self.venue
            .cancel_order(&self.cfg.category, symbol, order_id)
            .await
    }

    async fn set_trading_stop_guarded(
        &self,
        request: &TradingStopRequest,
    ) -> Result<(), VenueError> {
        if self.cfg.dry_run {
            info!(symbol = %request.symbol, ?request, "DRY_RUN set_trading_stop");
            return Ok(());
        }
        self.venue.set_trading_stop(request).await
    }

    /// Scans venue positions at startup. Positions without a ledger record
    /// are surfaced loudly and left alone; their lifecycle state is gone and
    /// guessing at it is worse than not managing them.
    pub async fn startup_sync(&self) {
        if self.cfg.dry_run {
            info!("DRY_RUN: skipping startup sync");
            return;
        }
        let positions = match self.venue.positions(&self.cfg.category, None).await {
            Ok(positions) => positions,
            Err(error) => {
                warn!(?error, "startup sync failed");
                return;
            }
        };
        let open: Vec<&Position> = positions
            .iter()
            .filter(|p| p.size > Decimal::ZERO)
            .collect();
        if open.is_empty() {
            info!("startup sync: no open positions");
        } else {
            let tracked: std::collections::HashSet<&str> = self
                .state
                .open_trades
                .values()
                .filter(|t| t.status.is_active())
                .map(|t| t.symbol.as_str())
                .collect();
            let orphaned: Vec<&Position> = open
                .iter()
                .copied()
                .filter(|p| !tracked.contains(p.symbol.as_str()))
                .collect();
            if orphaned.is_empty() {
                info!(count = open.len(), "startup sync: all positions tracked");
            } else {
                warn!("orphaned positions (not tracked by this instance):");
                for p in &orphaned {
                    warn!(
                        "   -> {} ({} {} @ {}, uPnL: {})",
                        p.symbol,
                        p.side,
                        p.size,
                        p.avg_price,
                        p.unrealised_pnl.unwrap_or_default(),
                    );
                }
                warn!("   these positions will NOT be managed");
            }
        }
        if !self.state.trade_history.is_empty() {
            self.log_performance_report();
        }
    }

    /// Periodic liveness log; rolls the daily stats once per UTC day.
    pub fn heartbeat(&mut self, now: i64) {
        let today = utc_day_key(now);
        if self.last_stats_day == today {
            return;
        }
        if !self.last_stats_day.is_empty() {
            let count = self
                .state
                .daily_counts
                .get(&self.last_stats_day)
                .copied()
                .unwrap_or(0);
            info!(day = %self.last_stats_day, trades = count, "daily stats");
            self.log_performance_report();
        }
        self.last_stats_day = today;
    }
}
