//! Poll-driven transitions: the maintenance tick that backs up the push
//! stream and drives everything time-based.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    discord::MessageSource,
    state::{ArchivedTrade, TradeStatus},
    engine::TradeEngine,
    venue::{Side, Venue},
};

const ARCHIVE_AFTER_SECS: i64 = 86_400;

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    /// One full maintenance pass. Every step logs and absorbs its own
    /// failures; a venue hiccup on one trade never starves the rest.
    pub async fn run_maintenance(&mut self, now: i64) {
        self.poll_pending_fills(now).await;
        self.retry_post_orders().await;
        self.check_tp1_fallback().await;
        self.expire_entries(now).await;
        self.detect_closes(now).await;
        self.check_position_alerts().await;
        self.archive_old(now);
    }

    /// Poll path of entry-fill reconciliation: a pending trade whose symbol
    /// shows a live position has filled, whether or not the push stream said
    /// so.
    pub(super) async fn poll_pending_fills(&mut self, now: i64) {
        let pending: Vec<(String, String)> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status == TradeStatus::Pending)
            .map(|t| (t.id.clone(), t.symbol.clone()))
            .collect();
        for (trade_id, symbol) in pending {
            match self.position_for(&symbol).await {
                Ok(Some(position))
                    if position.size > Decimal::ZERO && position.avg_price > Decimal::ZERO =>
                {
                    self.entry_fill(&trade_id, Some(position.avg_price), now).await;
                }
                Ok(_) => {}
                Err(error) => warn!(%symbol, ?error, "pending-fill poll failed"),
            }
        }
    }

    /// Fills whose post-entry placement was deferred (no position size yet,
    /// transient failure) get another attempt every tick.
    async fn retry_post_orders(&mut self) {
        let deferred: Vec<String> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status == TradeStatus::Open && !t.post_orders_placed)
            .map(|t| t.id.clone())
            .collect();
        for trade_id in deferred {
            if let Err(error) = self.place_post_entry_orders(&trade_id).await {
                warn!(%trade_id, ?error, "post-entry retry failed");
            }
        }
    }

    /// If the TP1 order vanished from the book without a push event, treat it
    /// as filled and migrate the stop to break-even. "Filled" and "cancelled
    /// externally" are deliberately not distinguished; both get the
    /// conservative action.
    async fn check_tp1_fallback(&mut self) {
        if self.cfg.dry_run {
            return;
        }
        let candidates: Vec<(String, String, String, Decimal)> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status == TradeStatus::Open && t.post_orders_placed && !t.sl_moved_to_be)
            .filter_map(|t| {
                t.tp1_order_id.as_ref().map(|oid| {
                    (
                        t.id.clone(),
                        t.symbol.clone(),
                        oid.clone(),
                        t.entry_price.unwrap_or(t.trigger),
                    )
                })
            })
            .collect();

        for (trade_id, symbol, tp1_order_id, be_price) in candidates {
            let orders = match self.venue.open_orders(&self.cfg.category, &symbol).await {
                Ok(orders) => orders,
                Err(error) => {
                    debug!(%symbol, ?error, "TP1 fallback check failed");
                    continue;
                }
            };
            let tp1_still_open = orders.iter().any(|o| o.order_id == tp1_order_id);
            if !tp1_still_open && self.move_stop_loss(&symbol, be_price).await {
                if let Some(record) = self.state.open_trades.get_mut(&trade_id) {
                    record.sl_moved_to_be = true;
                    record.sl_price = Some(be_price);
                    record.tp_fills.insert(1);
                    info!(%symbol, %be_price, "SL -> BE (poll fallback)");
                    self.mark_dirty();
                }
            }
        }
    }

    /// A trigger that never armed within the window is stood down.
    async fn expire_entries(&mut self, now: i64) {
        let expired: Vec<(String, String, Option<String>)> = self
            .state
            .open_trades
            .values()
            .filter(|t| {
                t.status == TradeStatus::Pending
                    && now - t.placed_ts > self.cfg.entry_expiration_min * 60
            })
            .map(|t| (t.id.clone(), t.symbol.clone(), t.entry_order_id.clone()))
            .collect();

        for (trade_id, symbol, entry_order_id) in expired {
            if let Some(order_id) = entry_order_id
                && let Err(error) = self.cancel_order_guarded(&symbol, &order_id).await
            {
                // Venue-side "order not exists" just means it already went away.
                warn!(%symbol, %trade_id, ?error, "expired entry cancel failed");
            }
            if let Some(record) = self.state.open_trades.get_mut(&trade_id)
                && record.transition_to(TradeStatus::Expired)
            {
                info!(%symbol, %trade_id, "entry expired");
                self.mark_dirty();
            }
        }
    }

    /// A zero-size position means the venue closed us out (stop, trailing
    /// stop, final TP). Residual ladder orders are swept and the trade gets
    /// its final accounting.
    async fn detect_closes(&mut self, now: i64) {
        let open: Vec<(String, String)> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| (t.id.clone(), t.symbol.clone()))
            .collect();

        for (trade_id, symbol) in open {
            let size = match self.position_for(&symbol).await {
                Ok(position) => position.map(|p| p.size).unwrap_or(Decimal::ZERO),
                Err(error) => {
                    warn!(%symbol, ?error, "close detection failed");
                    continue;
                }
            };
            if size > Decimal::ZERO {
                continue;
            }
            self.cancel_residual_orders(&symbol, &format!("{trade_id}:")).await;
            if let Some(record) = self.state.open_trades.get_mut(&trade_id) {
                if !record.transition_to(TradeStatus::Closed) {
                    continue;
                }
                record.closed_ts = Some(now);
                self.mark_dirty();
            }
            info!(%symbol, %trade_id, "TRADE CLOSED");
            self.finalize_close(&trade_id).await;
        }
    }

    pub(super) async fn cancel_residual_orders(&self, symbol: &str, link_prefix: &str) {
        let orders = match self.venue.open_orders(&self.cfg.category, symbol).await {
            Ok(orders) => orders,
            Err(error) => {
                warn!(%symbol, ?error, "residual order sweep failed");
                return;
            }
        };
        let mut cancelled = 0u32;
        for order in orders {
            if !order.order_link_id.starts_with(link_prefix) {
                continue;
            }
            match self.cancel_order_guarded(symbol, &order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(error) => {
                    warn!(%symbol, link = %order.order_link_id, ?error, "residual cancel failed")
                }
            }
        }
        if cancelled > 0 {
            info!(%symbol, cancelled, "cleaned up residual orders");
        }
    }

    /// Leveraged position drawdown alerts, one per trade per threshold.
    async fn check_position_alerts(&mut self) {
        if self.cfg.position_alert_thresholds.is_empty() {
            return;
        }
        let mut thresholds = self.cfg.position_alert_thresholds.clone();
        thresholds.sort();

        let open: Vec<(String, String, Side, u32)> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| (t.id.clone(), t.symbol.clone(), t.order_side, t.leverage))
            .collect();

        for (trade_id, symbol, side, leverage) in open {
            let Ok(Some(position)) = self.position_for(&symbol).await else {
                continue;
            };
            if position.size <= Decimal::ZERO || position.avg_price <= Decimal::ZERO {
                continue;
            }
            let last = match self.venue.last_price(&self.cfg.category, &symbol).await {
                Ok(last) => last,
                Err(error) => {
                    debug!(%symbol, ?error, "alert price fetch failed");
                    continue;
                }
            };
            let entry = position.avg_price;
            let move_pct = match side {
                Side::Sell => (entry - last) / entry * Decimal::ONE_HUNDRED,
                Side::Buy => (last - entry) / entry * Decimal::ONE_HUNDRED,
            };
            let pnl_pct = move_pct * Decimal::from(leverage);

            for threshold in &thresholds {
                let key = format!("{trade_id}:{threshold}");
                let already_sent = self
                    .state
                    .open_trades
                    .get(&trade_id)
                    .is_some_and(|t| t.alerts_sent.contains(&key));
                if already_sent || pnl_pct > -*threshold {
                    continue;
                }
                warn!(
                    %symbol,
                    %side,
                    pnl_pct = %pnl_pct.round_dp(1),
                    avg_entry = %entry,
                    current = %last,
                    threshold = %threshold,
                    "position drawdown alert"
                );
                if let Some(record) = self.state.open_trades.get_mut(&trade_id) {
                    record.alerts_sent.insert(key);
                    self.mark_dirty();
                }
            }
        }
    }

    /// Terminal trades older than a day move to the bounded history.
    fn archive_old(&mut self, now: i64) {
        let cutoff = now - ARCHIVE_AFTER_SECS;
        let stale: Vec<String> = self
            .state
            .open_trades
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TradeStatus::Closed | TradeStatus::Expired | TradeStatus::Cancelled
                ) && t.closed_ts.unwrap_or(t.placed_ts) < cutoff
            })
            .map(|t| t.id.clone())
            .collect();

        for trade_id in stale {
            let Some(record) = self.state.open_trades.remove(&trade_id) else {
                continue;
            };
            let tp_count = record.planned_tp_count(self.cfg.fallback_tp_pct.len()) as u32;
            let dca_count = record.dca_prices.len().min(self.cfg.dca_qty_mults.len()) as u32;
            self.state.archive(ArchivedTrade {
                id: record.id.clone(),
                symbol: record.symbol,
                side: record.position_side,
                entry_price: record.entry_price,
                trigger: record.trigger,
                placed_ts: record.placed_ts,
                filled_ts: record.filled_ts,
                closed_ts: record.closed_ts,
                realized_pnl: record.realized_pnl,
                is_win: record.is_win,
                exit_reason: record.exit_reason,
                tp_fills: record.tp_fills.len() as u32,
                tp_count,
                dca_fills: record.dca_fills.len() as u32,
                dca_count,
                trailing_used: record.trailing_started,
            });
            debug!(trade_id = %record.id, "archived");
            self.mark_dirty();
        }
    }
}
