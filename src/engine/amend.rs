//! Reconciliation against the source message: signal revocation and
//! amendments (moved SL, replaced targets, late DCA levels).

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    discord::MessageSource,
    engine::{EngineError, TradeEngine},
    parser,
    state::TradeStatus,
    venue::Venue,
};

/// Provider reposts quote prices verbatim; anything beyond this is a real
/// amendment rather than formatting noise.
const PRICE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 9);

fn tp_vectors_differ(a: &[Decimal], b: &[Decimal]) -> bool {
    a.len() != b.len()
        || a.iter()
            .zip(b)
            .any(|(x, y)| (*x - *y).abs() > PRICE_EPSILON)
}

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    /// Re-reads the source message of every active trade and reconciles the
    /// record (and the venue) with what the provider now says.
    pub async fn check_signal_updates(&mut self, now: i64) {
        let active: Vec<String> = self
            .state
            .open_trades
            .values()
            .filter(|t| t.status.is_active())
            .map(|t| t.id.clone())
            .collect();
        for trade_id in active {
            if let Err(error) = self.sync_with_source(&trade_id, now).await {
                warn!(%trade_id, ?error, "signal update check failed");
            }
        }
    }

    async fn sync_with_source(&mut self, trade_id: &str, now: i64) -> Result<(), EngineError> {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return Ok(());
        };
        let source_msg_id = record.source_msg_id.clone();
        let symbol = record.symbol.clone();
        let status = record.status;
        let stored_sl = record.sl_price;
        let stored_tps = record.tp_prices.clone();
        let stored_dcas = record.dca_prices.clone();
        let sl_moved_to_be = record.sl_moved_to_be;
        let post_orders_placed = record.post_orders_placed;

        let Some(message) = self.chat.fetch_message(&source_msg_id).await? else {
            debug!(%trade_id, %source_msg_id, "source message gone");
            return Ok(());
        };
        let text = message.extract_text();

        if parser::classify_status(&text).is_revoked() {
            self.revoke_trade(trade_id, now).await;
            return Ok(());
        }

        let Some(update) = parser::parse_update(&text) else {
            return Ok(());
        };

        // SL amendment. Once the stop sits at break-even the provider's SL is
        // stale by definition and is ignored.
        if let Some(new_sl) = update.sl_price
            && !sl_moved_to_be
            && stored_sl != Some(new_sl)
        {
            if status == TradeStatus::Open {
                let rounded = match self.rules(&symbol).await {
                    Ok(rules) => self.round_price(new_sl, &rules),
                    Err(_) => new_sl,
                };
                if self.move_stop_loss(&symbol, rounded).await
                    && let Some(record) = self.state.open_trades.get_mut(trade_id)
                {
                    record.sl_price = Some(rounded);
                    info!(%symbol, %rounded, "SL amended from signal");
                    self.mark_dirty();
                }
            } else if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.sl_price = Some(new_sl);
                info!(%symbol, %new_sl, "pending SL updated from signal");
                self.mark_dirty();
            }
        }

        // TP amendment: replace the whole ladder atomically.
        if !update.tp_prices.is_empty() && tp_vectors_differ(&update.tp_prices, &stored_tps) {
            if status == TradeStatus::Open && post_orders_placed {
                self.replace_tp_ladder(trade_id, &update.tp_prices).await?;
            } else if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.tp_prices = update.tp_prices.clone();
                info!(%symbol, tps = ?update.tp_prices, "pending TP targets updated from signal");
                self.mark_dirty();
            }
        }

        // DCA levels appearing on a signal that had none.
        if stored_dcas.is_empty() && !update.dca_prices.is_empty() {
            if status == TradeStatus::Open && post_orders_placed {
                self.install_dca_ladder(trade_id, &update.dca_prices).await?;
            } else if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.dca_prices = update.dca_prices.clone();
                info!(%symbol, dcas = ?update.dca_prices, "pending DCA levels updated from signal");
                self.mark_dirty();
            }
        }

        Ok(())
    }

    /// The provider retracted the call: stand down whatever is still live.
    pub(super) async fn revoke_trade(&mut self, trade_id: &str, now: i64) {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return;
        };
        let symbol = record.symbol.clone();
        let status = record.status;
        let entry_order_id = record.entry_order_id.clone();
        let link_prefix = record.link_prefix();

        match status {
            TradeStatus::Pending => {
                if let Some(order_id) = entry_order_id
                    && let Err(error) = self.cancel_order_guarded(&symbol, &order_id).await
                {
                    warn!(%symbol, ?error, "revoked entry cancel failed");
                }
            }
            TradeStatus::Open => {
                self.cancel_residual_orders(&symbol, &link_prefix).await;
            }
            _ => return,
        }

        if let Some(record) = self.state.open_trades.get_mut(trade_id)
            && record.transition_to(TradeStatus::Cancelled)
        {
            record.exit_reason = Some("signal_revoked".to_string());
            record.closed_ts = Some(now);
            info!(%symbol, %trade_id, "trade cancelled: signal revoked");
            self.mark_dirty();
        }
    }

    /// Cancels every live TP order of the trade, then lays the new ladder
    /// against the current position size.
    async fn replace_tp_ladder(
        &mut self,
        trade_id: &str,
        new_tps: &[Decimal],
    ) -> Result<(), EngineError> {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return Ok(());
        };
        let symbol = record.symbol.clone();
        let side = record.order_side;
        let splits = if record.tp_splits.is_empty() {
            self.cfg.tp_splits.clone()
        } else {
            record.tp_splits.clone()
        };
        let tp_link_prefix = format!("{trade_id}:TP");

        let size = match self.position_for(&symbol).await? {
            Some(position) if position.size > Decimal::ZERO => position.size,
            _ => {
                debug!(%symbol, "no position left; skipping TP replacement");
                return Ok(());
            }
        };
        let rules = self.rules(&symbol).await?;

        self.cancel_residual_orders(&symbol, &tp_link_prefix).await;

        let requests =
            self.build_tp_requests(&symbol, side, trade_id, size, new_tps, &splits, &rules);
        let results = self.place_tagged_orders(&requests).await;

        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return Ok(());
        };
        record.tp_order_ids.clear();
        record.tp1_order_id = None;
        for (idx, result) in results {
            match result {
                Ok(order_id) => {
                    if idx == 1 {
                        record.tp1_order_id = Some(order_id.clone());
                    }
                    record.tp_order_ids.insert(idx, order_id);
                }
                Err(error) => warn!(%symbol, tp = idx, ?error, "amended TP placement failed"),
            }
        }
        record.tp_prices = new_tps.to_vec();
        info!(%symbol, count = record.tp_order_ids.len(), "TP ladder replaced from signal update");
        self.mark_dirty();
        Ok(())
    }

    async fn install_dca_ladder(
        &mut self,
        trade_id: &str,
        dca_prices: &[Decimal],
    ) -> Result<(), EngineError> {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return Ok(());
        };
        let symbol = record.symbol.clone();
        let side = record.order_side;
        let base_qty = record.base_qty;

        let count = dca_prices.len().min(self.cfg.dca_qty_mults.len());
        if count == 0 {
            return Ok(());
        }
        let rules = self.rules(&symbol).await?;
        let last = self.venue.last_price(&self.cfg.category, &symbol).await?;
        let requests = self.build_dca_requests(
            &symbol,
            side,
            trade_id,
            base_qty,
            &dca_prices[..count],
            last,
            &rules,
        );
        let results = self.place_tagged_orders(&requests).await;
        for (idx, result) in &results {
            if let Err(error) = result {
                warn!(%symbol, dca = idx, ?error, "late DCA placement failed");
            }
        }

        if let Some(record) = self.state.open_trades.get_mut(trade_id) {
            record.dca_prices = dca_prices.to_vec();
            info!(%symbol, count, "DCA ladder installed from signal update");
            self.mark_dirty();
        }
        Ok(())
    }
}
