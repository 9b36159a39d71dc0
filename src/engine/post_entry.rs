//! Post-entry order composition: stop loss, reduce-only TP ladder, and the
//! conditional DCA ladder, dispatched concurrently once the entry fills.
//!
//! Partial failure is tolerated: each sub-order's outcome lands in the record
//! independently, and `post_orders_placed` is set regardless so the flow is
//! idempotent. A missing TP1 id just shifts break-even detection to the poll
//! fallback.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    discord::MessageSource,
    engine::{TradeEngine, entry::trigger_direction},
    state::TradeStatus,
    venue::{InstrumentRules, OrderRequest, Side, TradingStopRequest, Venue, VenueError},
};

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    pub(super) async fn place_post_entry_orders(
        &mut self,
        trade_id: &str,
    ) -> Result<(), VenueError> {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return Ok(());
        };
        if record.status != TradeStatus::Open {
            return Ok(());
        }
        if record.post_orders_placed {
            debug!(%trade_id, "post-entry orders already placed");
            return Ok(());
        }

        let symbol = record.symbol.clone();
        let side = record.order_side;
        let entry = record.entry_price.unwrap_or(record.trigger);
        let base_qty = record.base_qty;
        let signal_sl = record.sl_price;
        let tp_prices = record.tp_prices.clone();
        let splits = if record.tp_splits.is_empty() {
            self.cfg.tp_splits.clone()
        } else {
            record.tp_splits.clone()
        };
        let dca_prices = record.dca_prices.clone();

        let rules = self.rules(&symbol).await?;

        // Position size drives the TP quantities; it can lag the fill by a
        // moment, in which case the maintenance tick retries the whole step.
        let size = match self.position_for(&symbol).await? {
            Some(position) if position.size > Decimal::ZERO => position.size,
            _ => {
                warn!(%symbol, "no position size yet; post-entry orders deferred");
                return Ok(());
            }
        };

        let sl_pct = self.cfg.initial_sl_pct / Decimal::ONE_HUNDRED;
        let sl_price = signal_sl.unwrap_or_else(|| match side {
            Side::Sell => entry * (Decimal::ONE + sl_pct),
            Side::Buy => entry * (Decimal::ONE - sl_pct),
        });
        let sl_price = self.round_price(sl_price, &rules);

        let tp_prices = if tp_prices.is_empty() {
            let fallback = self.fallback_tps(entry, side, &rules);
            info!(%symbol, ?fallback, "signal had no targets; using fallback TP ladder");
            fallback
        } else {
            tp_prices
        };
        let tp_requests = self.build_tp_requests(&symbol, side, trade_id, size, &tp_prices, &splits, &rules);
        let placed_split: Decimal = splits.iter().take(tp_requests.len()).sum();
        info!(
            %symbol,
            tps = tp_requests.len(),
            runner_pct = %(Decimal::ONE_HUNDRED - placed_split),
            "placing TP ladder"
        );

        let dca_count = dca_prices.len().min(self.cfg.dca_qty_mults.len());
        let dca_requests = if dca_count > 0 {
            let last = self.venue.last_price(&self.cfg.category, &symbol).await?;
            self.build_dca_requests(&symbol, side, trade_id, base_qty, &dca_prices[..dca_count], last, &rules)
        } else {
            Vec::new()
        };

        let sl_request = TradingStopRequest {
            category: self.cfg.category.clone(),
            symbol: symbol.clone(),
            position_idx: 0,
            tpsl_mode: "Full".to_string(),
            stop_loss: Some(sl_price),
            trailing_stop: None,
            active_price: None,
        };

        let (sl_result, tp_results, dca_results) = tokio::join!(
            self.set_trading_stop_guarded(&sl_request),
            self.place_tagged_orders(&tp_requests),
            self.place_tagged_orders(&dca_requests),
        );

        match sl_result {
            Ok(()) => info!(%symbol, %sl_price, "SL installed"),
            Err(error) => warn!(%symbol, ?error, "SL install failed"),
        }

        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return Ok(());
        };
        for (idx, result) in tp_results {
            match result {
                Ok(order_id) => {
                    if idx == 1 {
                        record.tp1_order_id = Some(order_id.clone());
                    }
                    record.tp_order_ids.insert(idx, order_id);
                }
                Err(error) => warn!(%symbol, tp = idx, ?error, "TP placement failed"),
            }
        }
        for (idx, result) in dca_results {
            if let Err(error) = result {
                warn!(%symbol, dca = idx, ?error, "DCA placement failed");
            }
        }
        record.sl_price = Some(sl_price);
        record.post_orders_placed = true;
        self.mark_dirty();
        Ok(())
    }

    pub(super) fn fallback_tps(
        &self,
        entry: Decimal,
        side: Side,
        rules: &InstrumentRules,
    ) -> Vec<Decimal> {
        self.cfg
            .fallback_tp_pct
            .iter()
            .map(|pct| {
                let distance = *pct / Decimal::ONE_HUNDRED;
                let price = match side {
                    Side::Sell => entry * (Decimal::ONE - distance),
                    Side::Buy => entry * (Decimal::ONE + distance),
                };
                self.round_price(price, rules)
            })
            .collect()
    }

    /// Reduce-only limit per TP level; quantity is the configured split of
    /// the live position size. Splits may sum below 100% (runner).
    pub(super) fn build_tp_requests(
        &self,
        symbol: &str,
        side: Side,
        trade_id: &str,
        size: Decimal,
        tp_prices: &[Decimal],
        splits: &[Decimal],
        rules: &InstrumentRules,
    ) -> Vec<(u32, OrderRequest)> {
        let count = tp_prices.len().min(splits.len());
        (0..count)
            .filter_map(|idx| {
                let pct = splits[idx];
                if pct <= Decimal::ZERO {
                    return None;
                }
                let n = idx as u32 + 1;
                Some((
                    n,
                    OrderRequest {
                        category: self.cfg.category.clone(),
                        symbol: symbol.to_string(),
                        side: side.opposite(),
                        order_type: "Limit".to_string(),
                        qty: self.round_qty(size * pct / Decimal::ONE_HUNDRED, rules),
                        price: Some(self.round_price(tp_prices[idx], rules)),
                        time_in_force: "GTC".to_string(),
                        trigger_direction: None,
                        trigger_price: None,
                        trigger_by: None,
                        reduce_only: true,
                        close_on_trigger: false,
                        order_link_id: format!("{trade_id}:TP{n}"),
                    },
                ))
            })
            .collect()
    }

    /// Same-side conditional limits at each DCA level, sized as a multiple of
    /// the base quantity.
    pub(super) fn build_dca_requests(
        &self,
        symbol: &str,
        side: Side,
        trade_id: &str,
        base_qty: Decimal,
        dca_prices: &[Decimal],
        last: Decimal,
        rules: &InstrumentRules,
    ) -> Vec<(u32, OrderRequest)> {
        dca_prices
            .iter()
            .zip(&self.cfg.dca_qty_mults)
            .enumerate()
            .map(|(idx, (price, mult))| {
                let n = idx as u32 + 1;
                let price = self.round_price(*price, rules);
                (
                    n,
                    OrderRequest {
                        category: self.cfg.category.clone(),
                        symbol: symbol.to_string(),
                        side,
                        order_type: "Limit".to_string(),
                        qty: self.round_qty(base_qty * *mult, rules),
                        price: Some(price),
                        time_in_force: "GTC".to_string(),
                        trigger_direction: Some(trigger_direction(last, price)),
                        trigger_price: Some(price),
                        trigger_by: Some("LastPrice".to_string()),
                        reduce_only: false,
                        close_on_trigger: false,
                        order_link_id: format!("{trade_id}:DCA{n}"),
                    },
                )
            })
            .collect()
    }

    /// Fans the batch out concurrently; outcomes come back per order.
    pub(super) async fn place_tagged_orders(
        &self,
        requests: &[(u32, OrderRequest)],
    ) -> Vec<(u32, Result<String, VenueError>)> {
        join_all(requests.iter().map(|(idx, request)| async move {
            (*idx, self.place_order_guarded(request).await)
        }))
        .await
    }
}
