//! Execution-driven transitions from the private push stream.
//!
//! The same fill can also be observed by the poll path; both converge on the
//! flags (`post_orders_placed`, `sl_moved_to_be`, `trailing_started`) and on
//! set membership, so replays are no-ops.

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::{
    discord::MessageSource,
    engine::TradeEngine,
    state::TradeStatus,
    venue::{ExecutionEvent, StreamEvent, TradingStopRequest, Venue},
};

const SL_MOVE_RETRIES: usize = 3;
const SL_MOVE_RETRY_DELAY: Duration = Duration::from_millis(100);

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    pub async fn on_stream_event(&mut self, event: StreamEvent, now: i64) {
        match event {
            StreamEvent::Resubscribed => {
                info!("private stream (re)subscribed; reconciling pending fills");
                self.poll_pending_fills(now).await;
            }
            StreamEvent::Execution(execution) => self.on_execution(execution, now).await,
        }
    }

    async fn on_execution(&mut self, execution: ExecutionEvent, now: i64) {
        let link = execution.order_link_id.clone();
        if link.is_empty() {
            return;
        }

        // A bare trade id is the entry order itself.
        if self.state.open_trades.contains_key(&link) {
            self.entry_fill(&link, execution.exec_price, now).await;
            return;
        }

        // Sub-orders are tagged "{trade_id}:TP{n}" / "{trade_id}:DCA{n}".
        let Some((trade_id, tag)) = link.rsplit_once(':') else {
            return;
        };
        let trade_id = trade_id.to_string();
        if let Some(n) = tag.strip_prefix("TP").and_then(|s| s.parse::<u32>().ok()) {
            self.handle_tp_fill(&trade_id, n).await;
        } else if let Some(n) = tag.strip_prefix("DCA").and_then(|s| s.parse::<u32>().ok()) {
            self.handle_dca_fill(&trade_id, n);
        } else {
            debug!(%link, "execution with unrecognized tag");
        }
    }

    /// Marks a pending trade as filled and installs the post-entry orders.
    /// Reached from the push path (execution event) and the poll path
    /// (position query); whichever arrives first wins, the other is a no-op.
    pub(super) async fn entry_fill(
        &mut self,
        trade_id: &str,
        price_hint: Option<Decimal>,
        now: i64,
    ) {
        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return;
        };
        if record.status != TradeStatus::Pending {
            return;
        }
        let entry_price = price_hint.filter(|p| *p > Decimal::ZERO).unwrap_or(record.trigger);
        record.entry_price = Some(entry_price);
        record.filled_ts = Some(now);
        if !record.transition_to(TradeStatus::Open) {
            error!(%trade_id, status = ?record.status, "illegal fill transition");
            return;
        }
        info!(symbol = %record.symbol, %entry_price, %trade_id, "ENTRY FILLED");
        self.mark_dirty();

        if let Err(error) = self.place_post_entry_orders(trade_id).await {
            warn!(%trade_id, ?error, "post-entry orders failed; will retry on maintenance tick");
        }
    }

    async fn handle_tp_fill(&mut self, trade_id: &str, n: u32) {
        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return;
        };
        let inserted = record.tp_fills.insert(n);
        let symbol = record.symbol.clone();
        let fills = record.tp_fills.len();
        let planned = record.planned_tp_count(self.cfg.fallback_tp_pct.len());
        let be_price = record.entry_price.unwrap_or(record.trigger);
        let needs_be_move = n == 1
            && self.cfg.move_sl_to_be_on_tp1
            && !record.sl_moved_to_be;
        let needs_trailing = self.cfg.trail_activate_on_tp
            && n == self.cfg.trail_after_tp_index
            && !record.trailing_started;

        if inserted {
            info!(%symbol, tp = n, fills, planned, "TP HIT");
            self.mark_dirty();
        }

        if needs_be_move && self.move_stop_loss(&symbol, be_price).await {
            if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.sl_moved_to_be = true;
                record.sl_price = Some(be_price);
                info!(%symbol, %be_price, "SL -> BE");
                self.mark_dirty();
            }
        }

        if needs_trailing && self.start_trailing(trade_id, n).await {
            if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.trailing_started = true;
                info!(%symbol, after_tp = n, "TRAILING STARTED");
                self.mark_dirty();
            }
        }
    }

    fn handle_dca_fill(&mut self, trade_id: &str, n: u32) {
        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return;
        };
        let inserted = record.dca_fills.insert(n);
        let symbol = record.symbol.clone();
        let fills = record.dca_fills.len();
        if inserted {
            info!(%symbol, dca = n, fills, planned = self.cfg.dca_qty_mults.len(), "DCA FILLED");
            self.mark_dirty();
        }
    }

    /// Moves the position stop with a short retry; markets volatile enough to
    /// hit TP1 routinely bounce the first trading-stop call.
    pub(super) async fn move_stop_loss(&self, symbol: &str, price: Decimal) -> bool {
        let price = match self.rules(symbol).await {
            Ok(rules) => self.round_price(price, &rules),
            Err(error) => {
                warn!(%symbol, ?error, "instrument rules unavailable; using raw stop price");
                price
            }
        };
        let request = TradingStopRequest {
            category: self.cfg.category.clone(),
            symbol: symbol.to_string(),
            position_idx: 0,
            tpsl_mode: "Full".to_string(),
            stop_loss: Some(price),
            trailing_stop: None,
            active_price: None,
        };
        for attempt in 0..SL_MOVE_RETRIES {
            match self.set_trading_stop_guarded(&request).await {
                Ok(()) => return true,
                Err(error) if attempt + 1 < SL_MOVE_RETRIES => {
                    warn!(%symbol, ?error, attempt, "SL move failed; retrying");
                    tokio::time::sleep(SL_MOVE_RETRY_DELAY).await;
                }
                Err(error) => {
                    error!(%symbol, ?error, "SL move failed; trade continues with prior stop");
                }
            }
        }
        false
    }

    /// Activates the venue-side trailing stop, anchored at the TP level that
    /// triggered it (or the market if the signal had fewer targets). A
    /// break-even stop already in place is preserved as the floor.
    pub(super) async fn start_trailing(&mut self, trade_id: &str, tp_num: u32) -> bool {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return false;
        };
        let symbol = record.symbol.clone();
        let anchor_from_plan = (tp_num as usize)
            .checked_sub(1)
            .and_then(|idx| record.tp_prices.get(idx))
            .copied();
        let sl_floor = record
            .sl_moved_to_be
            .then_some(record.entry_price)
            .flatten();

        let rules = match self.rules(&symbol).await {
            Ok(rules) => rules,
            Err(error) => {
                warn!(%symbol, ?error, "cannot start trailing without instrument rules");
                return false;
            }
        };
        let anchor = match anchor_from_plan {
            Some(price) => price,
            None => match self.venue.last_price(&self.cfg.category, &symbol).await {
                Ok(last) => last,
                Err(error) => {
                    warn!(%symbol, ?error, "cannot anchor trailing stop");
                    return false;
                }
            },
        };
        let anchor = self.round_price(anchor, &rules);
        let distance =
            self.round_price(anchor * self.cfg.trail_distance_pct / Decimal::ONE_HUNDRED, &rules);

        let request = TradingStopRequest {
            category: self.cfg.category.clone(),
            symbol: symbol.clone(),
            position_idx: 0,
            tpsl_mode: "Full".to_string(),
            stop_loss: sl_floor.map(|p| self.round_price(p, &rules)),
            trailing_stop: Some(distance),
            active_price: Some(anchor),
        };
        match self.set_trading_stop_guarded(&request).await {
            Ok(()) => {
                info!(%symbol, %anchor, %distance, "trailing stop active");
                true
            }
            Err(error) => {
                warn!(%symbol, ?error, "trailing activation failed");
                false
            }
        }
    }
}
