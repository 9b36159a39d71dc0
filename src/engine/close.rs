//! Final accounting once a position has gone to zero: realized PnL from the
//! venue's closed-PnL records and the derived exit reason.

use rust_decimal::Decimal;
use tracing::warn;

use crate::{
    discord::MessageSource,
    engine::{TradeEngine, stats},
    state::TradeRecord,
    venue::Venue,
};

/// PnL within one quote unit of zero counts as a break-even exit.
const BREAKEVEN_EPSILON: Decimal = Decimal::ONE;

const CLOSED_PNL_FETCH_LIMIT: u32 = 20;

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    pub(super) async fn finalize_close(&mut self, trade_id: &str) {
        let Some(record) = self.state.open_trades.get(trade_id) else {
            return;
        };
        let symbol = record.symbol.clone();
        let filled_ts = record.filled_ts.unwrap_or(record.placed_ts);

        if self.cfg.dry_run {
            if let Some(record) = self.state.open_trades.get_mut(trade_id) {
                record.realized_pnl = Some(Decimal::ZERO);
                record.exit_reason = Some("dry_run".to_string());
                self.mark_dirty();
            }
            return;
        }

        // A window slightly before the fill catches records the venue stamps
        // a moment early; the fill-time filter below trims earlier trades on
        // the same symbol.
        let start_time = Some((filled_ts - 60) * 1000);
        let realized = match self
            .venue
            .closed_pnl(&self.cfg.category, &symbol, start_time, CLOSED_PNL_FETCH_LIMIT)
            .await
        {
            Ok(records) => Some(
                records
                    .iter()
                    .filter(|r| r.created_time >= filled_ts * 1000)
                    .map(|r| r.closed_pnl)
                    .sum::<Decimal>(),
            ),
            Err(error) => {
                warn!(%symbol, ?error, "closed-PnL fetch failed");
                None
            }
        };

        let fallback_tp_len = self.cfg.fallback_tp_pct.len();
        let dca_count = self.cfg.dca_qty_mults.len();
        let Some(record) = self.state.open_trades.get_mut(trade_id) else {
            return;
        };
        record.realized_pnl = realized;
        record.is_win = realized.map(|pnl| pnl > Decimal::ZERO);
        let reason = exit_reason(record, realized, fallback_tp_len);
        record.exit_reason = Some(reason);
        stats::log_trade_summary(record, fallback_tp_len, dca_count);
        self.mark_dirty();
    }
}

/// Exit-reason priority: trailing profit, full ladder, break-even band,
/// partial ladder, plain stop, unknown.
fn exit_reason(record: &TradeRecord, pnl: Option<Decimal>, fallback_tp_len: usize) -> String {
    let tp_fills = record.tp_fills.len();
    let tp_count = record.planned_tp_count(fallback_tp_len);

    if record.trailing_started && pnl.is_some_and(|p| p > Decimal::ZERO) {
        "trailing_stop".to_string()
    } else if tp_count > 0 && tp_fills >= tp_count {
        "all_tps_hit".to_string()
    } else if tp_fills > 0
        && record.sl_moved_to_be
        && pnl.is_some_and(|p| p.abs() < BREAKEVEN_EPSILON)
    {
        "breakeven".to_string()
    } else if tp_fills > 0 {
        let highest = record.tp_fills.iter().max().copied().unwrap_or(0);
        format!("tp{highest}_then_sl")
    } else if pnl.is_some_and(|p| p < Decimal::ZERO) {
        "stop_loss".to_string()
    } else {
        "unknown".to_string()
    }
}
