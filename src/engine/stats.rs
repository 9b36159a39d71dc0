//! Aggregates over the archived history and the human-readable reports
//! derived from them.

use rust_decimal::Decimal;
use tracing::info;

use crate::{
    discord::MessageSource,
    engine::TradeEngine,
    state::{ArchivedTrade, TradeRecord},
    venue::Venue,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TradeStats {
    pub period_days: Option<i64>,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub avg_tp_fills: Decimal,
    pub avg_dca_fills: Decimal,
    pub trailing_exits: usize,
    pub sl_exits: usize,
    pub be_exits: usize,
}

impl TradeStats {
    pub fn compute(history: &[ArchivedTrade], period_days: Option<i64>, now: i64) -> Self {
        let trades: Vec<&ArchivedTrade> = match period_days {
            Some(days) => {
                let cutoff = now - days * 86_400;
                history
                    .iter()
                    .filter(|t| t.closed_ts.unwrap_or(0) >= cutoff)
                    .collect()
            }
            None => history.iter().collect(),
        };
        if trades.is_empty() {
            return Self {
                period_days,
                ..Default::default()
            };
        }

        let n = Decimal::from(trades.len());
        let wins = trades.iter().filter(|t| t.is_win == Some(true)).count();
        let pnls: Vec<Decimal> = trades
            .iter()
            .map(|t| t.realized_pnl.unwrap_or_default())
            .collect();
        let total_pnl: Decimal = pnls.iter().sum();
        let tp_fills: u32 = trades.iter().map(|t| t.tp_fills).sum();
        let dca_fills: u32 = trades.iter().map(|t| t.dca_fills).sum();
        let exits = |reason: &str| {
            trades
                .iter()
                .filter(|t| t.exit_reason.as_deref() == Some(reason))
                .count()
        };

        Self {
            period_days,
            total_trades: trades.len(),
            wins,
            losses: trades.len() - wins,
            win_rate: (Decimal::from(wins) * Decimal::ONE_HUNDRED / n).round_dp(1),
            total_pnl: total_pnl.round_dp(2),
            avg_pnl: (total_pnl / n).round_dp(2),
            best_trade: pnls.iter().max().copied().unwrap_or_default().round_dp(2),
            worst_trade: pnls.iter().min().copied().unwrap_or_default().round_dp(2),
            avg_tp_fills: (Decimal::from(tp_fills) / n).round_dp(1),
            avg_dca_fills: (Decimal::from(dca_fills) / n).round_dp(1),
            trailing_exits: exits("trailing_stop"),
            sl_exits: exits("stop_loss"),
            be_exits: exits("breakeven"),
        }
    }
}

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    pub(super) fn log_performance_report(&self) {
        let now = chrono::Utc::now().timestamp();
        let history = &self.state.trade_history;
        info!("==================== PERFORMANCE ====================");
        for (label, days) in [("7 days", Some(7)), ("30 days", Some(30)), ("all time", None)] {
            let stats = TradeStats::compute(history, days, now);
            if stats.total_trades == 0 {
                info!("{label}: no trades");
                continue;
            }
            info!(
                "{label}: {} trades | {} W / {} L | win rate {}%",
                stats.total_trades, stats.wins, stats.losses, stats.win_rate
            );
            info!(
                "   PnL total {} | avg {} | best {} | worst {}",
                stats.total_pnl, stats.avg_pnl, stats.best_trade, stats.worst_trade
            );
            info!(
                "   avg TPs {} | avg DCAs {} | exits: {} trailing, {} SL, {} BE",
                stats.avg_tp_fills,
                stats.avg_dca_fills,
                stats.trailing_exits,
                stats.sl_exits,
                stats.be_exits
            );
        }
        info!("=====================================================");
    }
}

/// One structured block per closed trade.
pub(super) fn log_trade_summary(record: &TradeRecord, fallback_tp_len: usize, dca_count: usize) {
    let pnl = record.realized_pnl.unwrap_or_default();
    let result = if pnl > Decimal::ZERO { "WIN" } else { "LOSS" };
    info!("==================================================");
    info!(
        "TRADE {result}: {} {} | entry {} | PnL {}",
        record.symbol,
        record.position_side,
        record.entry_price.unwrap_or(record.trigger),
        pnl.round_dp(2)
    );
    info!(
        "   TPs {}/{} | DCAs {}/{} | exit {}",
        record.tp_fills.len(),
        record.planned_tp_count(fallback_tp_len),
        record.dca_fills.len(),
        record.dca_prices.len().min(dca_count),
        record.exit_reason.as_deref().unwrap_or("unknown")
    );
    info!("==================================================");
}
