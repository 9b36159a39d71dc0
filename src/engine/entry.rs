//! Signal admission: gating and conditional entry placement.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::{
    discord::MessageSource,
    engine::TradeEngine,
    parser::{self, SignalIntent, SignalStatus},
    state::{TradeRecord, TradeStatus},
    venue::{OrderRequest, Side, Venue, VenueError},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    Duplicate,
    MaxConcurrent,
    DailyCap,
    Stale { age_sec: i64 },
    NotEligible(SignalStatus),
    TooFar,
    BeyondExpiryPrice,
}

impl RejectReason {
    /// Cap-based rejections stay re-evaluable once the cap clears; everything
    /// else is remembered so the same message is never re-assessed.
    fn remembers_fingerprint(&self) -> bool {
        !matches!(
            self,
            RejectReason::Duplicate | RejectReason::MaxConcurrent | RejectReason::DailyCap
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Duplicate => f.write_str("duplicate signal"),
            RejectReason::MaxConcurrent => f.write_str("max concurrent trades reached"),
            RejectReason::DailyCap => f.write_str("max trades per day reached"),
            RejectReason::Stale { age_sec } => write!(f, "signal too old ({age_sec}s)"),
            RejectReason::NotEligible(status) => write!(f, "status not eligible ({status:?})"),
            RejectReason::TooFar => f.write_str("price too far past trigger"),
            RejectReason::BeyondExpiryPrice => f.write_str("market beyond expiry price"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Placed { trade_id: String },
    Rejected(RejectReason),
}

impl<V: Venue, M: MessageSource> TradeEngine<V, M> {
    /// Runs the full admission pipeline for a parsed signal: dedup, caps,
    /// freshness, status, distance, then arming the conditional entry.
    /// The daily counter is incremented exactly once, on successful placement.
    pub async fn handle_signal(
        &mut self,
        intent: &SignalIntent,
        status: SignalStatus,
        msg_ts: i64,
        now: i64,
    ) -> Result<Admission, VenueError> {
        let fingerprint = parser::fingerprint(intent);

        if self.state.is_duplicate(&fingerprint) {
            return Ok(self.reject(&fingerprint, RejectReason::Duplicate));
        }
        if self.state.active_trade_count() >= self.cfg.max_concurrent_trades {
            return Ok(self.reject(&fingerprint, RejectReason::MaxConcurrent));
        }
        if self.state.daily_count(now) >= self.cfg.max_trades_per_day {
            return Ok(self.reject(&fingerprint, RejectReason::DailyCap));
        }
        if msg_ts > 0 {
            let age_sec = now - msg_ts;
            if age_sec > self.cfg.max_signal_lag_sec {
                return Ok(self.reject(&fingerprint, RejectReason::Stale { age_sec }));
            }
        }
        if !status.eligible_for_entry() {
            return Ok(self.reject(&fingerprint, RejectReason::NotEligible(status)));
        }

        self.place_entry(intent, &fingerprint, now).await
    }

    fn reject(&mut self, fingerprint: &str, reason: RejectReason) -> Admission {
        if reason.remembers_fingerprint() {
            self.state.remember_fingerprint(fingerprint);
            self.mark_dirty();
        }
        Admission::Rejected(reason)
    }

    async fn place_entry(
        &mut self,
        intent: &SignalIntent,
        fingerprint: &str,
        now: i64,
    ) -> Result<Admission, VenueError> {
        let symbol = intent.symbol();
        let side = intent.side;
        let trigger = intent.trigger_price;

        // Best-effort; some symbols reject leverage changes while a position
        // or order exists and the entry is still worth arming.
        if !self.cfg.dry_run
            && let Err(error) = self
                .venue
                .set_leverage(&self.cfg.category, &symbol, self.cfg.leverage)
                .await
        {
            warn!(%symbol, ?error, "set_leverage failed");
        }

        let last = self.venue.last_price(&self.cfg.category, &symbol).await?;
        if self.too_far(side, last, trigger) {
            info!(%symbol, %last, %trigger, "skip: too far past trigger");
            return Ok(self.reject(fingerprint, RejectReason::TooFar));
        }
        if self.beyond_expiry_price(side, last, trigger) {
            info!(%symbol, %last, %trigger, "skip: beyond expiry price rule");
            return Ok(self.reject(fingerprint, RejectReason::BeyondExpiryPrice));
        }

        let rules = self.rules(&symbol).await?;

        // Arm the trigger slightly early if a buffer is configured.
        let buffer = self.cfg.entry_trigger_buffer_pct / Decimal::ONE_HUNDRED;
        let trigger_adj = match side {
            Side::Buy => trigger * (Decimal::ONE - buffer),
            Side::Sell => trigger * (Decimal::ONE + buffer),
        };
        let trigger_adj = self.round_price(trigger_adj, &rules);

        // The limit is offset marginally against the taker to improve fill
        // odds once triggered.
        let offset = self.cfg.entry_limit_price_offset_pct.abs() / Decimal::ONE_HUNDRED;
        let limit_price = match side {
            Side::Buy => trigger * (Decimal::ONE - offset),
            Side::Sell => trigger * (Decimal::ONE + offset),
        };
        let limit_price = self.round_price(limit_price, &rules);

        let sized = self.sized_entry(&symbol, trigger, &rules).await?;
        let trade_id = format!("{fingerprint}-{now}");

        let request = OrderRequest {
            category: self.cfg.category.clone(),
            symbol: symbol.clone(),
            side,
            order_type: "Limit".to_string(),
            qty: sized.qty,
            price: Some(limit_price),
            time_in_force: "GTC".to_string(),
            trigger_direction: Some(trigger_direction(last, trigger_adj)),
            trigger_price: Some(trigger_adj),
            trigger_by: Some("LastPrice".to_string()),
            reduce_only: false,
            close_on_trigger: false,
            order_link_id: trade_id.clone(),
        };

        let order_id = match self.place_order_guarded(&request).await {
            Ok(order_id) => order_id,
            Err(error) => {
                // A failed place is not retried; re-sending without a venue
                // nonce echo risks a duplicate order.
                self.state.remember_fingerprint(fingerprint);
                self.mark_dirty();
                return Err(error);
            }
        };

        info!(%symbol, %side, %trigger, qty = %sized.qty, %trade_id, %order_id, "entry armed");

        let record = TradeRecord {
            id: trade_id.clone(),
            symbol,
            order_side: side,
            position_side: side.into(),
            trigger,
            tp_prices: intent.tp_prices.clone(),
            tp_splits: self.cfg.tp_splits.clone(),
            dca_prices: intent.dca_prices.clone(),
            sl_price: intent.sl_price,
            base_qty: sized.qty,
            leverage: self.cfg.leverage,
            risk_pct: self.cfg.risk_pct,
            risk_amount: sized.risk_amount,
            equity_at_placement: sized.equity,
            entry_order_id: Some(order_id),
            tp_order_ids: Default::default(),
            tp1_order_id: None,
            source_msg_id: intent.source_msg_id.clone(),
            status: TradeStatus::Pending,
            entry_price: None,
            placed_ts: now,
            filled_ts: None,
            closed_ts: None,
            tp_fills: Default::default(),
            dca_fills: Default::default(),
            sl_moved_to_be: false,
            trailing_started: false,
            post_orders_placed: false,
            realized_pnl: None,
            is_win: None,
            exit_reason: None,
            alerts_sent: Default::default(),
        };
        self.state.open_trades.insert(trade_id.clone(), record);
        self.state.incr_daily(now);
        self.state.remember_fingerprint(fingerprint);
        self.mark_dirty();

        Ok(Admission::Placed { trade_id })
    }

    /// The gate compares against the unadjusted trigger: a short whose market
    /// already trades well under the level (or a long well over it) chases a
    /// move that has left without us.
    fn too_far(&self, side: Side, last: Decimal, trigger: Decimal) -> bool {
        let pct = self.cfg.entry_too_far_pct / Decimal::ONE_HUNDRED;
        match side {
            Side::Sell => last <= trigger * (Decimal::ONE - pct),
            Side::Buy => last >= trigger * (Decimal::ONE + pct),
        }
    }

    /// Tighter companion check so a market that blew through the level does
    /// not produce an immediate bad fill.
    fn beyond_expiry_price(&self, side: Side, last: Decimal, trigger: Decimal) -> bool {
        if self.cfg.entry_expiration_price_pct <= Decimal::ZERO {
            return false;
        }
        let pct = self.cfg.entry_expiration_price_pct / Decimal::ONE_HUNDRED;
        match side {
            Side::Sell => last <= trigger * (Decimal::ONE - pct),
            Side::Buy => last >= trigger * (Decimal::ONE + pct),
        }
    }
}

/// Bybit trigger direction: 1 = rises to trigger, 2 = falls to trigger.
pub(super) fn trigger_direction(last: Decimal, trigger: Decimal) -> u8 {
    if last > trigger { 2 } else { 1 }
}
