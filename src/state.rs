//! Durable trade ledger: the versioned document persisted between runs.
//!
//! Single writer (the engine owner task). Saves are atomic via
//! write-temp-then-rename so a crash mid-write never corrupts the snapshot.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fs, io,
    path::Path,
};

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::venue::Side;

pub const STATE_VERSION: u32 = 2;
pub const HISTORY_CAP: usize = 500;
pub const FINGERPRINT_CAP: usize = 500;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Io: {0}")]
    Io(#[from] io::Error),
    #[error("Serde: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Open,
    Cancelled,
    Expired,
    Closed,
}

impl TradeStatus {
    pub fn is_active(self) -> bool {
        matches!(self, TradeStatus::Pending | TradeStatus::Open)
    }

    /// Status only ever moves forward; a trade never resurrects.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        match self {
            TradeStatus::Pending => matches!(
                next,
                TradeStatus::Open | TradeStatus::Cancelled | TradeStatus::Expired
            ),
            TradeStatus::Open => matches!(next, TradeStatus::Closed | TradeStatus::Cancelled),
            TradeStatus::Cancelled | TradeStatus::Expired | TradeStatus::Closed => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => f.write_str("Long"),
            PositionSide::Short => f.write_str("Short"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    // Plan
    pub id: String,
    pub symbol: String,
    pub order_side: Side,
    pub position_side: PositionSide,
    pub trigger: Decimal,
    pub tp_prices: Vec<Decimal>,
    pub tp_splits: Vec<Decimal>,
    pub dca_prices: Vec<Decimal>,
    pub sl_price: Option<Decimal>,
    pub base_qty: Decimal,
    pub leverage: u32,
    pub risk_pct: Decimal,
    pub risk_amount: Decimal,
    pub equity_at_placement: Decimal,

    // Orders
    pub entry_order_id: Option<String>,
    #[serde(default)]
    pub tp_order_ids: BTreeMap<u32, String>,
    pub tp1_order_id: Option<String>,
    pub source_msg_id: String,

    // Runtime
    pub status: TradeStatus,
    pub entry_price: Option<Decimal>,
    pub placed_ts: i64,
    pub filled_ts: Option<i64>,
    pub closed_ts: Option<i64>,
    #[serde(default)]
    pub tp_fills: BTreeSet<u32>,
    #[serde(default)]
    pub dca_fills: BTreeSet<u32>,
    #[serde(default)]
    pub sl_moved_to_be: bool,
    #[serde(default)]
    pub trailing_started: bool,
    #[serde(default)]
    pub post_orders_placed: bool,
    pub realized_pnl: Option<Decimal>,
    pub is_win: Option<bool>,
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub alerts_sent: BTreeSet<String>,
}

impl TradeRecord {
    /// Sub-orders are labelled `{trade_id}:TP{n}` / `{trade_id}:DCA{n}`.
    pub fn link_prefix(&self) -> String {
        format!("{}:", self.id)
    }

    /// Size of the ladder the engine intends to place: bounded by both the
    /// signal's targets and the configured splits.
    pub fn planned_tp_count(&self, fallback_tp_len: usize) -> usize {
        let targets = if self.tp_prices.is_empty() {
            fallback_tp_len
        } else {
            self.tp_prices.len()
        };
        targets.min(self.tp_splits.len())
    }

    /// Guarded forward-only status transition. Returns false (and leaves the
    /// record untouched) on an illegal move.
    pub fn transition_to(&mut self, next: TradeStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Compact history row kept after a trade leaves the active ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedTrade {
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Option<Decimal>,
    pub trigger: Decimal,
    pub placed_ts: i64,
    pub filled_ts: Option<i64>,
    pub closed_ts: Option<i64>,
    pub realized_pnl: Option<Decimal>,
    pub is_win: Option<bool>,
    pub exit_reason: Option<String>,
    pub tp_fills: u32,
    pub tp_count: u32,
    pub dca_fills: u32,
    pub dca_count: u32,
    pub trailing_used: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotState {
    pub version: u32,
    #[serde(default)]
    pub open_trades: BTreeMap<String, TradeRecord>,
    #[serde(default)]
    pub trade_history: Vec<ArchivedTrade>,
    #[serde(default)]
    pub last_seen_msg_id: Option<String>,
    #[serde(default)]
    pub seen_signal_fingerprints: VecDeque<String>,
    #[serde(default)]
    pub daily_counts: BTreeMap<String, u32>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            open_trades: Default::default(),
            trade_history: Default::default(),
            last_seen_msg_id: None,
            seen_signal_fingerprints: Default::default(),
            daily_counts: Default::default(),
        }
    }
}

pub fn utc_day_key(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

impl BotState {
    /// A missing file is a fresh start, not an error.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let raw = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn active_trade_count(&self) -> usize {
        self.open_trades
            .values()
            .filter(|t| t.status.is_active())
            .count()
    }

    pub fn daily_count(&self, now: i64) -> u32 {
        self.daily_counts
            .get(&utc_day_key(now))
            .copied()
            .unwrap_or(0)
    }

    pub fn incr_daily(&mut self, now: i64) {
        *self.daily_counts.entry(utc_day_key(now)).or_insert(0) += 1;
    }

    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        self.seen_signal_fingerprints.iter().any(|f| f == fingerprint)
    }

    pub fn remember_fingerprint(&mut self, fingerprint: &str) {
        if self.is_duplicate(fingerprint) {
            return;
        }
        self.seen_signal_fingerprints.push_back(fingerprint.to_string());
        while self.seen_signal_fingerprints.len() > FINGERPRINT_CAP {
            self.seen_signal_fingerprints.pop_front();
        }
    }

    pub fn archive(&mut self, archived: ArchivedTrade) {
        self.trade_history.push(archived);
        if self.trade_history.len() > HISTORY_CAP {
            let excess = self.trade_history.len() - HISTORY_CAP;
            self.trade_history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::venue::Side;

    fn record(id: &str) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            symbol: "ABCUSDT".to_string(),
            order_side: Side::Buy,
            position_side: PositionSide::Long,
            trigger: dec!(100),
            tp_prices: vec![dec!(101), dec!(102)],
            tp_splits: vec![dec!(30), dec!(30), dec!(30)],
            dca_prices: vec![],
            sl_price: Some(dec!(95)),
            base_qty: dec!(0.5),
            leverage: 5,
            risk_pct: dec!(5),
            risk_amount: dec!(50),
            equity_at_placement: dec!(1000),
            entry_order_id: Some("oid-1".to_string()),
            tp_order_ids: Default::default(),
            tp1_order_id: None,
            source_msg_id: "42".to_string(),
            status: TradeStatus::Pending,
            entry_price: None,
            placed_ts: 1_700_000_000,
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
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = BotState::default();
        state.open_trades.insert("t1".to_string(), record("t1"));
        state.last_seen_msg_id = Some("999".to_string());
        state.remember_fingerprint("abcdef0123");
        state.incr_daily(1_700_000_000);
        state.save(&path).unwrap();

        let loaded = BotState::load(&path).unwrap();
        assert_eq!(loaded.version, STATE_VERSION);
        assert_eq!(loaded.open_trades.len(), 1);
        assert_eq!(loaded.open_trades["t1"].trigger, dec!(100));
        assert_eq!(loaded.open_trades["t1"].status, TradeStatus::Pending);
        assert_eq!(loaded.last_seen_msg_id.as_deref(), Some("999"));
        assert!(loaded.is_duplicate("abcdef0123"));
        assert_eq!(loaded.daily_count(1_700_000_000), 1);
    }

    #[test]
    fn load_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = BotState::load(&dir.path().join("nope.json")).unwrap();
        assert!(state.open_trades.is_empty());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn daily_counter_is_per_utc_day() {
        let mut state = BotState::default();
        let day1 = 1_700_000_000;
        let day2 = day1 + 86_400;
        state.incr_daily(day1);
        state.incr_daily(day1);
        state.incr_daily(day2);
        assert_eq!(state.daily_count(day1), 2);
        assert_eq!(state.daily_count(day2), 1);
        assert_eq!(state.daily_count(day2 + 86_400), 0);
    }

    #[test]
    fn fingerprints_are_bounded_and_deduped() {
        let mut state = BotState::default();
        state.remember_fingerprint("same");
        state.remember_fingerprint("same");
        assert_eq!(state.seen_signal_fingerprints.len(), 1);

        for i in 0..(FINGERPRINT_CAP + 50) {
            state.remember_fingerprint(&format!("fp{i}"));
        }
        assert_eq!(state.seen_signal_fingerprints.len(), FINGERPRINT_CAP);
        // Oldest evicted first.
        assert!(!state.is_duplicate("same"));
        assert!(state.is_duplicate(&format!("fp{}", FINGERPRINT_CAP + 49)));
    }

    #[test]
    fn history_is_bounded() {
        let mut state = BotState::default();
        for i in 0..(HISTORY_CAP + 10) {
            state.archive(ArchivedTrade {
                id: format!("t{i}"),
                symbol: "ABCUSDT".to_string(),
                side: PositionSide::Long,
                entry_price: None,
                trigger: dec!(1),
                placed_ts: i as i64,
                filled_ts: None,
                closed_ts: None,
                realized_pnl: None,
                is_win: None,
                exit_reason: None,
                tp_fills: 0,
                tp_count: 0,
                dca_fills: 0,
                dca_count: 0,
                trailing_used: false,
            });
        }
        assert_eq!(state.trade_history.len(), HISTORY_CAP);
        assert_eq!(state.trade_history[0].id, "t10");
    }

    #[test]
    fn status_transitions_are_monotone() {
        let mut rec = record("t1");
        assert!(rec.transition_to(TradeStatus::Open));
        assert!(!rec.transition_to(TradeStatus::Pending));
        assert!(!rec.transition_to(TradeStatus::Expired));
        assert!(rec.transition_to(TradeStatus::Closed));
        assert!(!rec.transition_to(TradeStatus::Open));
        assert_eq!(rec.status, TradeStatus::Closed);
    }

    #[test]
    fn planned_tp_count_bounded_by_splits_and_targets() {
        let mut rec = record("t1");
        assert_eq!(rec.planned_tp_count(3), 2);
        rec.tp_prices = vec![dec!(1); 5];
        assert_eq!(rec.planned_tp_count(3), 3);
        rec.tp_prices.clear();
        assert_eq!(rec.planned_tp_count(3), 3);
    }
}
