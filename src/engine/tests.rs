//! End-to-end engine scenarios against a scripted venue and message source.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    config::Config,
    discord::{ChatError, ChatMessage, MessageSource},
    engine::{Admission, RejectReason, TradeEngine},
    parser::{SignalIntent, SignalStatus},
    state::{BotState, TradeStatus},
    venue::{
        ClosedPnl,
        InstrumentRules,
        ExecutionEvent,
        OpenOrder,
        OrderRequest,
        Position,
        Side,
        StreamEvent,
        TradingStopRequest,
        Venue,
        VenueError,
    },
};

struct MockVenue {
    last_price: Mutex<Decimal>,
    equity: Mutex<Decimal>,
    rules: Mutex<InstrumentRules>,
    placed: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
    trading_stops: Mutex<Vec<TradingStopRequest>>,
    positions: Mutex<Vec<Position>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    closed_pnl: Mutex<Vec<ClosedPnl>>,
    leverage_calls: Mutex<Vec<(String, u32)>>,
    next_id: Mutex<u64>,
}

impl MockVenue {
    fn new() -> Self {
        Self {
            last_price: Mutex::new(dec!(99.5)),
            equity: Mutex::new(dec!(1000)),
            rules: Mutex::new(InstrumentRules {
                qty_step: dec!(0.01),
                min_qty: dec!(0.01),
                tick_size: dec!(0.01),
            }),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            trading_stops: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            closed_pnl: Mutex::new(Vec::new()),
            leverage_calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    fn set_last(&self, price: Decimal) {
        *self.last_price.lock().unwrap() = price;
    }

    fn set_position(&self, symbol: &str, size: Decimal, avg_price: Decimal) {
        *self.positions.lock().unwrap() = vec![Position {
            symbol: symbol.to_string(),
            size,
            avg_price,
            side: "Buy".to_string(),
            unrealised_pnl: None,
        }];
    }

    fn clear_positions(&self) {
        self.positions.lock().unwrap().clear();
    }

    fn remove_open_order_by_link(&self, link: &str) {
        self.open_orders
            .lock()
            .unwrap()
            .retain(|o| o.order_link_id != link);
    }

    fn add_closed_pnl(&self, symbol: &str, pnl: Decimal, created_time_ms: i64) {
        self.closed_pnl.lock().unwrap().push(ClosedPnl {
            symbol: symbol.to_string(),
            closed_pnl: pnl,
            created_time: created_time_ms,
        });
    }

    fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    fn stops(&self) -> Vec<TradingStopRequest> {
        self.trading_stops.lock().unwrap().clone()
    }

    fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl Venue for MockVenue {
    async fn last_price(&self, _category: &str, _symbol: &str) -> Result<Decimal, VenueError> {
        Ok(*self.last_price.lock().unwrap())
    }

    async fn instrument_rules(
        &self,
        _category: &str,
        _symbol: &str,
    ) -> Result<InstrumentRules, VenueError> {
        Ok(*self.rules.lock().unwrap())
    }

    async fn wallet_equity(&self, _account_type: &str) -> Result<Decimal, VenueError> {
        Ok(*self.equity.lock().unwrap())
    }

    async fn set_leverage(
        &self,
        _category: &str,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), VenueError> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let order_id = format!("V{next_id}");
        self.placed.lock().unwrap().push(request.clone());
        self.open_orders.lock().unwrap().push(OpenOrder {
            order_id: order_id.clone(),
            order_link_id: request.order_link_id.clone(),
            price: request.price.unwrap_or_default(),
            qty: request.qty,
            side: request.side.as_str().to_string(),
            order_status: "New".to_string(),
        });
        Ok(order_id)
    }

    async fn cancel_order(
        &self,
        _category: &str,
        _symbol: &str,
        order_id: &str,
    ) -> Result<(), VenueError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        self.open_orders
            .lock()
            .unwrap()
            .retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn open_orders(
        &self,
        _category: &str,
        _symbol: &str,
    ) -> Result<Vec<OpenOrder>, VenueError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn positions(
        &self,
        _category: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, VenueError> {
        let positions = self.positions.lock().unwrap().clone();
        Ok(match symbol {
            Some(symbol) => positions.into_iter().filter(|p| p.symbol == symbol).collect(),
            None => positions,
        })
    }

    async fn set_trading_stop(&self, request: &TradingStopRequest) -> Result<(), VenueError> {
        self.trading_stops.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn closed_pnl(
        &self,
        _category: &str,
        symbol: &str,
        _start_time: Option<i64>,
        _limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError> {
        Ok(self
            .closed_pnl
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MockChat {
    messages: Mutex<HashMap<String, String>>,
}

impl MockChat {
    fn set_message(&self, id: &str, text: &str) {
        self.messages
            .lock()
            .unwrap()
            .insert(id.to_string(), text.to_string());
    }
}

impl MessageSource for MockChat {
    async fn fetch_message(&self, id: &str) -> Result<Option<ChatMessage>, ChatError> {
        Ok(self.messages.lock().unwrap().get(id).map(|text| ChatMessage {
            id: id.to_string(),
            content: text.clone(),
            embeds: Vec::new(),
            timestamp: None,
        }))
    }
}

const NOW: i64 = 1_750_000_000;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        discord_token: "token".to_string(),
        channel_id: "channel".to_string(),
        bybit_api_key: "key".to_string(),
        bybit_api_secret: "secret".to_string(),
        bybit_testnet: false,
        bybit_demo: false,
        recv_window: "5000".to_string(),
        account_type: "UNIFIED".to_string(),
        category: "linear".to_string(),
        quote: "USDT".to_string(),
        leverage: 1,
        risk_pct: dec!(5),
        max_concurrent_trades: 3,
        max_trades_per_day: 20,
        max_signal_lag_sec: 300,
        entry_expiration_min: 180,
        entry_too_far_pct: dec!(0.5),
        entry_trigger_buffer_pct: dec!(0),
        entry_limit_price_offset_pct: dec!(0),
        entry_expiration_price_pct: dec!(0.6),
        initial_sl_pct: dec!(19),
        move_sl_to_be_on_tp1: true,
        tp_splits: vec![dec!(30), dec!(30), dec!(30)],
        fallback_tp_pct: vec![dec!(0.85), dec!(1.65), dec!(4.0)],
        trail_after_tp_index: 3,
        trail_distance_pct: dec!(2),
        trail_activate_on_tp: true,
        dca_qty_mults: vec![dec!(1.5), dec!(2.25)],
        poll_seconds: 15,
        poll_jitter_max: 5,
        signal_update_interval_sec: 60,
        position_alert_thresholds: vec![dec!(25), dec!(35), dec!(50)],
        dry_run: false,
        state_file: dir.path().join("state.json"),
        log_level: "info".to_string(),
    }
}

fn long_intent() -> SignalIntent {
    SignalIntent {
        base_asset: "ABC".to_string(),
        quote_asset: "USDT".to_string(),
        side: Side::Buy,
        trigger_price: dec!(100),
        tp_prices: vec![dec!(101), dec!(102), dec!(104)],
        dca_prices: vec![],
        sl_price: Some(dec!(95)),
        source_msg_id: "42".to_string(),
        raw_text: String::new(),
    }
}

fn new_engine(dir: &tempfile::TempDir) -> TradeEngine<MockVenue, MockChat> {
    TradeEngine::new(
        MockVenue::new(),
        MockChat::default(),
        test_config(dir),
        BotState::default(),
    )
}

async fn place_long(engine: &mut TradeEngine<MockVenue, MockChat>) -> String {
    match engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 10, NOW)
        .await
        .unwrap()
    {
        Admission::Placed { trade_id } => trade_id,
        other => panic!("expected placement, got {other:?}"),
    }
}

fn execution(link: &str, price: Option<Decimal>) -> StreamEvent {
    StreamEvent::Execution(ExecutionEvent {
        symbol: "ABCUSDT".to_string(),
        order_id: "X".to_string(),
        order_link_id: link.to_string(),
        exec_type: "Trade".to_string(),
        exec_price: price,
        side: "Buy".to_string(),
    })
}

#[tokio::test]
async fn clean_long_tp1_be_trail_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;

    // Entry: Buy limit 0.5 @ 100, armed at the trigger, rises-to direction.
    let placed = engine.venue.placed();
    assert_eq!(placed.len(), 1);
    let entry = &placed[0];
    assert_eq!(entry.side, Side::Buy);
    assert_eq!(entry.qty, dec!(0.5));
    assert_eq!(entry.price, Some(dec!(100)));
    assert_eq!(entry.trigger_price, Some(dec!(100)));
    assert_eq!(entry.trigger_direction, Some(1));
    assert!(!entry.reduce_only);
    assert_eq!(entry.order_link_id, trade_id);
    assert_eq!(engine.state.daily_count(NOW), 1);

    // Fill via the push path.
    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 60)
        .await;

    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.status, TradeStatus::Open);
    assert_eq!(record.entry_price, Some(dec!(100)));
    assert!(record.post_orders_placed);
    assert!(record.tp1_order_id.is_some());
    assert_eq!(record.tp_order_ids.len(), 3);

    // Signal SL installed as-is.
    let stops = engine.venue.stops();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].stop_loss, Some(dec!(95)));
    assert_eq!(stops[0].tpsl_mode, "Full");

    // TP ladder: reduce-only sells, 30% splits of the position, runner left.
    let placed = engine.venue.placed();
    let tps: Vec<&OrderRequest> = placed
        .iter()
        .filter(|o| o.order_link_id.contains(":TP"))
        .collect();
    assert_eq!(tps.len(), 3);
    for (tp, price) in tps.iter().zip([dec!(101), dec!(102), dec!(104)]) {
        assert_eq!(tp.side, Side::Sell);
        assert!(tp.reduce_only);
        assert_eq!(tp.qty, dec!(0.15));
        assert_eq!(tp.price, Some(price));
    }

    // TP1 fill migrates the stop to break-even.
    engine
        .on_stream_event(execution(&format!("{trade_id}:TP1"), Some(dec!(101))), NOW + 120)
        .await;
    let record = &engine.state.open_trades[&trade_id];
    assert!(record.sl_moved_to_be);
    assert_eq!(record.tp_fills.iter().copied().collect::<Vec<_>>(), vec![1]);
    let stops = engine.venue.stops();
    assert_eq!(stops.last().unwrap().stop_loss, Some(dec!(100)));

    // TP3 fill starts trailing, anchored at the TP3 level, BE floor kept.
    engine
        .on_stream_event(execution(&format!("{trade_id}:TP3"), Some(dec!(104))), NOW + 180)
        .await;
    let record = &engine.state.open_trades[&trade_id];
    assert!(record.trailing_started);
    let stops = engine.venue.stops();
    let trailing = stops.last().unwrap();
    assert_eq!(trailing.active_price, Some(dec!(104)));
    assert_eq!(trailing.trailing_stop, Some(dec!(2.08)));
    assert_eq!(trailing.stop_loss, Some(dec!(100)));

    // Venue closes the runner; maintenance detects, sweeps, and accounts.
    engine.venue.clear_positions();
    engine
        .venue
        .add_closed_pnl("ABCUSDT", dec!(0.75), (NOW + 200) * 1000);
    engine.run_maintenance(NOW + 240).await;

    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.status, TradeStatus::Closed);
    assert_eq!(record.closed_ts, Some(NOW + 240));
    assert_eq!(record.realized_pnl, Some(dec!(0.75)));
    assert_eq!(record.is_win, Some(true));
    assert_eq!(record.exit_reason.as_deref(), Some("trailing_stop"));

    // Residual TP2 (never filled) was swept; the bare entry link was not.
    let cancelled = engine.venue.cancelled();
    assert!(!cancelled.is_empty());
}

#[tokio::test]
async fn too_far_signal_is_rejected_and_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    engine.venue.set_last(dec!(100.6));

    let admission = engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 10, NOW)
        .await
        .unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::TooFar));
    assert!(engine.venue.placed().is_empty());
    assert_eq!(engine.state.daily_count(NOW), 0);
    assert_eq!(engine.state.seen_signal_fingerprints.len(), 1);

    // Same signal again: now a duplicate without re-evaluating the market.
    let admission = engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 10, NOW)
        .await
        .unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::Duplicate));
}

#[tokio::test]
async fn within_distance_signal_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    engine.venue.set_last(dec!(99.0));
    place_long(&mut engine).await;
    assert_eq!(engine.venue.placed().len(), 1);
    // Leverage was ensured (best-effort) before arming the entry.
    assert_eq!(
        engine.venue.leverage_calls.lock().unwrap().as_slice(),
        &[("ABCUSDT".to_string(), 1)]
    );
}

#[tokio::test]
async fn revoked_signal_cancels_pending_entry() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;
    let entry_order_id = engine.state.open_trades[&trade_id]
        .entry_order_id
        .clone()
        .unwrap();

    engine.chat.set_message("42", "ABC update: SIGNAL CANCELLED");
    engine.check_signal_updates(NOW + 30).await;

    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.status, TradeStatus::Cancelled);
    assert_eq!(record.exit_reason.as_deref(), Some("signal_revoked"));
    assert!(engine.venue.cancelled().contains(&entry_order_id));
}

#[tokio::test]
async fn poll_fallback_catches_missed_tp1() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;

    // Push stream is down; the poll path notices the fill.
    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine.run_maintenance(NOW + 60).await;
    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.status, TradeStatus::Open);
    assert!(record.post_orders_placed);
    assert!(!record.sl_moved_to_be);

    // TP1 vanishes from the book without any execution event.
    engine
        .venue
        .remove_open_order_by_link(&format!("{trade_id}:TP1"));
    engine.run_maintenance(NOW + 120).await;

    let record = &engine.state.open_trades[&trade_id];
    assert!(record.sl_moved_to_be);
    assert!(record.tp_fills.contains(&1));
    let stops = engine.venue.stops();
    assert_eq!(stops.last().unwrap().stop_loss, Some(dec!(100)));
}

#[tokio::test]
async fn orphan_position_is_surfaced_but_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir);
    engine.venue.set_position("XYZUSDT", dec!(1), dec!(5));

    engine.startup_sync().await;

    assert!(engine.venue.placed().is_empty());
    assert!(engine.venue.cancelled().is_empty());
    assert!(engine.venue.stops().is_empty());
    assert!(engine.state.open_trades.is_empty());
}

#[tokio::test]
async fn daily_cap_rejection_keeps_signal_re_evaluable() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    engine.cfg.max_trades_per_day = 2;
    engine.state.incr_daily(NOW);
    engine.state.incr_daily(NOW);

    let admission = engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 10, NOW)
        .await
        .unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::DailyCap));
    assert_eq!(engine.state.daily_count(NOW), 2);
    // Not remembered: tomorrow the same signal may pass the gate.
    assert!(engine.state.seen_signal_fingerprints.is_empty());
    assert!(engine.venue.placed().is_empty());
}

#[tokio::test]
async fn stale_signal_never_increments_daily_counter() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);

    let admission = engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 600, NOW)
        .await
        .unwrap();
    assert_eq!(
        admission,
        Admission::Rejected(RejectReason::Stale { age_sec: 600 })
    );
    assert_eq!(engine.state.daily_count(NOW), 0);

    let admission = engine
        .handle_signal(&long_intent(), SignalStatus::Active, NOW - 600, NOW)
        .await
        .unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::Duplicate));
    assert_eq!(engine.state.daily_count(NOW), 0);
}

#[tokio::test]
async fn post_entry_placement_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;

    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 60)
        .await;

    let orders_after_first = engine.venue.placed().len();
    let stops_after_first = engine.venue.stops().len();

    // Second invocation observes the flag and does nothing.
    engine.place_post_entry_orders(&trade_id).await.unwrap();
    assert_eq!(engine.venue.placed().len(), orders_after_first);
    assert_eq!(engine.venue.stops().len(), stops_after_first);

    // A replayed entry execution is equally inert.
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 90)
        .await;
    assert_eq!(engine.venue.placed().len(), orders_after_first);
}

#[tokio::test]
async fn pending_entry_expires_after_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;
    let entry_order_id = engine.state.open_trades[&trade_id]
        .entry_order_id
        .clone()
        .unwrap();

    engine.run_maintenance(NOW + 181 * 60).await;

    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.status, TradeStatus::Expired);
    assert!(engine.venue.cancelled().contains(&entry_order_id));
}

#[tokio::test]
async fn dca_ladder_is_armed_with_the_entry_side() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let mut intent = long_intent();
    intent.dca_prices = vec![dec!(97), dec!(94), dec!(91)];

    let trade_id = match engine
        .handle_signal(&intent, SignalStatus::Active, NOW - 10, NOW)
        .await
        .unwrap()
    {
        Admission::Placed { trade_id } => trade_id,
        other => panic!("expected placement, got {other:?}"),
    };

    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 60)
        .await;

    let placed = engine.venue.placed();
    let dcas: Vec<&OrderRequest> = placed
        .iter()
        .filter(|o| o.order_link_id.contains(":DCA"))
        .collect();
    // Two multipliers configured: the third DCA level is ignored.
    assert_eq!(dcas.len(), 2);
    for (dca, (price, qty)) in dcas
        .iter()
        .zip([(dec!(97), dec!(0.75)), (dec!(94), dec!(1.12))])
    {
        assert_eq!(dca.side, Side::Buy);
        assert!(!dca.reduce_only);
        assert_eq!(dca.trigger_price, Some(price));
        // Falls-to trigger: the market trades above the add level.
        assert_eq!(dca.trigger_direction, Some(2));
        assert_eq!(dca.qty, qty);
    }
}

#[tokio::test]
async fn amended_stop_loss_is_applied_unless_at_breakeven() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;
    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 60)
        .await;

    engine.chat.set_message(
        "42",
        "ABC LONG Signal\nEnter on Trigger: $100\nTP1: $101\nTP2: $102\nTP3: $104\nStop Loss: $96\nAWAITING ENTRY",
    );
    engine.check_signal_updates(NOW + 90).await;

    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.sl_price, Some(dec!(96)));
    let stops = engine.venue.stops();
    assert_eq!(stops.last().unwrap().stop_loss, Some(dec!(96)));

    // After break-even migration the provider's SL is ignored.
    engine
        .on_stream_event(execution(&format!("{trade_id}:TP1"), Some(dec!(101))), NOW + 120)
        .await;
    engine.chat.set_message(
        "42",
        "ABC LONG Signal\nEnter on Trigger: $100\nTP1: $101\nTP2: $102\nTP3: $104\nStop Loss: $93\nAWAITING ENTRY",
    );
    engine.check_signal_updates(NOW + 150).await;
    let record = &engine.state.open_trades[&trade_id];
    assert!(record.sl_moved_to_be);
    assert_eq!(record.sl_price, Some(dec!(100)));
}

#[tokio::test]
async fn amended_tp_ladder_is_replaced_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = new_engine(&dir);
    let trade_id = place_long(&mut engine).await;
    engine.venue.set_position("ABCUSDT", dec!(0.5), dec!(100));
    engine
        .on_stream_event(execution(&trade_id, Some(dec!(100))), NOW + 60)
        .await;

    let old_tp_ids: Vec<String> = engine.state.open_trades[&trade_id]
        .tp_order_ids
        .values()
        .cloned()
        .collect();

    engine.chat.set_message(
        "42",
        "ABC LONG Signal\nEnter on Trigger: $100\nTP1: $103\nTP2: $105\nStop Loss: $95\nAWAITING ENTRY",
    );
    engine.check_signal_updates(NOW + 90).await;

    let cancelled = engine.venue.cancelled();
    for old in &old_tp_ids {
        assert!(cancelled.contains(old), "old TP order {old} not cancelled");
    }
    let record = &engine.state.open_trades[&trade_id];
    assert_eq!(record.tp_prices, vec![dec!(103), dec!(105)]);
    assert_eq!(record.tp_order_ids.len(), 2);

    let placed = engine.venue.placed();
    let new_tps: Vec<&OrderRequest> = placed
        .iter()
        .filter(|o| o.order_link_id.contains(":TP") && o.price == Some(dec!(103)))
        .collect();
    assert_eq!(new_tps.len(), 1);
}
