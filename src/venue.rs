//! The contract the trade engine requires from a derivatives venue.
//!
//! The engine is generic over [`Venue`] so the adapter in `bybit/` and the
//! scripted mock used by the engine tests are interchangeable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{from_str_to_decimal, from_str_to_decimal_opt, from_str_to_i64};

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("Transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RateLimited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Api: {code} - {message}")]
    Api { code: i64, message: String },
    #[error("AuthError: {0}")]
    Auth(String),
    #[error("Serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Tungstenite: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("ConnectionAbort: {0}")]
    ConnectionAbort(String),
    #[error("ConnectionInterrupted")]
    ConnectionInterrupted,
    #[error("MissingData: {0}")]
    MissingData(&'static str),
}

impl VenueError {
    /// Bybit 34040 means the trading stop is already at the requested value.
    pub fn is_benign(&self) -> bool {
        matches!(self, VenueError::Api { code: 34040, .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::Transport(_) | VenueError::RateLimited { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-symbol precision rules, cached by the engine with a short TTL.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstrumentRules {
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
}

/// Full order body for `/v5/order/create`. Serialized once; the same bytes
/// are signed and sent.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_direction: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_by: Option<String>,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    pub order_link_id: String,
}

/// Body for `/v5/position/trading-stop`. A "not modified" response is benign.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingStopRequest {
    pub category: String,
    pub symbol: String,
    pub position_idx: u8,
    pub tpsl_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_stop: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_price: Option<Decimal>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    #[serde(deserialize_with = "from_str_to_decimal", default)]
    pub price: Decimal,
    #[serde(deserialize_with = "from_str_to_decimal", default)]
    pub qty: Decimal,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub order_status: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    #[serde(deserialize_with = "from_str_to_decimal", default)]
    pub size: Decimal,
    #[serde(deserialize_with = "from_str_to_decimal", default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub side: String,
    #[serde(deserialize_with = "from_str_to_decimal_opt", default)]
    pub unrealised_pnl: Option<Decimal>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPnl {
    pub symbol: String,
    #[serde(deserialize_with = "from_str_to_decimal", default)]
    pub closed_pnl: Decimal,
    #[serde(deserialize_with = "from_str_to_i64", default)]
    pub created_time: i64,
}

/// One private-stream execution, as delivered on the `execution` topic.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub symbol: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    #[serde(default)]
    pub exec_type: String,
    #[serde(deserialize_with = "from_str_to_decimal_opt", default)]
    pub exec_price: Option<Decimal>,
    #[serde(default)]
    pub side: String,
}

/// Events delivered from the push-stream pump to the engine owner task.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Execution(ExecutionEvent),
    /// Emitted after every successful (re)connect + subscribe so the engine
    /// can re-reconcile fills that may have been missed while disconnected.
    Resubscribed,
}

/// Venue operations the engine depends on. Implementations must not retry
/// writes; reads may be retried internally on transport errors.
#[allow(async_fn_in_trait)]
pub trait Venue {
    async fn last_price(&self, category: &str, symbol: &str) -> Result<Decimal, VenueError>;

    async fn instrument_rules(
        &self,
        category: &str,
        symbol: &str,
    ) -> Result<InstrumentRules, VenueError>;

    async fn wallet_equity(&self, account_type: &str) -> Result<Decimal, VenueError>;

    async fn set_leverage(
        &self,
        category: &str,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), VenueError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError>;

    async fn cancel_order(
        &self,
        category: &str,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), VenueError>;

    async fn open_orders(&self, category: &str, symbol: &str)
    -> Result<Vec<OpenOrder>, VenueError>;

    async fn positions(
        &self,
        category: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, VenueError>;

    async fn set_trading_stop(&self, request: &TradingStopRequest) -> Result<(), VenueError>;

    async fn closed_pnl(
        &self,
        category: &str,
        symbol: &str,
        start_time: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError>;
}
