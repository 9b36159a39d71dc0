use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::util::{from_str_to_decimal, from_str_to_decimal_opt};

/// Envelope shared by every v5 REST response.
#[derive(Deserialize, Debug)]
pub struct RestResponse {
    #[serde(rename = "retCode", default)]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Deserialize, Debug)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    #[serde(deserialize_with = "from_str_to_decimal")]
    pub last_price: Decimal,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub qty_step: Option<String>,
    pub base_precision: Option<String>,
    pub min_order_qty: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub tick_size: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    #[serde(default)]
    pub lot_size_filter: LotSizeFilter,
    #[serde(default)]
    pub price_filter: PriceFilter,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(deserialize_with = "from_str_to_decimal_opt", default)]
    pub total_equity: Option<Decimal>,
    #[serde(deserialize_with = "from_str_to_decimal_opt", default)]
    pub total_wallet_balance: Option<Decimal>,
    #[serde(deserialize_with = "from_str_to_decimal_opt", default)]
    pub total_available_balance: Option<Decimal>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub order_id: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct Op {
    pub req_id: String,
    pub op: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct OpResponse {
    pub success: Option<bool>,
    pub ret_msg: Option<String>,
    pub op: String,
}

/// Topic pushes carry the topic name plus a raw payload that is decoded by
/// topic prefix, the way the v5 docs group them.
#[derive(Deserialize, Debug)]
pub struct TopicMsg {
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum PrivateStreamMsg {
    Op(OpResponse),
    Topic(TopicMsg),
}
