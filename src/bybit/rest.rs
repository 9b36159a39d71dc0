use std::{future::Future, time::Duration};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    bybit::msg::{
        InstrumentInfo,
        ListResult,
        OrderResult,
        RestResponse,
        Ticker,
        WalletAccount,
    },
    util::sign_hmac_sha256,
    venue::{
        ClosedPnl,
        InstrumentRules,
        OpenOrder,
        OrderRequest,
        Position,
        TradingStopRequest,
        Venue,
        VenueError,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const READ_RETRIES: usize = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct BybitClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    secret: String,
    recv_window: String,
}

impl BybitClient {
    pub fn new(url: &str, api_key: &str, secret: &str, recv_window: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            url: url.to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            recv_window: recv_window.to_string(),
        }
    }

    /// Canonical sorted query string; the signature is computed over exactly
    /// these bytes and the same bytes go on the wire.
    fn build_query(params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn check(resp: RestResponse) -> Result<serde_json::Value, VenueError> {
        if resp.ret_code != 0 {
            Err(VenueError::Api {
                code: resp.ret_code,
                message: resp.ret_msg,
            })
        } else {
            Ok(resp.result)
        }
    }

    async fn decode(resp: reqwest::Response) -> Result<serde_json::Value, VenueError> {
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(VenueError::RateLimited { retry_after_ms });
        }
        let body: RestResponse = resp.json().await?;
        Self::check(body)
    }

    async fn get_public(&self, path: &str, query: &str) -> Result<serde_json::Value, VenueError> {
        let resp = self
            .client
            .get(format!("{}{}?{}", self.url, path, query))
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn get_signed(&self, path: &str, query: &str) -> Result<serde_json::Value, VenueError> {
        let time = Utc::now().timestamp_millis();
        let sign_body = format!("{time}{}{}{query}", self.api_key, self.recv_window);
        let signature = sign_hmac_sha256(&self.secret, &sign_body);
        let resp = self
            .client
            .get(format!("{}{}?{}", self.url, path, query))
            .header("Accept", "application/json")
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", time)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// `body` must already be the exact serialized bytes; they are signed and
    /// sent unmodified.
    async fn post_signed(&self, path: &str, body: String) -> Result<serde_json::Value, VenueError> {
        let time = Utc::now().timestamp_millis();
        let sign_body = format!("{time}{}{}{body}", self.api_key, self.recv_window);
        let signature = sign_hmac_sha256(&self.secret, &sign_body);
        let resp = self
            .client
            .post(format!("{}{}", self.url, path))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", time)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .body(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Reads are idempotent, so transient failures are retried a few times.
    /// Writes go through `post_signed` exactly once.
    async fn read<F, Fut>(&self, func: F) -> Result<serde_json::Value, VenueError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, VenueError>>,
    {
        let mut attempt = 0;
        loop {
            match func().await {
                Err(error) if error.is_retryable() && attempt + 1 < READ_RETRIES => {
                    debug!(?error, attempt, "retrying venue read");
                    let delay = if let VenueError::RateLimited { retry_after_ms } = error {
                        Duration::from_millis(retry_after_ms)
                    } else {
                        READ_RETRY_DELAY
                    };
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn from_result<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, VenueError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl Venue for BybitClient {
    async fn last_price(&self, category: &str, symbol: &str) -> Result<Decimal, VenueError> {
        let query = Self::build_query(&[
            ("category", category.to_string()),
            ("symbol", symbol.to_string()),
        ]);
        let result = self
            .read(|| self.get_public("/v5/market/tickers", &query))
            .await?;
        let tickers: ListResult<Ticker> = Self::from_result(result)?;
        tickers
            .list
            .first()
            .map(|t| t.last_price)
            .ok_or(VenueError::MissingData("ticker"))
    }

    async fn instrument_rules(
        &self,
        category: &str,
        symbol: &str,
    ) -> Result<InstrumentRules, VenueError> {
        let query = Self::build_query(&[
            ("category", category.to_string()),
            ("symbol", symbol.to_string()),
        ]);
        let result = self
            .read(|| self.get_public("/v5/market/instruments-info", &query))
            .await?;
        let infos: ListResult<InstrumentInfo> = Self::from_result(result)?;
        let info = infos
            .list
            .into_iter()
            .next()
            .ok_or(VenueError::MissingData("instrument info"))?;

        let parse = |s: Option<String>, fallback: &str| -> Decimal {
            s.as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .parse()
                .unwrap_or(Decimal::ZERO)
        };
        let qty_step = parse(
            info.lot_size_filter
                .qty_step
                .or(info.lot_size_filter.base_precision),
            "0.000001",
        );
        Ok(InstrumentRules {
            qty_step,
            min_qty: parse(info.lot_size_filter.min_order_qty, "0"),
            tick_size: parse(info.price_filter.tick_size, "0.0001"),
        })
    }

    async fn wallet_equity(&self, account_type: &str) -> Result<Decimal, VenueError> {
        let query = Self::build_query(&[("accountType", account_type.to_string())]);
        let result = self
            .read(|| self.get_signed("/v5/account/wallet-balance", &query))
            .await?;
        let accounts: ListResult<WalletAccount> = Self::from_result(result)?;
        let account = accounts
            .list
            .into_iter()
            .next()
            .ok_or(VenueError::MissingData("wallet balance"))?;
        account
            .total_equity
            .or(account.total_wallet_balance)
            .or(account.total_available_balance)
            .ok_or(VenueError::MissingData("equity"))
    }

    async fn set_leverage(
        &self,
        category: &str,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), VenueError> {
        let body = serde_json::json!({
            "category": category,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        self.post_signed("/v5/position/set-leverage", body.to_string())
            .await?;
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError> {
        let body = serde_json::to_string(request)?;
        debug!(%body, "place_order");
        let result = self.post_signed("/v5/order/create", body).await?;
        let order: OrderResult = Self::from_result(result)?;
        order.order_id.ok_or(VenueError::MissingData("orderId"))
    }

    async fn cancel_order(
        &self,
        category: &str,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), VenueError> {
        let body = serde_json::json!({
            "category": category,
            "symbol": symbol,
            "orderId": order_id,
        });
        self.post_signed("/v5/order/cancel", body.to_string())
            .await?;
        Ok(())
    }

    async fn open_orders(
        &self,
        category: &str,
        symbol: &str,
    ) -> Result<Vec<OpenOrder>, VenueError> {
        let query = Self::build_query(&[
            ("category", category.to_string()),
            ("symbol", symbol.to_string()),
        ]);
        let result = self
            .read(|| self.get_signed("/v5/order/realtime", &query))
            .await?;
        let orders: ListResult<OpenOrder> = Self::from_result(result)?;
        Ok(orders.list)
    }

    async fn positions(
        &self,
        category: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, VenueError> {
        let mut params = vec![
            ("category", category.to_string()),
            // Required by the venue when listing across all symbols.
            ("settleCoin", "USDT".to_string()),
        ];
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        let query = Self::build_query(&params);
        let result = self
            .read(|| self.get_signed("/v5/position/list", &query))
            .await?;
        let positions: ListResult<Position> = Self::from_result(result)?;
        Ok(positions.list)
    }

    async fn set_trading_stop(&self, request: &TradingStopRequest) -> Result<(), VenueError> {
        let body = serde_json::to_string(request)?;
        debug!(%body, "set_trading_stop");
        match self.post_signed("/v5/position/trading-stop", body).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_benign() => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn closed_pnl(
        &self,
        category: &str,
        symbol: &str,
        start_time: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ClosedPnl>, VenueError> {
        let mut params = vec![
            ("category", category.to_string()),
            ("symbol", symbol.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start_time) = start_time {
            params.push(("startTime", start_time.to_string()));
        }
        let query = Self::build_query(&params);
        let result = self
            .read(|| self.get_signed("/v5/position/closed-pnl", &query))
            .await?;
        let records: ListResult<ClosedPnl> = Self::from_result(result)?;
        Ok(records.list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_keys_are_sorted() {
        let query = BybitClient::build_query(&[
            ("symbol", "BTCUSDT".to_string()),
            ("category", "linear".to_string()),
            ("settleCoin", "USDT".to_string()),
        ]);
        assert_eq!(query, "category=linear&settleCoin=USDT&symbol=BTCUSDT");
    }

    #[test]
    fn rate_limit_is_retryable_but_not_benign() {
        let error = VenueError::RateLimited {
            retry_after_ms: 1000,
        };
        assert!(error.is_retryable());
        assert!(!error.is_benign());

        let not_modified = VenueError::Api {
            code: 34040,
            message: "not modified".to_string(),
        };
        assert!(not_modified.is_benign());
    }
}
