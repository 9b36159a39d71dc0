//! Environment-driven configuration. Missing credentials are fatal at
//! startup; every tunable has a conservative default.

use std::{env, path::PathBuf, str::FromStr};

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Chat
    pub discord_token: String,
    pub channel_id: String,

    // Venue
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub bybit_testnet: bool,
    pub bybit_demo: bool,
    pub recv_window: String,
    pub account_type: String,
    pub category: String,
    pub quote: String,

    // Sizing
    pub leverage: u32,
    pub risk_pct: Decimal,

    // Limits
    pub max_concurrent_trades: usize,
    pub max_trades_per_day: u32,
    pub max_signal_lag_sec: i64,

    // Entry rules
    pub entry_expiration_min: i64,
    pub entry_too_far_pct: Decimal,
    pub entry_trigger_buffer_pct: Decimal,
    pub entry_limit_price_offset_pct: Decimal,
    pub entry_expiration_price_pct: Decimal,

    // TP/SL
    pub initial_sl_pct: Decimal,
    pub move_sl_to_be_on_tp1: bool,
    pub tp_splits: Vec<Decimal>,
    pub fallback_tp_pct: Vec<Decimal>,
    pub trail_after_tp_index: u32,
    pub trail_distance_pct: Decimal,
    pub trail_activate_on_tp: bool,

    // DCA
    pub dca_qty_mults: Vec<Decimal>,

    // Timing
    pub poll_seconds: u64,
    pub poll_jitter_max: u64,
    pub signal_update_interval_sec: u64,

    // Alerts
    pub position_alert_thresholds: Vec<Decimal>,

    // Misc
    pub dry_run: bool,
    pub state_file: PathBuf,
    pub log_level: String,
}

fn get(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    get(name).ok_or(ConfigError::Missing(name))
}

fn get_or(name: &str, default: &str) -> String {
    get(name).unwrap_or_else(|| default.to_string())
}

fn parse_as<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = get_or(name, default);
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw,
    })
}

fn get_bool(name: &str, default: bool) -> bool {
    match get(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        None => default,
    }
}

pub fn parse_decimal_list(raw: &str) -> Result<Vec<Decimal>, String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Decimal>().map_err(|_| s.to_string()))
        .collect()
}

fn get_list(name: &'static str, default: &str) -> Result<Vec<Decimal>, ConfigError> {
    let raw = get_or(name, default);
    parse_decimal_list(&raw).map_err(|value| ConfigError::Invalid { name, value })
}

/// Splits summing above 100% are a user error and get scaled back to 100;
/// sums below 100 are intentional (runner) and kept as-is.
pub fn normalize_splits(splits: Vec<Decimal>) -> Vec<Decimal> {
    let total: Decimal = splits.iter().sum();
    if total > Decimal::ONE_HUNDRED {
        splits
            .into_iter()
            .map(|s| s * Decimal::ONE_HUNDRED / total)
            .collect()
    } else {
        splits
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            discord_token: require("DISCORD_TOKEN")?,
            channel_id: require("CHANNEL_ID")?,
            bybit_api_key: require("BYBIT_API_KEY")?,
            bybit_api_secret: require("BYBIT_API_SECRET")?,
            bybit_testnet: get_bool("BYBIT_TESTNET", false),
            bybit_demo: get_bool("BYBIT_DEMO", false),
            recv_window: get_or("RECV_WINDOW", "5000"),
            account_type: get_or("ACCOUNT_TYPE", "UNIFIED"),
            category: get_or("CATEGORY", "linear"),
            quote: get_or("QUOTE", "USDT").to_uppercase(),
            leverage: parse_as("LEVERAGE", "5")?,
            risk_pct: parse_as("RISK_PCT", "5")?,
            max_concurrent_trades: parse_as("MAX_CONCURRENT_TRADES", "3")?,
            max_trades_per_day: parse_as("MAX_TRADES_PER_DAY", "20")?,
            max_signal_lag_sec: parse_as("MAX_SIGNAL_LAG_SEC", "300")?,
            entry_expiration_min: parse_as("ENTRY_EXPIRATION_MIN", "180")?,
            entry_too_far_pct: parse_as("ENTRY_TOO_FAR_PCT", "0.5")?,
            entry_trigger_buffer_pct: parse_as("ENTRY_TRIGGER_BUFFER_PCT", "0.0")?,
            entry_limit_price_offset_pct: parse_as("ENTRY_LIMIT_PRICE_OFFSET_PCT", "0.0")?,
            entry_expiration_price_pct: parse_as("ENTRY_EXPIRATION_PRICE_PCT", "0.6")?,
            initial_sl_pct: parse_as("INITIAL_SL_PCT", "19.0")?,
            move_sl_to_be_on_tp1: get_bool("MOVE_SL_TO_BE_ON_TP1", true),
            tp_splits: normalize_splits(get_list("TP_SPLITS", "30,30,30")?),
            fallback_tp_pct: get_list("FALLBACK_TP_PCT", "0.85,1.65,4.0")?,
            trail_after_tp_index: parse_as("TRAIL_AFTER_TP_INDEX", "3")?,
            trail_distance_pct: parse_as("TRAIL_DISTANCE_PCT", "2.0")?,
            trail_activate_on_tp: get_bool("TRAIL_ACTIVATE_ON_TP", true),
            dca_qty_mults: get_list("DCA_QTY_MULTS", "1.5,2.25")?,
            poll_seconds: parse_as("POLL_SECONDS", "15")?,
            poll_jitter_max: parse_as("POLL_JITTER_MAX", "5")?,
            signal_update_interval_sec: parse_as("SIGNAL_UPDATE_INTERVAL_SEC", "60")?,
            position_alert_thresholds: get_list("POSITION_ALERT_THRESHOLDS", "25,35,50")?,
            dry_run: get_bool("DRY_RUN", true),
            state_file: PathBuf::from(get_or("STATE_FILE", "state.json")),
            log_level: get_or("LOG_LEVEL", "info"),
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn decimal_list_parses_and_skips_blanks() {
        assert_eq!(
            parse_decimal_list("30,30, 30").unwrap(),
            vec![dec!(30), dec!(30), dec!(30)]
        );
        assert_eq!(parse_decimal_list("1.5,2.25,").unwrap(), vec![dec!(1.5), dec!(2.25)]);
        assert!(parse_decimal_list("a,b").is_err());
    }

    #[test]
    fn splits_over_100_are_scaled_back() {
        let splits = normalize_splits(vec![dec!(60), dec!(60)]);
        assert_eq!(splits, vec![dec!(50), dec!(50)]);
    }

    #[test]
    fn splits_under_100_keep_the_runner() {
        let splits = normalize_splits(vec![dec!(30), dec!(30), dec!(30)]);
        assert_eq!(splits, vec![dec!(30), dec!(30), dec!(30)]);
    }
}
