//! Signal parsing: raw chat text to a structured intent.
//!
//! The providers publish in a handful of layouts, so parsing goes through a
//! registry of formats tried in a fixed precedence order. The first format
//! whose shape matches claims the message; fields are never merged across
//! formats.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::venue::Side;

const NUM: &str = r"([0-9][0-9,]*\.?[0-9]*)";

#[derive(Clone, Debug, PartialEq)]
pub struct SignalIntent {
    pub base_asset: String,
    pub quote_asset: String,
    pub side: Side,
    pub trigger_price: Decimal,
    pub tp_prices: Vec<Decimal>,
    pub dca_prices: Vec<Decimal>,
    pub sl_price: Option<Decimal>,
    pub source_msg_id: String,
    pub raw_text: String,
}

impl SignalIntent {
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base_asset, self.quote_asset)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalStatus {
    Active,
    Breakeven,
    Win,
    Cancelled,
    Closed,
    Unknown,
}

impl SignalStatus {
    /// Only messages still awaiting their trigger may open a fresh trade.
    pub fn eligible_for_entry(self) -> bool {
        matches!(self, SignalStatus::Active | SignalStatus::Unknown)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignalStatus::Win | SignalStatus::Cancelled | SignalStatus::Closed
        )
    }

    /// The signal provider retracted the call; any trade derived from it is
    /// to be cancelled.
    pub fn is_revoked(self) -> bool {
        matches!(self, SignalStatus::Cancelled | SignalStatus::Closed)
    }
}

/// Latest values re-extracted from a previously matched message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalUpdate {
    pub sl_price: Option<Decimal>,
    pub tp_prices: Vec<Decimal>,
    pub dca_prices: Vec<Decimal>,
}

struct Fields {
    base: String,
    side: Side,
    trigger: Option<Decimal>,
    tps: Vec<Decimal>,
    dcas: Vec<Decimal>,
    sl: Option<Decimal>,
}

struct SignalFormat {
    name: &'static str,
    matches: fn(&str) -> bool,
    extract: fn(&str) -> Option<Fields>,
}

/// Precedence: trigger style, then entry style, then inline style.
static FORMATS: &[SignalFormat] = &[
    SignalFormat {
        name: "trigger",
        matches: |text| HEADER.is_match(text) && TRIGGER_LINE.is_match(text),
        extract: extract_trigger_style,
    },
    SignalFormat {
        name: "entry",
        matches: |text| HEADER.is_match(text) && ENTRY_LINE.is_match(text),
        extract: extract_entry_style,
    },
    SignalFormat {
        name: "inline",
        matches: |text| INLINE_HEADER.is_match(text),
        extract: extract_inline_style,
    },
];

// Values are wrapped in markdown emphasis and code ticks ("**TP1:** `$0.9`"),
// so every label/value regex tolerates `*` and backtick runs around the number.
const VALUE: &str = r"\s*:\s*\**\s*`?\$?\s*";

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z0-9]+)\**\s+(LONG|SHORT)\s+Signal").unwrap()
});
static TRIGGER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)Enter\s+on\s+Trigger\**{VALUE}{NUM}")).unwrap()
});
static ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bEntry\b\**{VALUE}{NUM}")).unwrap()
});
static TP_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    (1..=6)
        .map(|i| Regex::new(&format!(r"(?i)\bTP{i}\b\**{VALUE}{NUM}")).unwrap())
        .collect()
});
static DCA_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    (1..=3)
        .map(|i| Regex::new(&format!(r"(?i)\bDCA\s*#?{i}\b\**{VALUE}{NUM}")).unwrap())
        .collect()
});
static STOP_LOSS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bStop\s+Loss\b\**{VALUE}{NUM}")).unwrap()
});
static SL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bSL\b\**{VALUE}{NUM}")).unwrap()
});

static INLINE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(LONG|SHORT)\b\s+([A-Z0-9]+)\s*@\s*\$?\s*{NUM}")).unwrap()
});
static INLINE_TPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bTPs?\b\s*:\s*((?:\$?\s*[0-9][0-9.]*\s*/?\s*)+)").unwrap()
});
static INLINE_DCAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bDCAs?\b\s*:\s*((?:\$?\s*[0-9][0-9.]*\s*/?\s*)+)").unwrap()
});

static RE_CANCELLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(cancell?ed|invalidated)\b").unwrap());
static RE_CLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(closed|stopped\s+out)\b|stop\s+loss\s+hit").unwrap()
});
static RE_WIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bwin\b|all\s+targets?\s+(hit|reached)").unwrap()
});
static RE_BREAKEVEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)break\s*-?\s*even|moved\s+to\s+be\b").unwrap());
static RE_ACTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)awaiting\s+(entry|trigger)|\bactive\b").unwrap()
});

fn parse_num(s: &str) -> Option<Decimal> {
    s.replace(',', "").parse().ok()
}

fn capture_num(re: &Regex, text: &str) -> Option<Decimal> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_num(m.as_str()))
}

fn side_from_direction(direction: &str) -> Side {
    if direction.eq_ignore_ascii_case("LONG") {
        Side::Buy
    } else {
        Side::Sell
    }
}

/// Every indexed slot is probed; a missing TP2 does not hide a present TP3.
fn indexed_prices(res: &[Regex], text: &str) -> Vec<Decimal> {
    res.iter()
        .filter_map(|re| capture_num(re, text))
        .filter(|p| *p > Decimal::ZERO)
        .collect()
}

fn extract_trigger_style(text: &str) -> Option<Fields> {
    let header = HEADER.captures(text)?;
    Some(Fields {
        base: header[1].to_uppercase(),
        side: side_from_direction(&header[2]),
        trigger: capture_num(&TRIGGER_LINE, text),
        tps: indexed_prices(&TP_LINES, text),
        dcas: indexed_prices(&DCA_LINES, text),
        sl: capture_num(&STOP_LOSS_LINE, text),
    })
}

fn extract_entry_style(text: &str) -> Option<Fields> {
    let header = HEADER.captures(text)?;
    Some(Fields {
        base: header[1].to_uppercase(),
        side: side_from_direction(&header[2]),
        trigger: capture_num(&ENTRY_LINE, text),
        tps: indexed_prices(&TP_LINES, text),
        dcas: indexed_prices(&DCA_LINES, text),
        sl: capture_num(&STOP_LOSS_LINE, text).or_else(|| capture_num(&SL_LINE, text)),
    })
}

fn slash_list(re: &Regex, text: &str) -> Vec<Decimal> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .split('/')
                .filter_map(|part| {
                    let cleaned: String = part
                        .chars()
                        .filter(|c| c.is_ascii_digit() || *c == '.')
                        .collect();
                    cleaned.parse::<Decimal>().ok()
                })
                .filter(|p| *p > Decimal::ZERO)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_inline_style(text: &str) -> Option<Fields> {
    let header = INLINE_HEADER.captures(text)?;
    Some(Fields {
        base: header[2].to_uppercase(),
        side: side_from_direction(&header[1]),
        trigger: parse_num(&header[3]),
        tps: slash_list(&INLINE_TPS, text),
        dcas: slash_list(&INLINE_DCAS, text),
        sl: capture_num(&SL_LINE, text),
    })
}

/// Maps raw message text to a [`SignalIntent`]. Pure and idempotent. Text
/// whose status is clearly terminal never yields an intent.
pub fn parse(text: &str, quote_asset: &str, source_msg_id: &str) -> Option<SignalIntent> {
    if classify_status(text).is_terminal() {
        return None;
    }
    let format = FORMATS.iter().find(|f| (f.matches)(text))?;
    let fields = (format.extract)(text)?;
    let trigger = fields.trigger?;
    if trigger <= Decimal::ZERO {
        return None;
    }
    Some(SignalIntent {
        base_asset: fields.base,
        quote_asset: quote_asset.to_uppercase(),
        side: fields.side,
        trigger_price: trigger,
        tp_prices: fields.tps,
        dca_prices: fields.dcas,
        sl_price: fields.sl.filter(|p| *p > Decimal::ZERO),
        source_msg_id: source_msg_id.to_string(),
        raw_text: text.to_string(),
    })
}

/// Short stable hash over the salient fields, used for dedup.
pub fn fingerprint(intent: &SignalIntent) -> String {
    let tps = intent
        .tp_prices
        .iter()
        .map(|p| p.normalize().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{tps}",
            intent.symbol(),
            intent.side,
            intent.trigger_price.normalize()
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();
    let mut out = String::with_capacity(10);
    for byte in digest.iter().take(5) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Classifies the lifecycle marker present in a message, if any.
pub fn classify_status(text: &str) -> SignalStatus {
    if RE_CANCELLED.is_match(text) {
        SignalStatus::Cancelled
    } else if RE_CLOSED.is_match(text) {
        SignalStatus::Closed
    } else if RE_WIN.is_match(text) {
        SignalStatus::Win
    } else if RE_BREAKEVEN.is_match(text) {
        SignalStatus::Breakeven
    } else if RE_ACTIVE.is_match(text) {
        SignalStatus::Active
    } else {
        SignalStatus::Unknown
    }
}

/// Re-extracts the mutable fields from a previously matched message so
/// amendments can be reconciled against the stored plan.
pub fn parse_update(text: &str) -> Option<SignalUpdate> {
    let format = FORMATS.iter().find(|f| (f.matches)(text))?;
    let fields = (format.extract)(text)?;
    Some(SignalUpdate {
        sl_price: fields.sl.filter(|p| *p > Decimal::ZERO),
        tp_prices: fields.tps,
        dca_prices: fields.dcas,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const TRIGGER_STYLE: &str = "\
<@&123> 📊 NEW SIGNAL • BARD • Entry $0.92000

**BARD** SHORT Signal
BARD DIRECT LINKS: [ByBit](https://www.bybit.com/trade/usdt/bardusdt)

**Enter on Trigger:** `$0.92000`

**TP1:** `$0.91218`
**TP2:** `$0.90482`
**TP3:** `$0.88274`
**TP4:** `$0.55200`

**DCA #1:** `$0.96600`
**DCA #2:** `$1.05800`

`⏳ AWAITING ENTRY - Waiting for $0.92000 trigger`";

    #[test]
    fn parses_trigger_style() {
        let intent = parse(TRIGGER_STYLE, "USDT", "42").unwrap();
        assert_eq!(intent.base_asset, "BARD");
        assert_eq!(intent.symbol(), "BARDUSDT");
        assert_eq!(intent.side, Side::Sell);
        assert_eq!(intent.trigger_price, dec!(0.92000));
        assert_eq!(
            intent.tp_prices,
            vec![dec!(0.91218), dec!(0.90482), dec!(0.88274), dec!(0.55200)]
        );
        assert_eq!(intent.dca_prices, vec![dec!(0.96600), dec!(1.05800)]);
        assert_eq!(intent.sl_price, None);
        assert_eq!(intent.source_msg_id, "42");
    }

    #[test]
    fn parses_entry_style_with_stop_loss() {
        let text = "ABC LONG Signal\nEntry: $1,250.5\nTP1: $1,260\nTP2: $1,270\nSL: $1,200";
        let intent = parse(text, "USDT", "7").unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.trigger_price, dec!(1250.5));
        assert_eq!(intent.tp_prices, vec![dec!(1260), dec!(1270)]);
        assert_eq!(intent.sl_price, Some(dec!(1200)));
    }

    #[test]
    fn parses_inline_style() {
        let text = "LONG XYZ @ 2.45\nTP: 2.5 / 2.6 / 2.8\nDCA: 2.3 / 2.1\nSL: 2.0";
        let intent = parse(text, "USDT", "9").unwrap();
        assert_eq!(intent.base_asset, "XYZ");
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.trigger_price, dec!(2.45));
        assert_eq!(intent.tp_prices, vec![dec!(2.5), dec!(2.6), dec!(2.8)]);
        assert_eq!(intent.dca_prices, vec![dec!(2.3), dec!(2.1)]);
        assert_eq!(intent.sl_price, Some(dec!(2.0)));
    }

    #[test]
    fn first_matching_format_wins_without_merging() {
        // Both a trigger line and an entry line: the trigger format claims
        // the message and the entry price is ignored.
        let text = "ABC LONG Signal\nEnter on Trigger: $10\nEntry: $11\nTP1: $12";
        let intent = parse(text, "USDT", "1").unwrap();
        assert_eq!(intent.trigger_price, dec!(10));
    }

    #[test]
    fn tolerates_gaps_in_indexed_ladders() {
        let text = "ABC LONG Signal\nEnter on Trigger: $10\nTP1: $11\nTP3: $13\nDCA #2: $9";
        let intent = parse(text, "USDT", "1").unwrap();
        assert_eq!(intent.tp_prices, vec![dec!(11), dec!(13)]);
        assert_eq!(intent.dca_prices, vec![dec!(9)]);
    }

    #[test]
    fn rejects_without_header_or_trigger() {
        assert!(parse("random chatter about LONG positions", "USDT", "1").is_none());
        assert!(parse("ABC LONG Signal\nTP1: $12", "USDT", "1").is_none());
    }

    #[test]
    fn rejects_terminal_status_text() {
        let text = "ABC LONG Signal\nEnter on Trigger: $10\nTP1: $12\nSIGNAL CANCELLED";
        assert!(parse(text, "USDT", "1").is_none());
        let text = "ABC LONG Signal\nEnter on Trigger: $10\nTP1: $12\nSTOPPED OUT";
        assert!(parse(text, "USDT", "1").is_none());
    }

    #[test]
    fn classifies_status_markers() {
        assert_eq!(classify_status("⏳ AWAITING ENTRY"), SignalStatus::Active);
        assert_eq!(classify_status("Moved to Breakeven"), SignalStatus::Breakeven);
        assert_eq!(classify_status("WIN - all targets hit"), SignalStatus::Win);
        assert_eq!(classify_status("SIGNAL CANCELLED"), SignalStatus::Cancelled);
        assert_eq!(classify_status("STOPPED OUT"), SignalStatus::Closed);
        assert_eq!(classify_status("hello world"), SignalStatus::Unknown);
    }

    #[test]
    fn fingerprint_is_stable_and_side_sensitive() {
        let a = parse(TRIGGER_STYLE, "USDT", "1").unwrap();
        let b = parse(TRIGGER_STYLE, "USDT", "2").unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 10);

        let mut c = a.clone();
        c.side = Side::Buy;
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn update_probe_reads_latest_values() {
        let text = "BARD SHORT Signal\nEnter on Trigger: $0.92\nTP1: $0.91\nTP2: $0.89\nStop Loss: $0.95";
        let update = parse_update(text).unwrap();
        assert_eq!(update.sl_price, Some(dec!(0.95)));
        assert_eq!(update.tp_prices, vec![dec!(0.91), dec!(0.89)]);
        assert!(update.dca_prices.is_empty());
    }
}
