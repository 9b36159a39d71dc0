use std::{
    fmt,
    fmt::Write,
};

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Deserializer,
    de,
    de::{Error, Visitor},
};
use sha2::Sha256;

/// Floors `x` down to a multiple of `step`. A non-positive step leaves the
/// value untouched.
pub fn floor_to_step(x: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return x;
    }
    ((x / step).floor() * step).normalize()
}

/// Rounds `price` to the nearest multiple of `tick`.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    ((price / tick).round() * tick).normalize()
}

/// Floors `qty` to the lot step, then clamps up to the venue minimum.
pub fn round_qty(qty: Decimal, step: Decimal, min_qty: Decimal) -> Decimal {
    let qty = floor_to_step(qty, step);
    if qty < min_qty { min_qty } else { qty }
}

struct I64Visitor;

impl Visitor<'_> for I64Visitor {
    type Value = Option<i64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string containing an i64 number")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if s.is_empty() {
            Ok(Some(0))
        } else {
            Ok(Some(s.parse::<i64>().map_err(Error::custom)?))
        }
    }
}

struct DecimalVisitor;

impl Visitor<'_> for DecimalVisitor {
    type Value = Option<Decimal>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string containing a decimal number")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if s.is_empty() {
            Ok(None)
        } else {
            Ok(Some(s.parse::<Decimal>().map_err(Error::custom)?))
        }
    }
}

struct OptionDecimalVisitor;

impl<'de> Visitor<'de> for OptionDecimalVisitor {
    type Value = Option<Decimal>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string containing a decimal number")
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(None)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(DecimalVisitor)
    }
}

/// Bybit encodes numbers as strings; an empty string means zero.
pub fn from_str_to_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer
        .deserialize_str(DecimalVisitor)
        .map(|value| value.unwrap_or(Decimal::ZERO))
}

/// An absent or empty string maps to `None`.
pub fn from_str_to_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(OptionDecimalVisitor)
}

pub fn from_str_to_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer
        .deserialize_str(I64Visitor)
        .map(|value| value.unwrap_or(0))
}

pub fn sign_hmac_sha256(secret: &str, s: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(s.as_bytes());
    let hash = mac.finalize().into_bytes();
    let mut tmp = String::with_capacity(hash.len() * 2);
    for c in hash {
        write!(&mut tmp, "{c:02x}").unwrap();
    }
    tmp
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn floor_to_step_rounds_down() {
        assert_eq!(floor_to_step(dec!(1.2345), dec!(0.01)), dec!(1.23));
        assert_eq!(floor_to_step(dec!(0.999), dec!(0.1)), dec!(0.9));
        assert_eq!(floor_to_step(dec!(5), dec!(0)), dec!(5));
    }

    #[test]
    fn round_to_tick_nearest() {
        assert_eq!(round_to_tick(dec!(100.026), dec!(0.05)), dec!(100.05));
        assert_eq!(round_to_tick(dec!(100.024), dec!(0.05)), dec!(100));
        assert_eq!(round_to_tick(dec!(2.08), dec!(0.01)), dec!(2.08));
    }

    #[test]
    fn round_qty_clamps_to_min() {
        assert_eq!(round_qty(dec!(0.0004), dec!(0.001), dec!(0.001)), dec!(0.001));
        assert_eq!(round_qty(dec!(0.1599), dec!(0.01), dec!(0.01)), dec!(0.15));
    }

    #[test]
    fn signature_is_hex_encoded_sha256() {
        let sig = sign_hmac_sha256("secret", "GET/realtime1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
