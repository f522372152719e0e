use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use strum::Display;
use typed_builder::TypedBuilder;

/// Deserializes a Decimal from either a string or a bare JSON number.
///
/// Venue feeds disagree on quoting: Binance sends `"p": "42000.5"`, Kraken v2
/// sends `"price": 0.5147`. Number literals go through their shortest
/// round-trip text and `from_str_exact`, never through float arithmetic.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        String(String),
        Number(serde_json::Number),
    }

    match Value::deserialize(deserializer)? {
        Value::String(s) => Decimal::from_str_exact(&s).map_err(serde::de::Error::custom),
        Value::Number(n) => Decimal::from_str_exact(&n.to_string()).map_err(serde::de::Error::custom),
    }
}

/// Taker side of a trade.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// A true buyer-is-maker flag means the aggressor sold.
    pub fn from_buyer_is_maker(maker: bool) -> Self {
        if maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// Venue-assigned trade identifier. Binance uses integers, Kraken spot uses
/// integers and futures uses sequence numbers; some venues use opaque strings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TradeId {
    Int(i64),
    Str(String),
}

impl From<i64> for TradeId {
    fn from(id: i64) -> Self {
        TradeId::Int(id)
    }
}

impl From<String> for TradeId {
    fn from(id: String) -> Self {
        TradeId::Str(id)
    }
}

/// Normalized trade record published on the bus as a single JSON line.
///
/// Timestamps are epoch milliseconds. Prices and quantities keep the venue's
/// decimal representation. Plain trades carry `tradeId`; aggregate trades
/// carry the first/last/aggregate id triple instead.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub topic: String,
    pub exch_timestamp: i64,
    pub local_timestamp: i64,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,
    pub side: Side,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<TradeId>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_trade_id: Option<i64>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trade_id: Option<i64>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_trade_id: Option<i64>,
}
