use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use fluxgate_core::prelude::*;

use crate::adapter::{connection_id_for, market_of, AdapterCore, VenueAdapter};
use crate::config::VenueEndpoints;
use crate::ledger::{split_stream_key, stream_key};
use crate::venues::ParseError;
use crate::ws::{ConnectionManager, StreamHandler};
use crate::GatewayError;

const VENUE: &str = "kraken";

/// Spot uses the v2 API (`method`/`params`), futures the v1 API
/// (`event`/`feed`). One adapter handles both, branching on the market.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KrakenSpotRequest {
    pub method: String,
    pub params: KrakenSpotParams,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KrakenSpotParams {
    pub channel: String,
    pub symbol: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KrakenFuturesRequest {
    pub event: String,
    pub feed: String,
    pub product_ids: Vec<String>,
}

/// Builds the wire frame for `method` (`subscribe`/`unsubscribe`) on the
/// given market.
fn subscription_frame(
    method: &str,
    market: &str,
    stream_type: &str,
    symbols: Vec<String>,
) -> Result<String, GatewayError> {
    match market {
        "spot" => Ok(serde_json::to_string(&KrakenSpotRequest {
            method: method.to_string(),
            params: KrakenSpotParams {
                channel: stream_type.to_string(),
                symbol: symbols,
            },
        })?),
        "perp" => Ok(serde_json::to_string(&KrakenFuturesRequest {
            event: method.to_string(),
            feed: stream_type.to_string(),
            product_ids: symbols,
        })?),
        other => Err(GatewayError::UnsupportedMarket {
            venue: VENUE,
            market: other.to_string(),
        }),
    }
}

/// Control traffic that never reaches the bus: heartbeats, subscribe and
/// unsubscribe acks, status updates, initial snapshots, and the v1 API's
/// subscribe echo.
fn filter_message(data: &Value) -> bool {
    match data.get("channel").and_then(Value::as_str) {
        Some("heartbeat") | Some("status") => return true,
        _ => {}
    }
    if let Some(method) = data.get("method").and_then(Value::as_str) {
        if (method == "subscribe" || method == "unsubscribe")
            && data.get("success").and_then(Value::as_bool) == Some(true)
        {
            return true;
        }
    }
    if data.get("type").and_then(Value::as_str) == Some("snapshot") {
        return true;
    }
    if let Some(feed) = data.get("feed").and_then(Value::as_str) {
        if feed.ends_with("_snapshot") {
            return true;
        }
    }
    if data.get("event").and_then(Value::as_str) == Some("subscribe") {
        return true;
    }
    false
}

#[derive(Deserialize)]
struct KrakenSpotTrade {
    symbol: String,
    side: Side,
    #[serde(deserialize_with = "deserialize_decimal")]
    price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    qty: Decimal,
    trade_id: i64,
    timestamp: String,
}

#[derive(Deserialize)]
struct KrakenFuturesTrade {
    time: i64,
    #[serde(deserialize_with = "deserialize_decimal")]
    price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    qty: Decimal,
    side: Side,
    seq: i64,
}

fn map_message(market: &str, data: &Value, local_timestamp: i64) -> Result<Vec<(String, String)>, ParseError> {
    if market == "spot" {
        map_v2(market, data, local_timestamp)
    } else {
        map_v1(market, data, local_timestamp)
    }
}

/// v2 (spot): `channel` discriminates, `data` is a batch of records with
/// ISO-8601 timestamps.
fn map_v2(market: &str, data: &Value, local_timestamp: i64) -> Result<Vec<(String, String)>, ParseError> {
    let channel = data
        .get("channel")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("channel"))?;
    let items = data
        .get("data")
        .and_then(Value::as_array)
        .ok_or(ParseError::MissingField("data"))?;

    if channel != "trade" {
        let symbol = items
            .first()
            .and_then(|item| item.get("symbol"))
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("symbol"))?;
        let topic = Channel::new(VENUE, market, symbol, channel).to_string();
        warn!(channel, "no mapper for channel, republishing raw");
        return Ok(vec![(topic, data.to_string())]);
    }

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let trade: KrakenSpotTrade = serde_json::from_value(item.clone())?;
        let topic = Channel::new(VENUE, market, trade.symbol.as_str(), channel).to_string();
        let record = TradeEvent::builder()
            .topic(topic.clone())
            .exch_timestamp(rfc3339_to_ms(&trade.timestamp)?)
            .local_timestamp(local_timestamp)
            .price(trade.price)
            .quantity(trade.qty)
            .side(trade.side)
            .trade_id(Some(TradeId::Int(trade.trade_id)))
            .build();
        records.push((topic, serde_json::to_string(&record)?));
    }
    Ok(records)
}

/// v1 (futures): `feed` discriminates, one record per frame, epoch-ms
/// timestamps.
fn map_v1(market: &str, data: &Value, local_timestamp: i64) -> Result<Vec<(String, String)>, ParseError> {
    let feed = data
        .get("feed")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("feed"))?;
    let product_id = data
        .get("product_id")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("product_id"))?;
    let topic = Channel::new(VENUE, market, product_id, feed).to_string();

    if feed != "trade" {
        warn!(feed, "no mapper for feed, republishing raw");
        return Ok(vec![(topic, data.to_string())]);
    }

    let trade: KrakenFuturesTrade = serde_json::from_value(data.clone())?;
    let record = TradeEvent::builder()
        .topic(topic.clone())
        .exch_timestamp(trade.time)
        .local_timestamp(local_timestamp)
        .price(trade.price)
        .quantity(trade.qty)
        .side(trade.side)
        .trade_id(Some(TradeId::Int(trade.seq)))
        .build();
    Ok(vec![(topic, serde_json::to_string(&record)?)])
}

/// Groups stream keys as `stream_type -> symbols`, deduped, in key order.
fn group_by_stream_type(keys: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        let (symbol, stream_type) = split_stream_key(key);
        let symbols = groups.entry(stream_type.to_string()).or_default();
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    groups
}

pub struct KrakenAdapter {
    core: AdapterCore,
}

impl KrakenAdapter {
    pub fn new(manager: Arc<ConnectionManager>, publisher: Arc<dyn Publisher>, endpoints: VenueEndpoints) -> Self {
        Self {
            core: AdapterCore::new(manager, publisher, endpoints),
        }
    }

    /// One UNSUBSCRIBE frame per stream type; the v2/v1 frames carry a
    /// single channel each.
    async fn send_frames(&self, connection_id: &str, method: &str, market: &str, keys: &[String]) -> Result<(), GatewayError> {
        for (stream_type, symbols) in group_by_stream_type(keys) {
            let frame = subscription_frame(method, market, &stream_type, symbols)?;
            self.core.send(connection_id, frame).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for KrakenAdapter {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn subscribe(
        &self,
        symbols: &[String],
        stream_type: &str,
        market: &str,
        _request_id: Option<RequestId>,
    ) -> Result<(), GatewayError> {
        if !matches!(market, "spot" | "perp") {
            return Err(GatewayError::UnsupportedMarket {
                venue: VENUE,
                market: market.to_string(),
            });
        }

        let keys: Vec<String> = symbols.iter().map(|s| stream_key(s, stream_type)).collect();
        let _ops = self.core.lock_ops().await;
        let connection_id = self.core.ensure_connection(market).await?;

        let pending = self.core.unsubscribed_keys(&keys, market);
        if !pending.is_empty() {
            let pending_symbols: Vec<String> = pending
                .iter()
                .map(|key| split_stream_key(key).0.to_string())
                .collect();
            let frame = subscription_frame("subscribe", market, stream_type, pending_symbols)?;
            self.core.send(&connection_id, frame).await?;
        }
        self.core.record_subscribe(&keys, market);
        debug!(market, ?keys, "subscribed");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        symbols: &[String],
        stream_type: &str,
        market: &str,
        _request_id: Option<RequestId>,
    ) -> Result<(), GatewayError> {
        let keys: Vec<String> = symbols.iter().map(|s| stream_key(s, stream_type)).collect();
        let connection_id = connection_id_for(market);
        let _ops = self.core.lock_ops().await;

        // Demand is released first and not restored if the frame fails; the
        // keys stay listed by the next zero-key sweep.
        let removing = self.core.release_keys(&keys, market);
        if removing.is_empty() {
            self.core.prune(market);
            return Ok(());
        }
        debug!(market, ?removing, "unsubscribing upstream");

        let result = self.send_frames(&connection_id, "unsubscribe", market, &removing).await;
        self.core.prune(market);
        result
    }
}

#[async_trait]
impl StreamHandler for KrakenAdapter {
    async fn on_message(&self, connection_id: &str, frame: &str) {
        let local_timestamp = now_ms();
        let data: Value = match serde_json::from_str(frame) {
            Ok(data) => data,
            Err(e) => {
                warn!(connection_id, "malformed frame: {}", e);
                return;
            }
        };
        if filter_message(&data) {
            debug!(connection_id, "filtered control frame");
            return;
        }
        let market = market_of(connection_id);

        match map_message(market, &data, local_timestamp) {
            Ok(records) => {
                for (topic, payload) in records {
                    self.core.publish(&topic, payload).await;
                }
            }
            Err(e) => warn!(connection_id, "dropping unmappable frame: {}", e),
        }
    }

    async fn on_reconnect(&self, connection_id: &str) {
        let market = market_of(connection_id);
        let streams = self.core.active_keys(market);
        if streams.is_empty() {
            return;
        }
        let restored = streams.len();
        match self.send_frames(connection_id, "subscribe", market, &streams).await {
            Ok(()) => info!(connection_id, restored, "restored subscriptions"),
            Err(e) => error!(connection_id, "failed to restore subscriptions: {}", e),
        }
    }
}
