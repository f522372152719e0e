use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use fluxgate_core::prelude::*;

use crate::adapter::{connection_id_for, market_of, request_id_or_now, AdapterCore, VenueAdapter};
use crate::config::VenueEndpoints;
use crate::ledger::stream_key;
use crate::venues::ParseError;
use crate::ws::{ConnectionManager, StreamHandler};
use crate::GatewayError;

const VENUE: &str = "binance";

/// Binance-family control frame. The same shape subscribes and
/// unsubscribes; `params` lists raw stream names like `btcusdt@aggTrade`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BinanceRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: RequestId,
}

impl BinanceRequest {
    pub fn subscribe(params: Vec<String>, id: RequestId) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<String>, id: RequestId) -> Self {
        Self {
            method: "UNSUBSCRIBE".to_string(),
            params,
            id,
        }
    }
}

#[derive(Deserialize)]
struct BinanceAggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
    #[serde(rename = "f")]
    first_trade_id: i64,
    #[serde(rename = "l")]
    last_trade_id: i64,
    #[serde(rename = "a")]
    agg_trade_id: i64,
}

#[derive(Deserialize)]
struct BinanceTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
    #[serde(rename = "t")]
    trade_id: i64,
}

/// Maps a market-data frame to `(topic, payload)` pairs. Event types
/// without a dedicated mapper are republished verbatim under their derived
/// topic so downstream consumers still see them.
fn map_message(market: &str, data: &Value, local_timestamp: i64) -> Result<Vec<(String, String)>, ParseError> {
    let event_type = data
        .get("e")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("e"))?
        .to_string();
    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("s"))?
        .to_lowercase();
    let topic = Channel::new(VENUE, market, symbol, event_type.as_str()).to_string();

    let record = match event_type.as_str() {
        "aggTrade" => {
            let trade: BinanceAggTrade = serde_json::from_value(data.clone())?;
            TradeEvent::builder()
                .topic(topic.clone())
                .exch_timestamp(trade.trade_time)
                .local_timestamp(local_timestamp)
                .price(trade.price)
                .quantity(trade.quantity)
                .side(Side::from_buyer_is_maker(trade.buyer_is_maker))
                .first_trade_id(Some(trade.first_trade_id))
                .last_trade_id(Some(trade.last_trade_id))
                .agg_trade_id(Some(trade.agg_trade_id))
                .build()
        }
        "trade" => {
            let trade: BinanceTrade = serde_json::from_value(data.clone())?;
            TradeEvent::builder()
                .topic(topic.clone())
                .exch_timestamp(trade.trade_time)
                .local_timestamp(local_timestamp)
                .price(trade.price)
                .quantity(trade.quantity)
                .side(Side::from_buyer_is_maker(trade.buyer_is_maker))
                .trade_id(Some(TradeId::Int(trade.trade_id)))
                .build()
        }
        other => {
            warn!(event_type = other, "no mapper for event type, republishing raw");
            return Ok(vec![(topic, data.to_string())]);
        }
    };

    Ok(vec![(topic, serde_json::to_string(&record)?)])
}

pub struct BinanceAdapter {
    core: AdapterCore,
}

impl BinanceAdapter {
    pub fn new(manager: Arc<ConnectionManager>, publisher: Arc<dyn Publisher>, endpoints: VenueEndpoints) -> Self {
        Self {
            core: AdapterCore::new(manager, publisher, endpoints),
        }
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn subscribe(
        &self,
        symbols: &[String],
        stream_type: &str,
        market: &str,
        request_id: Option<RequestId>,
    ) -> Result<(), GatewayError> {
        let keys: Vec<String> = symbols.iter().map(|s| stream_key(s, stream_type)).collect();
        let _ops = self.core.lock_ops().await;
        let connection_id = self.core.ensure_connection(market).await?;

        let pending = self.core.unsubscribed_keys(&keys, market);
        if !pending.is_empty() {
            let frame = BinanceRequest::subscribe(pending, request_id_or_now(request_id));
            self.core.send(&connection_id, serde_json::to_string(&frame)?).await?;
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
        request_id: Option<RequestId>,
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

        let frame = BinanceRequest::unsubscribe(removing, request_id_or_now(request_id));
        let result = self.core.send(&connection_id, serde_json::to_string(&frame)?).await;
        self.core.prune(market);
        result
    }
}

#[async_trait]
impl StreamHandler for BinanceAdapter {
    async fn on_message(&self, connection_id: &str, frame: &str) {
        let local_timestamp = now_ms();
        let data: Value = match serde_json::from_str(frame) {
            Ok(data) => data,
            Err(e) => {
                warn!(connection_id, "malformed frame: {}", e);
                return;
            }
        };
        let market = market_of(connection_id);

        // Venue-level heartbeat: {"ping": n} expects {"pong": n} back.
        if let Some(ping) = data.get("ping") {
            debug!(connection_id, "ping received, replying");
            let pong = serde_json::json!({ "pong": ping }).to_string();
            if let Err(e) = self.core.send(connection_id, pong).await {
                error!(connection_id, "failed to send pong: {}", e);
            }
            return;
        }

        // Subscribe/unsubscribe ack
        if data.get("result").is_some() && data.get("id").is_some() {
            debug!(connection_id, "subscription ack");
            return;
        }

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
        let frame = BinanceRequest::subscribe(streams, RequestId::Int(now_ms()));
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                error!(connection_id, "failed to build re-subscribe frame: {}", e);
                return;
            }
        };
        match self.core.send(connection_id, payload).await {
            Ok(()) => info!(connection_id, restored, "restored subscriptions"),
            Err(e) => error!(connection_id, "failed to restore subscriptions: {}", e),
        }
    }
}
