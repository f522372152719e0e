use std::sync::Arc;

use async_trait::async_trait;
use strum::{Display, EnumString};

use fluxgate_core::prelude::*;

use crate::config::{GatewayConfig, VenueEndpoints};
use crate::ledger::SubscriptionLedger;
use crate::venues::{BinanceAdapter, KrakenAdapter};
use crate::ws::{ConnectionManager, StreamHandler};
use crate::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Venue {
    Binance,
    Kraken,
}

/// Venue-facing capability surface: canonical subscription vocabulary in,
/// venue wire protocol out, plus the stream callbacks registered with the
/// connection manager.
#[async_trait]
pub trait VenueAdapter: StreamHandler {
    fn venue(&self) -> &'static str;

    async fn subscribe(
        &self,
        symbols: &[String],
        stream_type: &str,
        market: &str,
        request_id: Option<RequestId>,
    ) -> Result<(), GatewayError>;

    async fn unsubscribe(
        &self,
        symbols: &[String],
        stream_type: &str,
        market: &str,
        request_id: Option<RequestId>,
    ) -> Result<(), GatewayError>;
}

/// Constructs the adapter for a venue. The same value serves as the
/// manager's stream handler; returning both flavors here saves the caller a
/// cast.
pub fn build_adapter(
    venue: Venue,
    manager: Arc<ConnectionManager>,
    publisher: Arc<dyn Publisher>,
    config: &GatewayConfig,
) -> (Arc<dyn VenueAdapter>, Arc<dyn StreamHandler>) {
    match venue {
        Venue::Binance => {
            let adapter = Arc::new(BinanceAdapter::new(manager, publisher, config.binance.clone()));
            (adapter.clone(), adapter)
        }
        Venue::Kraken => {
            let adapter = Arc::new(KrakenAdapter::new(manager, publisher, config.kraken.clone()));
            (adapter.clone(), adapter)
        }
    }
}

/// State shared by every venue adapter: the connection manager, the bus
/// publisher and the demand ledger. The ledger is only touched from the
/// control-plane dispatch and the reconnect callback.
pub(crate) struct AdapterCore {
    manager: Arc<ConnectionManager>,
    publisher: Arc<dyn Publisher>,
    endpoints: VenueEndpoints,
    ledger: parking_lot::Mutex<SubscriptionLedger>,
    ops: tokio::sync::Mutex<()>,
}

impl AdapterCore {
    pub(crate) fn new(manager: Arc<ConnectionManager>, publisher: Arc<dyn Publisher>, endpoints: VenueEndpoints) -> Self {
        Self {
            manager,
            publisher,
            endpoints,
            ledger: parking_lot::Mutex::new(SubscriptionLedger::new()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// Serializes subscribe/unsubscribe flows. Control commands dispatch as
    /// independent tasks, but the check-send-record sequence against the
    /// ledger must not interleave: two concurrent subscribes of a fresh key
    /// must produce exactly one upstream frame.
    pub(crate) async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    /// Derives `<market>:main` and opens the market's connection if absent.
    pub(crate) async fn ensure_connection(&self, market: &str) -> Result<String, GatewayError> {
        let connection_id = connection_id_for(market);
        if !self.manager.has_connection(&connection_id) {
            self.manager
                .add(self.endpoints.url_for(market), &connection_id)
                .await?;
        }
        Ok(connection_id)
    }

    /// The subset of `keys` with no live upstream subscription yet, deduped
    /// in first-seen order. These are the keys an upstream SUBSCRIBE must
    /// list.
    pub(crate) fn unsubscribed_keys(&self, keys: &[String], market: &str) -> Vec<String> {
        let ledger = self.ledger.lock();
        let mut pending: Vec<String> = Vec::new();
        for key in keys {
            if ledger.count(key, market) == 0 && !pending.contains(key) {
                pending.push(key.clone());
            }
        }
        pending
    }

    pub(crate) fn record_subscribe(&self, keys: &[String], market: &str) {
        self.ledger.lock().add(keys, market);
    }

    /// Releases demand for `keys` and returns every key of the market whose
    /// demand is now zero, i.e. the keys an upstream UNSUBSCRIBE must list.
    pub(crate) fn release_keys(&self, keys: &[String], market: &str) -> Vec<String> {
        let mut ledger = self.ledger.lock();
        ledger.remove(keys, market);
        ledger.zero_keys(market)
    }

    pub(crate) fn prune(&self, market: &str) {
        self.ledger.lock().prune(market);
    }

    pub(crate) fn active_keys(&self, market: &str) -> Vec<String> {
        self.ledger.lock().active_keys(market)
    }

    pub(crate) async fn send(&self, connection_id: &str, payload: String) -> Result<(), GatewayError> {
        self.manager.send(connection_id, payload).await
    }

    pub(crate) async fn publish(&self, topic: &str, payload: String) {
        self.publisher.publish(topic, payload).await;
    }
}

pub(crate) fn connection_id_for(market: &str) -> String {
    format!("{}:main", market)
}

/// The market segment encoded in a connection id (`<market>:<label>`).
pub(crate) fn market_of(connection_id: &str) -> &str {
    connection_id.split(':').next().unwrap_or(connection_id)
}

/// Correlation token for a venue frame; wall-clock milliseconds when the
/// caller did not supply one.
pub(crate) fn request_id_or_now(request_id: Option<RequestId>) -> RequestId {
    request_id.unwrap_or_else(|| RequestId::Int(now_ms()))
}
