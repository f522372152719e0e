mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::Value;

use fluxgate_core::prelude::*;
use fluxgate_gateway::prelude::*;

fn endpoints(url: &str) -> VenueEndpoints {
    VenueEndpoints {
        spot: url.to_string(),
        perp: url.to_string(),
        coin_m: None,
    }
}

fn binance_fixture(url: &str) -> (Arc<ConnectionManager>, Arc<RecordingPublisher>, Arc<BinanceAdapter>) {
    let manager = Arc::new(ConnectionManager::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let adapter = Arc::new(BinanceAdapter::new(
        manager.clone(),
        publisher.clone(),
        endpoints(url),
    ));
    manager.set_handler(adapter.clone());
    manager.start().unwrap();
    (manager, publisher, adapter)
}

fn kraken_fixture(url: &str) -> (Arc<ConnectionManager>, Arc<RecordingPublisher>, Arc<KrakenAdapter>) {
    let manager = Arc::new(ConnectionManager::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let adapter = Arc::new(KrakenAdapter::new(
        manager.clone(),
        publisher.clone(),
        endpoints(url),
    ));
    manager.set_handler(adapter.clone());
    manager.start().unwrap();
    (manager, publisher, adapter)
}

fn symbols(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test_log::test(tokio::test)]
async fn test_binance_agg_trade_fanout() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = binance_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["btcusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    assert!(manager.has_connection("perp:main"));

    server.wait_for_frames(1).await;
    let frame: Value = serde_json::from_str(&server.frames()[0]).unwrap();
    assert_eq!(frame["method"], "SUBSCRIBE");
    assert_eq!(frame["params"], serde_json::json!(["btcusdt@aggTrade"]));
    assert!(frame["id"].is_i64());

    server.inject(
        r#"{"e":"aggTrade","s":"BTCUSDT","T":1700000000000,"p":"42000.5","q":"0.01","m":false,"f":1,"l":2,"a":99}"#,
    );
    {
        let publisher = publisher.clone();
        wait_for("bus publish", move || publisher.len() >= 1).await;
    }

    let records = publisher.records();
    let (topic, payload) = &records[0];
    assert_eq!(topic, "binance:perp:btcusdt:aggTrade");
    let record: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(record["topic"], "binance:perp:btcusdt:aggTrade");
    assert_eq!(record["exchTimestamp"], 1700000000000i64);
    assert_eq!(record["price"], "42000.5");
    assert_eq!(record["quantity"], "0.01");
    assert_eq!(record["side"], "buy");
    assert_eq!(record["firstTradeId"], 1);
    assert_eq!(record["lastTradeId"], 2);
    assert_eq!(record["aggTradeId"], 99);
    assert!(record["localTimestamp"].as_i64().unwrap() > 1700000000000);

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_binance_ping_pong() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = binance_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["btcusdt"]), "aggTrade", "spot", None)
        .await
        .unwrap();
    server.wait_for_frames(1).await;

    server.inject(r#"{"ping":123}"#);
    server.wait_for_frames(2).await;
    let pong: Value = serde_json::from_str(&server.frames()[1]).unwrap();
    assert_eq!(pong, serde_json::json!({"pong": 123}));
    assert_eq!(publisher.len(), 0);

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_subscription_ack_is_not_published() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = binance_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["btcusdt"]), "aggTrade", "spot", None)
        .await
        .unwrap();
    server.inject(r#"{"result":null,"id":1}"#);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(publisher.len(), 0);

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_reference_counted_unsubscribe() {
    let server = VenueServer::spawn().await;
    let (manager, _publisher, adapter) = binance_fixture(&server.url);

    // two concurrent subscribes of the same key: one upstream frame
    let syms = symbols(&["btcusdt"]);
    let (a, b) = tokio::join!(
        adapter.subscribe(&syms, "aggTrade", "perp", None),
        adapter.subscribe(&syms, "aggTrade", "perp", None),
    );
    a.unwrap();
    b.unwrap();
    server.wait_for_frames(1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.frames().len(), 1, "duplicate demand must not resubscribe upstream");

    // first release: demand remains, no UNSUBSCRIBE
    adapter
        .unsubscribe(&symbols(&["btcusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.frames().len(), 1);

    // second release crosses zero: exactly one UNSUBSCRIBE listing the key
    adapter
        .unsubscribe(&symbols(&["btcusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    server.wait_for_frames(2).await;
    let frame: Value = serde_json::from_str(&server.frames()[1]).unwrap();
    assert_eq!(frame["method"], "UNSUBSCRIBE");
    assert_eq!(frame["params"], serde_json::json!(["btcusdt@aggTrade"]));

    // releasing a key with no demand sends nothing
    adapter
        .unsubscribe(&symbols(&["btcusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.frames().len(), 2);

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_reconnect_restores_all_subscriptions() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = binance_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["btcusdt", "ethusdt", "solusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    server.wait_for_frames(1).await;

    server.close_current();
    server.wait_for_connections(2).await;
    server.wait_for_frames(2).await;

    let frames = server.frames();
    assert_eq!(frames.len(), 2, "exactly one re-subscribe after reconnect");
    let restore: Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(restore["method"], "SUBSCRIBE");
    let restored: HashSet<String> = restore["params"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    let expected: HashSet<String> = ["btcusdt@aggTrade", "ethusdt@aggTrade", "solusdt@aggTrade"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(restored, expected);

    // data flow resumes on the new socket
    server.inject(
        r#"{"e":"aggTrade","s":"ETHUSDT","T":1700000001000,"p":"2200.1","q":"1.5","m":true,"f":3,"l":4,"a":100}"#,
    );
    {
        let publisher = publisher.clone();
        wait_for("publish after reconnect", move || publisher.len() >= 1).await;
    }
    assert_eq!(publisher.records()[0].0, "binance:perp:ethusdt:aggTrade");

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_malformed_frame_does_not_kill_the_connection() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = binance_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["btcusdt"]), "aggTrade", "perp", None)
        .await
        .unwrap();
    server.wait_for_frames(1).await;

    server.inject("this is not json");
    server.inject(
        r#"{"e":"aggTrade","s":"BTCUSDT","T":1700000000000,"p":"42000.5","q":"0.01","m":false,"f":1,"l":2,"a":99}"#,
    );
    {
        let publisher = publisher.clone();
        wait_for("publish after malformed frame", move || publisher.len() >= 1).await;
    }
    assert_eq!(publisher.len(), 1);
    assert!(manager.has_connection("perp:main"));

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_kraken_spot_snapshot_filter_and_trade_mapping() {
    let server = VenueServer::spawn().await;
    let (manager, publisher, adapter) = kraken_fixture(&server.url);

    adapter
        .subscribe(&symbols(&["BTC/USD"]), "trade", "spot", None)
        .await
        .unwrap();
    server.wait_for_frames(1).await;
    let frame: Value = serde_json::from_str(&server.frames()[0]).unwrap();
    assert_eq!(
        frame,
        serde_json::json!({"method": "subscribe", "params": {"channel": "trade", "symbol": ["BTC/USD"]}})
    );

    // snapshot and heartbeat are control traffic
    server.inject(
        r#"{"channel":"trade","type":"snapshot","data":[{"symbol":"BTC/USD","side":"buy","price":0.5147,"qty":100,"ord_type":"limit","trade_id":41,"timestamp":"2023-09-25T07:48:36.925533Z"}]}"#,
    );
    server.inject(r#"{"channel":"heartbeat"}"#);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(publisher.len(), 0);

    server.inject(
        r#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":0.5147,"qty":100,"ord_type":"limit","trade_id":42,"timestamp":"2023-09-25T07:49:37.708706Z"}]}"#,
    );
    {
        let publisher = publisher.clone();
        wait_for("kraken publish", move || publisher.len() >= 1).await;
    }

    let records = publisher.records();
    let (topic, payload) = &records[0];
    assert_eq!(topic, "kraken:spot:BTC/USD:trade");
    let record: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(record["exchTimestamp"], 1695628177708i64);
    assert_eq!(record["price"], "0.5147");
    assert_eq!(record["side"], "buy");
    assert_eq!(record["tradeId"], 42);

    manager.close().await;
}

#[test_log::test(tokio::test)]
async fn test_kraken_rejects_unsupported_market() {
    let server = VenueServer::spawn().await;
    let (manager, _publisher, adapter) = kraken_fixture(&server.url);

    let err = adapter
        .subscribe(&symbols(&["BTC/USD"]), "trade", "coin-m", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedMarket { .. }));
    assert_eq!(server.connection_count(), 0);

    manager.close().await;
}
