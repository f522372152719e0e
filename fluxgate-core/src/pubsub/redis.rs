use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use kanal::{AsyncReceiver, AsyncSender};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, info, warn};

use crate::{BusConfig, Publisher, Subscriber};

/// Bus client backed by Redis pub/sub.
///
/// Outbound records go through one shared multiplexed connection that
/// re-establishes itself on failure. Each subscription owns a dedicated
/// pub/sub connection; its listener is re-entered after a one second pause
/// whenever that connection drops.
#[derive(Clone)]
pub struct RedisPubSub {
    client: Client,
    conn: ConnectionManager,
}

impl RedisPubSub {
    pub async fn connect(config: &BusConfig) -> Result<Arc<Self>> {
        let client = Client::open(config.url())?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!(host = config.host, port = config.port, "connected to bus");
        Ok(Arc::new(Self { client, conn }))
    }

    /// Hands one record to the bus. Delivery is at-most-once: a failed
    /// publish is logged and the record dropped, never buffered or retried.
    pub async fn publish(&self, topic: &str, payload: String) {
        let mut conn = self.conn.clone();
        match conn.publish::<_, _, ()>(topic, payload).await {
            Ok(()) => debug!(topic, "published record"),
            Err(e) => warn!(topic, "dropping record, publish failed: {}", e),
        }
    }

    /// Opens a subscription on the given channels. The listener runs until
    /// the returned subscriber is dropped.
    pub fn subscribe(&self, channels: Vec<String>) -> Arc<RedisSubscriber> {
        let (tx, rx) = kanal::unbounded_async();
        let client = self.client.clone();
        info!(?channels, "listening on bus channels");
        tokio::spawn(async move {
            loop {
                match Self::listen(&client, &channels, &tx).await {
                    // Receiver side is gone, nothing left to deliver to.
                    Ok(()) => break,
                    Err(e) => {
                        error!("bus listener interrupted: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Arc::new(RedisSubscriber { rx })
    }

    async fn listen(client: &Client, channels: &[String], tx: &AsyncSender<(String, String)>) -> Result<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel, "skipping undecodable bus payload: {}", e);
                    continue;
                }
            };
            if tx.send((channel, payload)).await.is_err() {
                return Ok(());
            }
        }
        bail!("subscription connection closed")
    }
}

#[async_trait]
impl Publisher for RedisPubSub {
    async fn publish(&self, topic: &str, payload: String) {
        self.publish(topic, payload).await;
    }
}

pub struct RedisSubscriber {
    rx: AsyncReceiver<(String, String)>,
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn recv(&self) -> Option<(String, String)> {
        self.rx.recv().await.ok()
    }
}
