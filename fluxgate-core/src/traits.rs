use async_trait::async_trait;

/// Sink for normalized records. Delivery inherits the bus semantics:
/// at-most-once, ordered per topic from a single publisher, no retry.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String);
}

/// Source of raw bus messages as `(channel, payload)` pairs.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn recv(&self) -> Option<(String, String)>;
}
