use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use typed_builder::TypedBuilder;

use fluxgate_core::prelude::*;

use crate::adapter::{build_adapter, Venue};
use crate::config::GatewayConfig;
use crate::control;
use crate::ws::ConnectionManager;

/// One venue gateway process: a connection manager, the venue adapter and
/// the control-plane listener, sharing one bus client.
#[derive(TypedBuilder)]
pub struct GatewayService {
    venue: Venue,
    bus: Arc<RedisPubSub>,
    #[builder(default)]
    config: GatewayConfig,
}

impl GatewayService {
    /// Runs until the shutdown token fires, then closes every upstream
    /// connection.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(venue = %self.venue, "starting gateway");

        let manager = Arc::new(ConnectionManager::new());
        let publisher: Arc<dyn Publisher> = self.bus.clone();
        let (adapter, handler) = build_adapter(self.venue, manager.clone(), publisher, &self.config);
        manager.set_handler(handler);
        manager.start()?;

        let subscriber: Arc<dyn Subscriber> = self.bus.subscribe(vec![control_channel(adapter.venue())]);
        control::listen(subscriber, adapter, shutdown).await;

        manager.close().await;
        info!(venue = %self.venue, "gateway stopped");
        Ok(())
    }
}
