use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fluxgate_core::prelude::*;

use crate::adapter::VenueAdapter;

/// Consumes the venue's control channel until shutdown. Commands dispatch
/// as fire-and-forget tasks; there is no reply channel, the outcome is
/// logged. A dead subscription is retried after one second.
pub async fn listen(subscriber: Arc<dyn Subscriber>, adapter: Arc<dyn VenueAdapter>, shutdown: CancellationToken) {
    info!(venue = adapter.venue(), "control-plane listener started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscriber.recv() => match message {
                Some((_channel, payload)) => {
                    let adapter = adapter.clone();
                    tokio::spawn(async move {
                        handle_command(adapter, &payload).await;
                    });
                }
                None => {
                    warn!("control subscription ended, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }
    info!("control-plane listener stopped");
}

/// Parses and executes one control command. Malformed commands are logged
/// and dropped; the listener stays alive.
pub async fn handle_command(adapter: Arc<dyn VenueAdapter>, payload: &str) {
    let command: ControlCommand = match serde_json::from_str(payload) {
        Ok(command) => command,
        Err(e) => {
            error!("invalid control command: {}", e);
            return;
        }
    };

    let ControlCommand {
        action,
        symbols,
        stream_type,
        market_type,
        request_id,
    } = command;

    match action {
        ControlAction::Subscribe => {
            match adapter.subscribe(&symbols, &stream_type, &market_type, request_id).await {
                Ok(()) => info!(?symbols, stream_type, market_type, "subscribe succeeded"),
                Err(e) => error!(?symbols, stream_type, market_type, "subscribe failed: {}", e),
            }
        }
        ControlAction::Unsubscribe => {
            match adapter.unsubscribe(&symbols, &stream_type, &market_type, request_id).await {
                Ok(()) => info!(?symbols, stream_type, market_type, "unsubscribe succeeded"),
                Err(e) => error!(?symbols, stream_type, market_type, "unsubscribe failed: {}", e),
            }
        }
    }
}
