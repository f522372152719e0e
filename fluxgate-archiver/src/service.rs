use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use fluxgate_core::prelude::*;

use crate::writer::Archiver;

/// Tails canonical topics on the bus and appends them to per-day JSONL
/// files until shutdown.
#[derive(TypedBuilder)]
pub struct ArchiverService {
    subscriber: Arc<dyn Subscriber>,
    archiver: Archiver,
}

impl ArchiverService {
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("archiver started");
        let Self {
            subscriber,
            mut archiver,
        } = self;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = subscriber.recv() => match message {
                    Some((channel, payload)) => {
                        if let Err(e) = archiver.write(&channel, &payload).await {
                            warn!(channel, "failed to archive record: {}", e);
                        }
                    }
                    None => {
                        warn!("bus subscription ended, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }

        archiver.close().await?;
        info!("archiver stopped");
        Ok(())
    }
}
