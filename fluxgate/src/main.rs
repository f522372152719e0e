use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fluxgate_archiver::prelude::*;
use fluxgate_core::prelude::*;
use fluxgate_gateway::prelude::*;

mod cli;

use cli::{Cli, Commands};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let bus_config = load_bus_config()?;
    let bus = RedisPubSub::connect(&bus_config).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(_) => info!("received ctrl-c, shutting down..."),
            Err(e) => error!("failed to listen for ctrl-c: {}", e),
        }
        signal_token.cancel();
    });

    match cli.command {
        Commands::Gateway(args) => {
            info!(venue = %args.venue, "starting fluxgate gateway");
            let config = load_gateway_config()?;
            let service = GatewayService::builder()
                .venue(args.venue)
                .bus(bus)
                .config(config)
                .build();
            service.run(shutdown).await?;
        }
        Commands::Archive(args) => {
            info!(channels = ?args.channels, "starting fluxgate archiver");
            let subscriber: Arc<dyn Subscriber> = bus.subscribe(args.channels.clone());
            let service = ArchiverService::builder()
                .subscriber(subscriber)
                .archiver(Archiver::new(args.data_dir))
                .build();
            service.run(shutdown).await?;
        }
    }

    Ok(())
}
