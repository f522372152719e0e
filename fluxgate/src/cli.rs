use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use fluxgate_gateway::Venue;

fn parse_venue(s: &str) -> Result<Venue, String> {
    Venue::from_str(s).map_err(|e| e.to_string())
}

/// Market-data aggregation gateway.
///
/// One `gateway` process serves one venue: it keeps the upstream WebSockets
/// open, listens for subscribe/unsubscribe commands on `<venue>:control`
/// and republishes normalized records on canonical topics. The `archive`
/// process tails those topics into per-day JSONL files.
#[derive(Parser, Debug)]
#[clap(
    name = "fluxgate",
    version = "0.1.0",
    about = "Market-data aggregation gateway for cryptocurrency exchanges."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a venue gateway: upstream WebSockets in, canonical records out.
    Gateway(GatewayArgs),

    /// Tail canonical topics and append per-day JSONL files.
    Archive(ArchiveArgs),
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    /// Venue to serve (binance or kraken).
    #[arg(long, short, value_parser = parse_venue)]
    pub venue: Venue,
}

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Directory receiving the JSONL tree.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Canonical topics to tail (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "binance:perp:btcusdt:aggTrade")]
    pub channels: Vec<String>,
}
