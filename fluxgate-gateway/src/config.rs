use std::env;

use config::{Config, File};
use serde::Deserialize;

/// WebSocket endpoint per market segment. Markets without a dedicated
/// endpoint fall back to spot.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueEndpoints {
    pub spot: String,
    pub perp: String,
    #[serde(default)]
    pub coin_m: Option<String>,
}

impl VenueEndpoints {
    pub fn url_for(&self, market: &str) -> &str {
        match market {
            "perp" => &self.perp,
            "coin-m" => self.coin_m.as_deref().unwrap_or(&self.spot),
            _ => &self.spot,
        }
    }
}

fn default_binance() -> VenueEndpoints {
    VenueEndpoints {
        spot: "wss://stream.binance.com:9443/ws".into(),
        perp: "wss://fstream.binance.com/ws".into(),
        coin_m: Some("wss://dstream.binance.com/ws".into()),
    }
}

fn default_kraken() -> VenueEndpoints {
    VenueEndpoints {
        spot: "wss://ws.kraken.com/v2".into(),
        perp: "wss://futures.kraken.com/ws/v1".into(),
        coin_m: None,
    }
}

/// Upstream endpoints per venue. The compiled-in defaults are the public
/// production URLs; an optional `gateway.yaml` in CONFIG_DIR overrides them.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_binance")]
    pub binance: VenueEndpoints,
    #[serde(default = "default_kraken")]
    pub kraken: VenueEndpoints,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            binance: default_binance(),
            kraken: default_kraken(),
        }
    }
}

pub fn load_gateway_config() -> anyhow::Result<GatewayConfig> {
    let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| ".".into());
    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/gateway", config_dir)).required(false))
        .build()?;
    Ok(config.try_deserialize()?)
}
