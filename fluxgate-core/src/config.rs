use config::{Config, Environment};
use serde::Deserialize;

/// Connection parameters for the pub/sub bus, taken from the
/// REDIS_HOST / REDIS_PORT / REDIS_DB environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl BusConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

pub fn load_bus_config() -> anyhow::Result<BusConfig> {
    let config = Config::builder()
        .set_default("host", "localhost")?
        .set_default("port", 6379)?
        .set_default("db", 0)?
        .add_source(Environment::with_prefix("REDIS"))
        .build()?;
    Ok(config.try_deserialize()?)
}
