use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Identity of a normalized feed on the bus: `exchange:market:symbol:stream_type`.
///
/// The same string keys the archiver's on-disk partitioning, so the four
/// components must not contain `:` themselves.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Channel {
    pub exchange: String,
    pub market: String,
    pub symbol: String,
    pub stream_type: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("expected exchange:market:symbol:stream_type, got {0:?}")]
    Malformed(String),
}

impl Channel {
    pub fn new(
        exchange: impl Into<String>,
        market: impl Into<String>,
        symbol: impl Into<String>,
        stream_type: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            market: market.into(),
            symbol: symbol.into(),
            stream_type: stream_type.into(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.exchange, self.market, self.symbol, self.stream_type)
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [exchange, market, symbol, stream_type]
                if !exchange.is_empty() && !market.is_empty() && !symbol.is_empty() && !stream_type.is_empty() =>
            {
                Ok(Channel::new(*exchange, *market, *symbol, *stream_type))
            }
            _ => Err(ChannelError::Malformed(s.to_string())),
        }
    }
}

/// The bus channel on which a venue gateway receives its commands.
pub fn control_channel(venue: &str) -> String {
    format!("{}:control", venue)
}
