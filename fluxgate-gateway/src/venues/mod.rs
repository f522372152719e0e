mod binance;
mod kraken;

pub use binance::*;
pub use kraken::*;

use thiserror::Error;

/// Failure to turn a venue frame into a canonical record. Mapping failures
/// are logged and the frame dropped; they never tear down a connection.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] time::error::Parse),
}
