use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    #[error("connection {0} is closed")]
    ConnectionClosed(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("market {market:?} is not supported on {venue}")]
    UnsupportedMarket { venue: &'static str, market: String },

    #[error("connection manager is not running")]
    NotRunning,

    #[error("connection manager already started")]
    AlreadyStarted,

    #[error("no stream handler registered")]
    HandlerNotSet,
}
