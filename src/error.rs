use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or unloadable configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Market data missing for one symbol. The cycle skips the symbol and
    /// continues.
    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Broker rejected or failed a call. Usually transient.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The on-disk ledger or cycle state cannot be trusted. Fatal; the
    /// engine must not trade on top of it.
    #[error("Corrupt state at {path}: {reason}")]
    CorruptState { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Fatal errors stop the scheduler loop; everything else is logged and
    /// the engine moves on to the next symbol or cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_) | EngineError::CorruptState { .. })
    }
}
