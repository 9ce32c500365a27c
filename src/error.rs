use thiserror::Error;

/// Errors surfaced synchronously by the provider and its buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unsupported interval '{0}'")]
    UnsupportedInterval(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("candle buffer is empty")]
    EmptyBuffer,

    #[error("position {position} out of range for buffer of length {len}")]
    IndexOutOfRange { position: usize, len: usize },

    #[error("provider task stopped before backfill finished")]
    Stopped,
}

/// Failures reported by a [`crate::source::CandleSource`].
///
/// These never escape the provider's background task; they are logged and
/// published as [`crate::provider::ProviderEvent`]s instead.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("binance API error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to decode kline payload: {0}")]
    Decode(String),

    #[error("candle source unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
