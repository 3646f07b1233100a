use thiserror::Error;

/// Failure reported by a market data provider.
///
/// The core treats every variant the same way: no data for that symbol this
/// cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch {symbol} {timeframe} timed out after {timeout_ms}ms")]
    Timeout {
        symbol: String,
        timeframe: String,
        timeout_ms: u64,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode candles: {0}")]
    Decode(String),
}

/// Not enough history to compute something yet. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient data for {context}: need {required}, have {available}")]
pub struct InsufficientData {
    pub context: String,
    pub required: usize,
    pub available: usize,
}

impl InsufficientData {
    pub fn new(context: impl Into<String>, required: usize, available: usize) -> Self {
        Self {
            context: context.into(),
            required,
            available,
        }
    }
}
