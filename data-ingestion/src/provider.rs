// Market Data Provider Interface
// Ordered candle windows per (symbol, timeframe), most recent last

use common::{CandleRecord, FetchError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Trait for candle sources
///
/// Implementations return candles in ascending `open_time` order. The last
/// element may still be forming.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<CandleRecord>, FetchError>;

    /// Provider name used in logs
    fn name(&self) -> &str;
}

/// Bounds every fetch of the wrapped provider with a timeout.
pub struct TimeoutProvider {
    inner: Arc<dyn MarketDataProvider>,
    timeout: Duration,
}

impl TimeoutProvider {
    pub fn new(inner: Arc<dyn MarketDataProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for TimeoutProvider {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<CandleRecord>, FetchError> {
        match tokio::time::timeout(self.timeout, self.inner.fetch_candles(symbol, timeframe, limit)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = self.inner.name(),
                    symbol = %symbol,
                    timeframe = %timeframe,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Candle fetch timed out"
                );
                Err(FetchError::Timeout {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{candles_from_closes, InMemoryProvider};

    #[tokio::test]
    async fn test_timeout_becomes_fetch_error() {
        let slow = InMemoryProvider::new().with_latency(Duration::from_millis(500));
        slow.set_candles("ETHUSDT", "1h", candles_from_closes("ETHUSDT", "1h", &[1.0, 2.0], 0)).await;

        let provider = TimeoutProvider::new(Arc::new(slow), Duration::from_millis(20));
        let result = provider.fetch_candles("ETHUSDT", "1h", 10).await;

        assert!(matches!(result, Err(FetchError::Timeout { timeout_ms: 20, .. })));
    }

    #[tokio::test]
    async fn test_fast_fetch_passes_through() {
        let fast = InMemoryProvider::new();
        fast.set_candles("ETHUSDT", "1h", candles_from_closes("ETHUSDT", "1h", &[1.0, 2.0, 3.0], 0)).await;

        let provider = TimeoutProvider::new(Arc::new(fast), Duration::from_secs(1));
        let candles = provider.fetch_candles("ETHUSDT", "1h", 10).await.unwrap();

        assert_eq!(candles.len(), 3);
    }
}
