// In-memory candle provider
// Scripted candle windows for tests, replays and offline runs

use crate::markets::{MarketListing, MarketTicker};
use crate::provider::MarketDataProvider;
use common::{timeframe_millis, CandleRecord, FetchError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Candle provider backed by in-memory series
pub struct InMemoryProvider {
    series: RwLock<HashMap<(String, String), Vec<CandleRecord>>>,
    failing: RwLock<HashSet<String>>,
    latency: Option<Duration>,
    fetch_count: AtomicUsize,
    markets: RwLock<Vec<MarketTicker>>,
    /// Listing calls still to fail
    listing_failures: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            latency: None,
            fetch_count: AtomicUsize::new(0),
            markets: RwLock::new(Vec::new()),
            listing_failures: AtomicUsize::new(0),
        }
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the whole series for (symbol, timeframe)
    pub async fn set_candles(&self, symbol: &str, timeframe: &str, mut candles: Vec<CandleRecord>) {
        candles.sort_by_key(|c| c.open_time);
        self.series
            .write()
            .await
            .insert((symbol.to_string(), timeframe.to_string()), candles);
    }

    /// Append a candle, replacing the last one if it has the same open time
    pub async fn push_candle(&self, candle: CandleRecord) {
        let mut series = self.series.write().await;
        let entry = series
            .entry((candle.symbol.clone(), candle.timeframe.clone()))
            .or_default();

        match entry.last_mut() {
            Some(last) if last.open_time == candle.open_time => *last = candle,
            _ => entry.push(candle),
        }
    }

    /// Make every fetch for `symbol` fail with a transport error
    pub async fn fail_symbol(&self, symbol: &str) {
        self.failing.write().await.insert(symbol.to_string());
    }

    pub async fn restore_symbol(&self, symbol: &str) {
        self.failing.write().await.remove(symbol);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Replace the contract listing
    pub async fn set_markets(&self, markets: Vec<MarketTicker>) {
        *self.markets.write().await = markets;
    }

    /// Fail the next `count` listing calls with a transport error
    pub fn fail_next_listings(&self, count: usize) {
        self.listing_failures.store(count, Ordering::Relaxed);
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for InMemoryProvider {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<CandleRecord>, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.read().await.contains(symbol) {
            return Err(FetchError::Transport(format!("{} is unreachable", symbol)));
        }

        let series = self.series.read().await;
        let candles = series
            .get(&(symbol.to_string(), timeframe.to_string()))
            .map(|all| {
                let start = all.len().saturating_sub(limit);
                all[start..].to_vec()
            })
            .unwrap_or_default();

        Ok(candles)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait::async_trait]
impl MarketListing for InMemoryProvider {
    async fn list_markets(&self) -> Result<Vec<MarketTicker>, FetchError> {
        let failing = self
            .listing_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Transport("market listing unavailable".to_string()));
        }
        Ok(self.markets.read().await.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Build a candle series from a list of closes.
///
/// Each bar opens at the previous close and spans one `timeframe` interval
/// starting at `start_ts`.
pub fn candles_from_closes(symbol: &str, timeframe: &str, closes: &[f64], start_ts: i64) -> Vec<CandleRecord> {
    let step = timeframe_millis(timeframe).unwrap_or(3_600_000);
    let mut previous = closes.first().copied().unwrap_or_default();

    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = previous;
            previous = close;
            CandleRecord {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                open_time: start_ts + i as i64 * step,
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}
