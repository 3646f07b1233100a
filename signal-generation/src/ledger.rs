// Candle Ledger
// Last fully processed closed candle per (symbol, timeframe); the dedup point for emission

use anyhow::{Context, Result};
use chrono::Utc;
use common::ProcessedCandleState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First record for the key
    Inserted,
    /// Existing record moved forward
    Advanced,
    /// Timestamp was not newer than the stored one; nothing changed
    AlreadyProcessed,
}

impl MarkOutcome {
    /// Whether this call observed the candle as new
    pub fn is_new(&self) -> bool {
        matches!(self, MarkOutcome::Inserted | MarkOutcome::Advanced)
    }
}

/// Trait for ledger backends
///
/// `mark_processed` must be a single atomic step per key. Stored timestamps
/// never move backwards.
#[async_trait::async_trait]
pub trait CandleLedger: Send + Sync {
    /// Last processed closed-candle timestamp, 0 if never processed
    async fn last_processed(&self, symbol: &str, timeframe: &str) -> Result<i64>;

    /// Record `ts` as processed if it is newer than the stored value
    async fn mark_processed(&self, symbol: &str, timeframe: &str, ts: i64) -> Result<MarkOutcome>;

    /// Full row for a key
    async fn state(&self, symbol: &str, timeframe: &str) -> Result<Option<ProcessedCandleState>>;

    /// Number of tracked keys
    async fn count(&self) -> Result<usize>;

    /// Clear all state. Administrative use only.
    async fn reset(&self) -> Result<()>;
}

/// In-memory ledger (for testing and development)
pub struct InMemoryLedger {
    states: DashMap<(String, String), ProcessedCandleState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CandleLedger for InMemoryLedger {
    async fn last_processed(&self, symbol: &str, timeframe: &str) -> Result<i64> {
        Ok(self
            .states
            .get(&(symbol.to_string(), timeframe.to_string()))
            .map(|s| s.last_closed_ts)
            .unwrap_or(0))
    }

    async fn mark_processed(&self, symbol: &str, timeframe: &str, ts: i64) -> Result<MarkOutcome> {
        // The entry holds the shard lock for the whole compare-and-set
        let outcome = match self.states.entry((symbol.to_string(), timeframe.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(ProcessedCandleState {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    last_closed_ts: ts,
                    processed_at: Utc::now(),
                });
                MarkOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                if state.last_closed_ts < ts {
                    state.last_closed_ts = ts;
                    state.processed_at = Utc::now();
                    MarkOutcome::Advanced
                } else {
                    MarkOutcome::AlreadyProcessed
                }
            }
        };
        Ok(outcome)
    }

    async fn state(&self, symbol: &str, timeframe: &str) -> Result<Option<ProcessedCandleState>> {
        Ok(self
            .states
            .get(&(symbol.to_string(), timeframe.to_string()))
            .map(|s| s.clone()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.states.len())
    }

    async fn reset(&self) -> Result<()> {
        let cleared = self.states.len();
        self.states.clear();
        warn!(cleared, "Candle ledger reset");
        Ok(())
    }
}

/// PostgreSQL-backed ledger
pub struct PgCandleLedger {
    db_pool: Arc<PgPool>,
}

impl PgCandleLedger {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize ledger tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                last_closed_ts BIGINT NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (symbol, timeframe)
            )
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create processed_candles table")?;

        info!("Candle ledger tables initialized");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CandleLedger for PgCandleLedger {
    async fn last_processed(&self, symbol: &str, timeframe: &str) -> Result<i64> {
        let ts: Option<i64> = sqlx::query_scalar(
            "SELECT last_closed_ts FROM processed_candles WHERE symbol = $1 AND timeframe = $2",
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to read candle ledger")?;

        Ok(ts.unwrap_or(0))
    }

    async fn mark_processed(&self, symbol: &str, timeframe: &str, ts: i64) -> Result<MarkOutcome> {
        // No row comes back when the WHERE guard rejects the update.
        // xmax = 0 distinguishes a fresh insert from an update.
        let inserted: Option<bool> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_candles (symbol, timeframe, last_closed_ts, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (symbol, timeframe) DO UPDATE
                SET last_closed_ts = EXCLUDED.last_closed_ts,
                    processed_at = EXCLUDED.processed_at
                WHERE processed_candles.last_closed_ts < EXCLUDED.last_closed_ts
            RETURNING (xmax = 0)
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(ts)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to upsert candle ledger")?;

        Ok(match inserted {
            Some(true) => MarkOutcome::Inserted,
            Some(false) => MarkOutcome::Advanced,
            None => MarkOutcome::AlreadyProcessed,
        })
    }

    async fn state(&self, symbol: &str, timeframe: &str) -> Result<Option<ProcessedCandleState>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, timeframe, last_closed_ts, processed_at
            FROM processed_candles
            WHERE symbol = $1 AND timeframe = $2
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to read candle ledger")?;

        row.map(|r| -> Result<ProcessedCandleState> {
            Ok(ProcessedCandleState {
                symbol: r.try_get("symbol")?,
                timeframe: r.try_get("timeframe")?,
                last_closed_ts: r.try_get("last_closed_ts")?,
                processed_at: r.try_get("processed_at")?,
            })
        })
        .transpose()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_candles")
            .fetch_one(self.db_pool.as_ref())
            .await
            .context("Failed to count candle ledger")?;
        Ok(count as usize)
    }

    async fn reset(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM processed_candles")
            .execute(self.db_pool.as_ref())
            .await
            .context("Failed to reset candle ledger")?;

        warn!(cleared = result.rows_affected(), "Candle ledger reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_key_is_zero() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.last_processed("BTCUSDT", "1h").await.unwrap(), 0);
        assert!(ledger.state("BTCUSDT", "1h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let t = 1_700_000_000_000;

        assert_eq!(ledger.mark_processed("BTCUSDT", "1h", t).await.unwrap(), MarkOutcome::Inserted);
        let first = ledger.state("BTCUSDT", "1h").await.unwrap().unwrap();

        assert_eq!(
            ledger.mark_processed("BTCUSDT", "1h", t).await.unwrap(),
            MarkOutcome::AlreadyProcessed
        );
        assert_eq!(ledger.last_processed("BTCUSDT", "1h").await.unwrap(), t);
        assert_eq!(ledger.state("BTCUSDT", "1h").await.unwrap().unwrap(), first);
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_never_regresses() {
        let ledger = InMemoryLedger::new();
        ledger.mark_processed("ETHUSDT", "1h", 2_000).await.unwrap();

        assert_eq!(ledger.mark_processed("ETHUSDT", "1h", 3_000).await.unwrap(), MarkOutcome::Advanced);
        assert_eq!(
            ledger.mark_processed("ETHUSDT", "1h", 1_000).await.unwrap(),
            MarkOutcome::AlreadyProcessed
        );
        assert_eq!(ledger.last_processed("ETHUSDT", "1h").await.unwrap(), 3_000);
    }

    #[tokio::test]
    async fn test_timeframes_are_independent() {
        let ledger = InMemoryLedger::new();
        ledger.mark_processed("SOLUSDT", "1h", 5_000).await.unwrap();

        assert_eq!(ledger.last_processed("SOLUSDT", "4h").await.unwrap(), 0);
        assert_eq!(ledger.last_processed("SOLUSDT", "1h").await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn test_concurrent_marks_observe_new_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.mark_processed("BNBUSDT", "1h", 42).await.unwrap()
            }));
        }

        let mut new = 0;
        for handle in handles {
            if handle.await.unwrap().is_new() {
                new += 1;
            }
        }
        assert_eq!(new, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let ledger = InMemoryLedger::new();
        ledger.mark_processed("BTCUSDT", "1h", 1).await.unwrap();
        ledger.mark_processed("BTCUSDT", "4h", 1).await.unwrap();

        ledger.reset().await.unwrap();

        assert_eq!(ledger.count().await.unwrap(), 0);
        assert_eq!(ledger.last_processed("BTCUSDT", "1h").await.unwrap(), 0);
    }
}
