// Signal Storage Interface
// Persistence for emitted signals

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use common::{Side, Signal};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Trait for signal storage backends
///
/// At most one signal is kept per (symbol, timeframe, source_candle_ts).
#[async_trait::async_trait]
pub trait SignalStorage: Send + Sync {
    /// Store a signal. Returns false if one already exists for the same source candle.
    async fn store(&self, signal: &Signal) -> Result<bool>;

    /// Retrieve a signal by ID
    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>>;

    /// All signals for a symbol, newest first
    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<Signal>>;

    /// Most recent signals, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<Signal>>;

    /// Signals created in `[start, end)`, newest first
    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Signal>>;

    async fn count(&self) -> Result<usize>;
}

/// In-memory signal storage (for testing and development)
pub struct InMemorySignalStorage {
    signals: tokio::sync::RwLock<HashMap<Uuid, Signal>>,
}

impl InMemorySignalStorage {
    pub fn new() -> Self {
        Self {
            signals: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySignalStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut signals: Vec<Signal>) -> Vec<Signal> {
    signals.sort_by(|a, b| {
        b.source_candle_ts
            .cmp(&a.source_candle_ts)
            .then(b.created_at.cmp(&a.created_at))
    });
    signals
}

#[async_trait::async_trait]
impl SignalStorage for InMemorySignalStorage {
    async fn store(&self, signal: &Signal) -> Result<bool> {
        let mut signals = self.signals.write().await;
        let duplicate = signals.values().any(|s| {
            s.symbol == signal.symbol
                && s.timeframe == signal.timeframe
                && s.source_candle_ts == signal.source_candle_ts
        });
        if duplicate {
            debug!(symbol = %signal.symbol, ts = signal.source_candle_ts, "Duplicate signal ignored");
            return Ok(false);
        }
        signals.insert(signal.id, signal.clone());
        Ok(true)
    }

    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals.get(&signal_id).cloned())
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(newest_first(
            signals.values().filter(|s| s.symbol == symbol).cloned().collect(),
        ))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut all = newest_first(signals.values().cloned().collect());
        all.truncate(limit);
        Ok(all)
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(newest_first(
            signals
                .values()
                .filter(|s| s.created_at >= start && s.created_at < end)
                .cloned()
                .collect(),
        ))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.signals.read().await.len())
    }
}

/// PostgreSQL-backed signal storage
pub struct PgSignalStorage {
    db_pool: Arc<PgPool>,
}

impl PgSignalStorage {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize signal tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id UUID PRIMARY KEY,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                side TEXT NOT NULL,
                score DOUBLE PRECISION NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                entry_price NUMERIC NOT NULL,
                stop_loss NUMERIC NOT NULL,
                take_profit NUMERIC NOT NULL,
                reasons JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                source_candle_ts BIGINT NOT NULL,
                UNIQUE (symbol, timeframe, source_candle_ts)
            )
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_symbol_created ON signals (symbol, created_at DESC)",
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create signals index")?;

        info!("Signal storage tables initialized");
        Ok(())
    }

    fn from_row(row: &PgRow) -> Result<Signal> {
        let side: String = row.try_get("side")?;
        let reasons: Json<Vec<String>> = row.try_get("reasons")?;
        Ok(Signal {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            timeframe: row.try_get("timeframe")?,
            side: side.parse::<Side>().map_err(|e| anyhow!(e))?,
            score: row.try_get("score")?,
            confidence: row.try_get("confidence")?,
            entry_price: row.try_get("entry_price")?,
            stop_loss: row.try_get("stop_loss")?,
            take_profit: row.try_get("take_profit")?,
            reasons: reasons.0,
            created_at: row.try_get("created_at")?,
            source_candle_ts: row.try_get("source_candle_ts")?,
        })
    }
}

const SELECT_SIGNALS: &str = r#"
    SELECT id, symbol, timeframe, side, score, confidence, entry_price, stop_loss,
           take_profit, reasons, created_at, source_candle_ts
    FROM signals
"#;

#[async_trait::async_trait]
impl SignalStorage for PgSignalStorage {
    async fn store(&self, signal: &Signal) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                id, symbol, timeframe, side, score, confidence, entry_price,
                stop_loss, take_profit, reasons, created_at, source_candle_ts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (symbol, timeframe, source_candle_ts) DO NOTHING
            "#,
        )
        .bind(signal.id)
        .bind(&signal.symbol)
        .bind(&signal.timeframe)
        .bind(signal.side.as_str())
        .bind(signal.score)
        .bind(signal.confidence)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit)
        .bind(Json(&signal.reasons))
        .bind(signal.created_at)
        .bind(signal.source_candle_ts)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert signal")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!("{SELECT_SIGNALS} WHERE id = $1"))
            .bind(signal_id)
            .fetch_optional(self.db_pool.as_ref())
            .await
            .context("Failed to fetch signal")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{SELECT_SIGNALS} WHERE symbol = $1 ORDER BY source_candle_ts DESC, created_at DESC"
        ))
        .bind(symbol)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch signals by symbol")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{SELECT_SIGNALS} ORDER BY source_candle_ts DESC, created_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch recent signals")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{SELECT_SIGNALS} WHERE created_at >= $1 AND created_at < $2 ORDER BY source_candle_ts DESC, created_at DESC"
        ))
        .bind(start)
        .bind(end)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch signals in range")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signals")
            .fetch_one(self.db_pool.as_ref())
            .await
            .context("Failed to count signals")?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn signal(symbol: &str, ts: i64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            side: Side::Long,
            score: 8.0,
            confidence: 0.8,
            entry_price: Decimal::new(100, 0),
            stop_loss: Decimal::new(97, 0),
            take_profit: Decimal::new(106, 0),
            reasons: vec!["RSI oversold".to_string()],
            created_at: Utc::now(),
            source_candle_ts: ts,
        }
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemorySignalStorage::new();
        let s = signal("BTCUSDT", 1_000);

        assert!(storage.store(&s).await.unwrap());
        let retrieved = storage.get(s.id).await.unwrap();
        assert_eq!(retrieved, Some(s));
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_one_signal_per_source_candle() {
        let storage = InMemorySignalStorage::new();

        assert!(storage.store(&signal("BTCUSDT", 1_000)).await.unwrap());
        assert!(!storage.store(&signal("BTCUSDT", 1_000)).await.unwrap());
        assert!(storage.store(&signal("BTCUSDT", 2_000)).await.unwrap());

        assert_eq!(storage.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let storage = InMemorySignalStorage::new();
        for ts in [1_000, 3_000, 2_000] {
            storage.store(&signal("ETHUSDT", ts)).await.unwrap();
        }
        storage.store(&signal("SOLUSDT", 500)).await.unwrap();

        let recent = storage.recent(2).await.unwrap();
        let ts: Vec<i64> = recent.iter().map(|s| s.source_candle_ts).collect();
        assert_eq!(ts, vec![3_000, 2_000]);

        let sol = storage.get_by_symbol("SOLUSDT").await.unwrap();
        assert_eq!(sol.len(), 1);
    }

    #[tokio::test]
    async fn test_between_is_half_open() {
        let storage = InMemorySignalStorage::new();
        let now = Utc::now();
        for (ts, age_hours) in [(1_000, 30), (2_000, 20), (3_000, 2)] {
            let mut s = signal("ETHUSDT", ts);
            s.created_at = now - Duration::hours(age_hours);
            storage.store(&s).await.unwrap();
        }

        let day = storage.between(now - Duration::hours(24), now).await.unwrap();
        let ts: Vec<i64> = day.iter().map(|s| s.source_candle_ts).collect();
        assert_eq!(ts, vec![3_000, 2_000]);

        let edge = storage.between(now - Duration::hours(30), now - Duration::hours(20)).await.unwrap();
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].source_candle_ts, 1_000);
    }
}
