// Warning log
// Append-only persistence for detected market anomalies

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use common::{Severity, Warning, WarningType};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Trait for warning storage backends
#[async_trait::async_trait]
pub trait WarningStorage: Send + Sync {
    /// Append a warning. Existing warnings are never modified.
    async fn append(&self, warning: &Warning) -> Result<()>;

    /// Most recent warnings, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<Warning>>;

    /// Warnings created in `[start, end)`, newest first
    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Warning>>;

    async fn count(&self) -> Result<usize>;
}

/// In-memory warning log (for testing and development)
pub struct InMemoryWarningStorage {
    warnings: RwLock<Vec<Warning>>,
}

impl InMemoryWarningStorage {
    pub fn new() -> Self {
        Self {
            warnings: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryWarningStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WarningStorage for InMemoryWarningStorage {
    async fn append(&self, warning: &Warning) -> Result<()> {
        self.warnings.write().await.push(warning.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Warning>> {
        let warnings = self.warnings.read().await;
        Ok(warnings.iter().rev().take(limit).cloned().collect())
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Warning>> {
        let warnings = self.warnings.read().await;
        Ok(warnings
            .iter()
            .rev()
            .filter(|w| w.created_at >= start && w.created_at < end)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.warnings.read().await.len())
    }
}

/// PostgreSQL-backed warning log
pub struct PgWarningStorage {
    db_pool: Arc<PgPool>,
}

impl PgWarningStorage {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize warning tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warnings (
                id UUID PRIMARY KEY,
                warning_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                triggered_value DOUBLE PRECISION NOT NULL,
                threshold DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                metadata_json JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create warnings table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_warnings_created_at ON warnings (created_at DESC)")
            .execute(self.db_pool.as_ref())
            .await
            .context("Failed to create warnings index")?;

        info!("Warning tables initialized");
        Ok(())
    }
}

fn warning_from_row(row: &PgRow) -> Result<Warning> {
    let warning_type: String = row.try_get("warning_type")?;
    let severity: String = row.try_get("severity")?;
    let metadata: Json<serde_json::Value> = row.try_get("metadata_json")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let id: Uuid = row.try_get("id")?;

    Ok(Warning {
        id,
        warning_type: warning_type.parse::<WarningType>().map_err(|e| anyhow!(e))?,
        severity: severity.parse::<Severity>().map_err(|e| anyhow!(e))?,
        message: row.try_get("message")?,
        triggered_value: row.try_get("triggered_value")?,
        threshold: row.try_get("threshold")?,
        created_at,
        metadata: metadata.0,
    })
}

#[async_trait::async_trait]
impl WarningStorage for PgWarningStorage {
    async fn append(&self, warning: &Warning) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO warnings
                (id, warning_type, severity, message, triggered_value, threshold, created_at, metadata_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(warning.id)
        .bind(warning.warning_type.as_str())
        .bind(warning.severity.as_str())
        .bind(&warning.message)
        .bind(warning.triggered_value)
        .bind(warning.threshold)
        .bind(warning.created_at)
        .bind(Json(&warning.metadata))
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert warning")?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Warning>> {
        let rows = sqlx::query(
            r#"
            SELECT id, warning_type, severity, message, triggered_value, threshold, created_at, metadata_json
            FROM warnings
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch warnings")?;

        rows.iter().map(warning_from_row).collect()
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Warning>> {
        let rows = sqlx::query(
            r#"
            SELECT id, warning_type, severity, message, triggered_value, threshold, created_at, metadata_json
            FROM warnings
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch warnings in range")?;

        rows.iter().map(warning_from_row).collect()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM warnings")
            .fetch_one(self.db_pool.as_ref())
            .await
            .context("Failed to count warnings")?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_only_newest_first() {
        let storage = InMemoryWarningStorage::new();
        let first = Warning::new(WarningType::BtcShock, Severity::Warning, "first", 0.06, 0.05, json!({}));
        let second = Warning::new(WarningType::BreadthCollapse, Severity::Critical, "second", 0.6, 0.5, json!({"against": 6}));

        storage.append(&first).await.unwrap();
        storage.append(&second).await.unwrap();

        assert_eq!(storage.count().await.unwrap(), 2);
        let recent = storage.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[0].metadata["against"], 6);
    }

    #[tokio::test]
    async fn test_between_filters_by_creation_time() {
        let storage = InMemoryWarningStorage::new();
        let now = Utc::now();
        let mut old = Warning::new(WarningType::BtcShock, Severity::Critical, "old", 0.09, 0.08, json!({}));
        old.created_at = now - chrono::Duration::days(2);
        let fresh = Warning::new(WarningType::CorrelationSpike, Severity::Warning, "fresh", 0.3, 0.2, json!({}));

        storage.append(&old).await.unwrap();
        storage.append(&fresh).await.unwrap();

        let day = storage.between(now - chrono::Duration::days(1), now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].message, "fresh");
    }
}
