//! Delivery history: an append-only, size-capped log of completed deliveries.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;

use crate::delivery::DeliveryMethod;
use crate::error::{Error, Result, StoreError};

use super::Store;

/// One completed delivery, as recorded at the time it finished
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Opaque artifact identifier the delivery fetched
    pub artifact_id: String,
    /// Title the server suggested for the artifact
    pub title: String,
    /// Filename the artifact was written under
    pub filename: String,
    /// How the bytes reached disk
    pub method: DeliveryMethod,
    /// When the delivery completed
    pub delivered_at: DateTime<Utc>,
}

impl Store {
    /// Append a completed delivery to the history log
    pub async fn append_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_history (artifact_id, title, filename, method, delivered_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.artifact_id)
        .bind(&record.title)
        .bind(&record.filename)
        .bind(record.method.as_str())
        .bind(record.delivered_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "failed to append delivery: {e}"
            )))
        })?;

        Ok(())
    }

    /// Fetch the most recent deliveries, newest first
    pub async fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT artifact_id, title, filename, method, delivered_at
            FROM delivery_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "failed to list deliveries: {e}"
            )))
        })?;

        rows.into_iter()
            .map(|row| {
                let method: String = row.get("method");
                let method = DeliveryMethod::parse(&method).ok_or_else(|| {
                    Error::Store(StoreError::CorruptRecord {
                        key: "delivery_history".to_string(),
                        reason: format!("unknown delivery method '{method}'"),
                    })
                })?;
                let delivered_at: i64 = row.get("delivered_at");
                Ok(DeliveryRecord {
                    artifact_id: row.get("artifact_id"),
                    title: row.get("title"),
                    filename: row.get("filename"),
                    method,
                    delivered_at: Utc
                        .timestamp_opt(delivered_at, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    /// Drop the oldest history entries beyond `keep`
    pub async fn prune_history(&self, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivery_history
            WHERE id NOT IN (SELECT id FROM delivery_history ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "failed to prune history: {e}"
            )))
        })?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            tracing::debug!(pruned, keep, "Pruned delivery history");
        }
        Ok(pruned)
    }
}
