//! `readings` table access.

use async_trait::async_trait;
use rootstock_id::DeviceId;
use sqlx::{postgres::PgPool, Row};
use tracing::info;

use super::DbError;
use crate::reading::{
    QualityMetrics, QuarantineError, QuarantineWindow, Reading, ReadingQuarantine,
};

impl From<DbError> for QuarantineError {
    fn from(e: DbError) -> Self {
        QuarantineError::Store(Box::new(e))
    }
}

fn id_strings(device_ids: &[DeviceId]) -> Vec<String> {
    device_ids.iter().map(ToString::to_string).collect()
}

/// Reading store backed by Postgres.
#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    /// Create a new reading store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a reading.
    pub async fn record(&self, reading: &Reading) -> Result<(), QuarantineError> {
        sqlx::query(
            r#"
            INSERT INTO readings (id, device_id, value, timestamp, status, quarantine_reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET value = EXCLUDED.value,
                timestamp = EXCLUDED.timestamp,
                status = EXCLUDED.status,
                quarantine_reason = EXCLUDED.quarantine_reason
            "#,
        )
        .bind(reading.id.to_string())
        .bind(reading.device_id.to_string())
        .bind(reading.value)
        .bind(reading.timestamp)
        .bind(reading.status.as_str())
        .bind(reading.quarantine_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    /// Accepted vs quarantined counts for the given devices.
    pub async fn quality(&self, device_ids: &[DeviceId]) -> Result<QualityMetrics, QuarantineError> {
        if device_ids.is_empty() {
            return Ok(QualityMetrics::default());
        }

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'accepted') AS accepted,
                COUNT(*) FILTER (WHERE status = 'quarantined') AS quarantined
            FROM readings
            WHERE device_id = ANY($1)
            "#,
        )
        .bind(id_strings(device_ids))
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let accepted: i64 = row.try_get("accepted").map_err(DbError::Query)?;
        let quarantined: i64 = row.try_get("quarantined").map_err(DbError::Query)?;
        Ok(QualityMetrics {
            accepted: accepted.max(0) as u64,
            quarantined: quarantined.max(0) as u64,
        })
    }
}

#[async_trait]
impl ReadingQuarantine for PgReadingStore {
    async fn quarantine_by_window(
        &self,
        device_ids: &[DeviceId],
        window: &QuarantineWindow,
        reason: &str,
    ) -> Result<u64, QuarantineError> {
        if device_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE readings
            SET status = 'quarantined', quarantine_reason = $1
            WHERE device_id = ANY($2)
              AND timestamp >= $3
              AND timestamp <= $4
              AND status = 'accepted'
            "#,
        )
        .bind(reason)
        .bind(id_strings(device_ids))
        .bind(window.since())
        .bind(window.until())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let affected = result.rows_affected();
        info!(
            devices = device_ids.len(),
            since = %window.since(),
            until = %window.until(),
            affected,
            "Quarantined readings by window"
        );
        Ok(affected)
    }
}
