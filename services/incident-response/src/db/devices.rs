//! `devices` table access.

use async_trait::async_trait;
use rootstock_id::{DeviceId, ScitizenId};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::{debug, info};

use super::DbError;
use crate::device::{Device, DeviceDirectory, DeviceFilter, DeviceStatus, DirectoryError};
use crate::firmware::FirmwareVersion;

impl From<DbError> for DirectoryError {
    fn from(e: DbError) -> Self {
        DirectoryError::Store(Box::new(e))
    }
}

/// Map a `devices` row onto the model.
fn device_from_row(row: &PgRow) -> Result<Device, DbError> {
    let id: String = row.try_get("id").map_err(DbError::Query)?;
    let owner_id: String = row.try_get("owner_id").map_err(DbError::Query)?;
    let firmware: String = row.try_get("firmware").map_err(DbError::Query)?;
    let status: String = row.try_get("status").map_err(DbError::Query)?;

    Ok(Device {
        id: DeviceId::parse(&id).map_err(|e| DbError::InvalidRow {
            column: "id",
            reason: e.to_string(),
        })?,
        owner_id: ScitizenId::parse(&owner_id).map_err(|e| DbError::InvalidRow {
            column: "owner_id",
            reason: e.to_string(),
        })?,
        class: row.try_get("class").map_err(DbError::Query)?,
        firmware: FirmwareVersion::parse(&firmware),
        status: status
            .parse()
            .map_err(|reason| DbError::InvalidRow {
                column: "status",
                reason,
            })?,
        tier: row.try_get("tier").map_err(DbError::Query)?,
        created_at: row.try_get("created_at").map_err(DbError::Query)?,
    })
}

/// Device directory backed by Postgres.
///
/// Class matching happens in SQL. Firmware strings have no ordering the
/// database understands, so the range check runs on the fetched rows.
#[derive(Clone)]
pub struct PgDeviceDirectory {
    pool: PgPool,
}

impl PgDeviceDirectory {
    /// Create a new device directory.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a device.
    pub async fn register(&self, device: &Device) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (id, owner_id, class, firmware, status, tier, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(device.id.to_string())
        .bind(device.owner_id.to_string())
        .bind(&device.class)
        .bind(device.firmware.as_str())
        .bind(device.status.as_str())
        .bind(device.tier)
        .bind(device.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::Duplicate(device.id));
        }
        Ok(())
    }

    /// Fetch a device by ID.
    pub async fn get(&self, device_id: DeviceId) -> Result<Device, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, class, firmware, status, tier, created_at
            FROM devices
            WHERE id = $1
            "#,
        )
        .bind(device_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?
        .ok_or(DirectoryError::NotFound(device_id))?;

        Ok(device_from_row(&row)?)
    }
}

#[async_trait]
impl DeviceDirectory for PgDeviceDirectory {
    async fn query_by_class_and_firmware_range(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<Device>, DirectoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, class, firmware, status, tier, created_at
            FROM devices
            WHERE class = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(filter.class())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let mut devices = Vec::new();
        for row in &rows {
            let device = device_from_row(row)?;
            if filter.firmware().contains(&device.firmware) {
                devices.push(device);
            }
        }

        debug!(
            class = filter.class(),
            scanned = rows.len(),
            matched = devices.len(),
            "Queried devices by class and firmware range"
        );
        Ok(devices)
    }

    async fn update_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
    ) -> Result<(), DirectoryError> {
        let result = sqlx::query("UPDATE devices SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(device_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(device_id));
        }
        info!(device_id = %device_id, status = %status, "Device status updated");
        Ok(())
    }
}
