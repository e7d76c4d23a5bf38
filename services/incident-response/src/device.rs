//! Device directory capability.
//!
//! The directory answers "which devices of this class run vulnerable
//! firmware" and applies status changes. Two implementations exist:
//! - `InMemoryDeviceDirectory`: actor-backed, owns the devices in its worker
//! - `db::PgDeviceDirectory`: backed by the relational store

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootstock_id::{DeviceId, ScitizenId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::actors::{self, Actor, ActorContext, ActorError, ActorHandle};
use crate::firmware::{FirmwareRange, FirmwareVersion};

// =============================================================================
// Model
// =============================================================================

/// Device lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Registered, not yet enrolled.
    Pending,
    /// Allowed to submit readings.
    Active,
    /// Temporarily barred, e.g. by a security response.
    Suspended,
    /// Permanently barred.
    Revoked,
}

impl DeviceStatus {
    /// Storage form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown device status '{other}'")),
        }
    }
}

/// A registered sensor device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub owner_id: ScitizenId,
    /// Coarse device-type tag, matched exactly.
    pub class: String,
    pub firmware: FirmwareVersion,
    pub status: DeviceStatus,
    pub tier: i32,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// A new active device with a fresh ID.
    pub fn new(
        owner_id: ScitizenId,
        class: impl Into<String>,
        firmware: impl Into<FirmwareVersion>,
    ) -> Self {
        Self {
            id: DeviceId::new(),
            owner_id,
            class: class.into(),
            firmware: firmware.into(),
            status: DeviceStatus::Active,
            tier: 1,
            created_at: Utc::now(),
        }
    }
}

/// Class plus inclusive firmware range, as used by the vulnerability lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    class: String,
    firmware: FirmwareRange,
}

impl DeviceFilter {
    /// Build a filter, rejecting an empty class or an inverted range.
    /// A blank firmware bound leaves that side unbounded.
    pub fn new(
        class: impl Into<String>,
        firmware_min: &str,
        firmware_max: &str,
    ) -> Result<Self, DirectoryError> {
        let class = class.into();
        if class.trim().is_empty() {
            return Err(DirectoryError::InvalidFilter(
                "device class must not be empty".to_string(),
            ));
        }
        let firmware = FirmwareRange::new(firmware_min, firmware_max)
            .map_err(|e| DirectoryError::InvalidFilter(e.to_string()))?;
        Ok(Self { class, firmware })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn firmware(&self) -> &FirmwareRange {
        &self.firmware
    }

    /// True if the device is of this class and its firmware is in range.
    pub fn matches(&self, device: &Device) -> bool {
        device.class == self.class && self.firmware.contains(&device.firmware)
    }
}

// =============================================================================
// Capability
// =============================================================================

/// Errors from device directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The device does not exist (any more).
    #[error("device {0} not found")]
    NotFound(DeviceId),

    /// A device with this ID is already registered.
    #[error("device {0} already registered")]
    Duplicate(DeviceId),

    /// The lookup filter is malformed.
    #[error("invalid device filter: {0}")]
    InvalidFilter(String),

    /// The backing store failed.
    #[error("device store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The directory worker is not accepting requests.
    #[error("device directory unavailable: {0}")]
    Actor(#[from] ActorError),
}

/// Lookup and status updates over the device fleet.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// All devices matching the filter, in a stable order.
    async fn query_by_class_and_firmware_range(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<Device>, DirectoryError>;

    /// Set a device's status unconditionally.
    async fn update_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
    ) -> Result<(), DirectoryError>;
}

// =============================================================================
// Actor-backed directory
// =============================================================================

/// Messages handled by `DeviceDirectoryActor`.
#[derive(Debug)]
pub enum DeviceMessage {
    Register {
        device: Device,
        reply_to: oneshot::Sender<Result<(), DirectoryError>>,
    },
    Get {
        device_id: DeviceId,
        reply_to: oneshot::Sender<Result<Device, DirectoryError>>,
    },
    Query {
        filter: DeviceFilter,
        reply_to: oneshot::Sender<Vec<Device>>,
    },
    UpdateStatus {
        device_id: DeviceId,
        status: DeviceStatus,
        reply_to: oneshot::Sender<Result<(), DirectoryError>>,
    },
}

/// Owns the device table. Query results come back in registration order.
struct DeviceDirectoryActor {
    devices: Vec<Device>,
    index: HashMap<DeviceId, usize>,
}

impl DeviceDirectoryActor {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn register(&mut self, device: Device) -> Result<(), DirectoryError> {
        if self.index.contains_key(&device.id) {
            return Err(DirectoryError::Duplicate(device.id));
        }
        debug!(device_id = %device.id, class = %device.class, firmware = %device.firmware, "Registering device");
        self.index.insert(device.id, self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    fn get(&self, device_id: DeviceId) -> Result<Device, DirectoryError> {
        self.index
            .get(&device_id)
            .map(|&i| self.devices[i].clone())
            .ok_or(DirectoryError::NotFound(device_id))
    }

    fn query(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    fn update_status(
        &mut self,
        device_id: DeviceId,
        status: DeviceStatus,
    ) -> Result<(), DirectoryError> {
        let &i = self
            .index
            .get(&device_id)
            .ok_or(DirectoryError::NotFound(device_id))?;
        let device = &mut self.devices[i];
        if device.status != status {
            info!(device_id = %device_id, from = %device.status, to = %status, "Device status changed");
        }
        device.status = status;
        Ok(())
    }
}

#[async_trait]
impl Actor for DeviceDirectoryActor {
    type Message = DeviceMessage;

    fn name(&self) -> &str {
        "device_directory"
    }

    async fn handle(
        &mut self,
        msg: DeviceMessage,
        _ctx: &mut ActorContext,
    ) -> Result<(), ActorError> {
        match msg {
            DeviceMessage::Register { device, reply_to } => {
                let _ = reply_to.send(self.register(device));
            }
            DeviceMessage::Get {
                device_id,
                reply_to,
            } => {
                let _ = reply_to.send(self.get(device_id));
            }
            DeviceMessage::Query { filter, reply_to } => {
                let _ = reply_to.send(self.query(&filter));
            }
            DeviceMessage::UpdateStatus {
                device_id,
                status,
                reply_to,
            } => {
                let _ = reply_to.send(self.update_status(device_id, status));
            }
        }
        Ok(())
    }
}

/// Device directory whose table lives inside a serialized actor.
#[derive(Debug, Clone)]
pub struct InMemoryDeviceDirectory {
    handle: ActorHandle<DeviceMessage>,
}

impl InMemoryDeviceDirectory {
    /// Spawn an empty directory. Must be called inside a tokio runtime.
    pub fn spawn(mailbox_size: usize) -> Self {
        Self {
            handle: actors::spawn(DeviceDirectoryActor::new(), mailbox_size),
        }
    }

    /// Add a device.
    pub async fn register(&self, device: Device) -> Result<(), DirectoryError> {
        self.handle
            .call(|reply_to| DeviceMessage::Register { device, reply_to })
            .await?
    }

    /// Fetch a device by ID.
    pub async fn get(&self, device_id: DeviceId) -> Result<Device, DirectoryError> {
        self.handle
            .call(|reply_to| DeviceMessage::Get {
                device_id,
                reply_to,
            })
            .await?
    }

    /// Stop the worker after all pending requests.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn query_by_class_and_firmware_range(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<Device>, DirectoryError> {
        let filter = filter.clone();
        Ok(self
            .handle
            .call(|reply_to| DeviceMessage::Query { filter, reply_to })
            .await?)
    }

    async fn update_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
    ) -> Result<(), DirectoryError> {
        self.handle
            .call(|reply_to| DeviceMessage::UpdateStatus {
                device_id,
                status,
                reply_to,
            })
            .await?
    }
}
