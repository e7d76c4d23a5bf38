//! Security response orchestration.
//!
//! Given a device class and a vulnerable firmware range, a run:
//!
//! 1. queries the affected devices
//! 2. suspends them one at a time, in query order
//! 3. collects their IDs
//! 4. quarantines their readings inside the vulnerability window
//! 5. notifies each distinct owner exactly once
//!
//! The first failing step aborts the run. Nothing already applied is undone:
//! a failure while suspending device `i` leaves devices `0..i` suspended, and
//! the error lists them so the caller can reconcile.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rootstock_id::{DeviceId, ScitizenId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::device::{Device, DeviceDirectory, DeviceFilter, DeviceStatus, DirectoryError};
use crate::notification::{NotificationDispatcher, NotifyError, Recipient};
use crate::reading::{QuarantineError, QuarantineWindow, ReadingQuarantine};

/// Subject line of every vulnerability notice.
pub const NOTICE_SUBJECT: &str = "Device suspended due to security vulnerability";

/// What to respond to. Supplied once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityResponseInput {
    /// Device class, matched exactly.
    pub class: String,
    /// Lowest vulnerable firmware, inclusive.
    pub firmware_min: String,
    /// Highest vulnerable firmware, inclusive.
    pub firmware_max: String,
    /// Start of the vulnerability window, inclusive.
    pub window_start: DateTime<Utc>,
    /// End of the vulnerability window, inclusive.
    pub window_end: DateTime<Utc>,
    /// Free text, embedded verbatim in notices and quarantine records.
    pub reason: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityResponseResult {
    pub suspended_count: usize,
    pub quarantined_readings: u64,
    pub notified_scitizens: usize,
}

/// A failed run, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("query devices by class: {0}")]
    QueryDevices(#[source] DirectoryError),

    /// `suspended` lists the devices suspended before the failure.
    #[error("suspend device {device_id}: {source}")]
    SuspendDevice {
        device_id: DeviceId,
        suspended: Vec<DeviceId>,
        #[source]
        source: DirectoryError,
    },

    #[error("quarantine readings: {0}")]
    QuarantineReadings(#[source] QuarantineError),

    #[error("notify scitizens: {0}")]
    NotifyOwners(#[source] NotifyError),
}

impl ResponseError {
    /// Name of the failed step.
    pub fn step(&self) -> &'static str {
        match self {
            Self::QueryDevices(_) => "query_devices",
            Self::SuspendDevice { .. } => "suspend_devices",
            Self::QuarantineReadings(_) => "quarantine_readings",
            Self::NotifyOwners(_) => "notify_scitizens",
        }
    }
}

/// Owner IDs in first-seen order, each kept once.
#[derive(Debug, Default)]
pub struct OwnerSet {
    order: Vec<ScitizenId>,
    seen: HashSet<ScitizenId>,
}

impl OwnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owner. Returns false if it was already present.
    pub fn insert(&mut self, owner: ScitizenId) -> bool {
        if !self.seen.insert(owner) {
            return false;
        }
        self.order.push(owner);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScitizenId> {
        self.order.iter()
    }
}

impl<'a> FromIterator<&'a Device> for OwnerSet {
    fn from_iter<I: IntoIterator<Item = &'a Device>>(devices: I) -> Self {
        let mut owners = Self::new();
        for device in devices {
            owners.insert(device.owner_id);
        }
        owners
    }
}

/// Body of the vulnerability notice.
pub fn notice_body(input: &SecurityResponseInput) -> String {
    format!(
        "Your device (class {}) has been suspended: {}. Affected firmware range: {}–{}.",
        input.class, input.reason, input.firmware_min, input.firmware_max
    )
}

/// The security response workflow over three capabilities.
///
/// Holds no state between runs; concurrent runs are safe with respect to
/// each capability but not atomic across them.
pub struct SecurityResponse<D: ?Sized, R: ?Sized, N: ?Sized> {
    devices: Arc<D>,
    readings: Arc<R>,
    notifier: Arc<N>,
}

impl<D: ?Sized, R: ?Sized, N: ?Sized> Clone for SecurityResponse<D, R, N> {
    fn clone(&self) -> Self {
        Self {
            devices: Arc::clone(&self.devices),
            readings: Arc::clone(&self.readings),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<D, R, N> SecurityResponse<D, R, N>
where
    D: DeviceDirectory + ?Sized,
    R: ReadingQuarantine + ?Sized,
    N: NotificationDispatcher + ?Sized,
{
    pub fn new(devices: Arc<D>, readings: Arc<R>, notifier: Arc<N>) -> Self {
        Self {
            devices,
            readings,
            notifier,
        }
    }

    /// Execute the response.
    pub async fn run(
        &self,
        input: &SecurityResponseInput,
    ) -> Result<SecurityResponseResult, ResponseError> {
        info!(
            class = %input.class,
            firmware_min = %input.firmware_min,
            firmware_max = %input.firmware_max,
            window_start = %input.window_start,
            window_end = %input.window_end,
            "Starting security response"
        );

        let result = self.execute(input).await;
        match &result {
            Ok(summary) => info!(
                suspended = summary.suspended_count,
                quarantined = summary.quarantined_readings,
                notified = summary.notified_scitizens,
                "Security response complete"
            ),
            Err(e) => warn!(step = e.step(), error = %e, "Security response failed"),
        }
        result
    }

    async fn execute(
        &self,
        input: &SecurityResponseInput,
    ) -> Result<SecurityResponseResult, ResponseError> {
        // Both are checked before anything is touched.
        let filter = DeviceFilter::new(&input.class, &input.firmware_min, &input.firmware_max)
            .map_err(ResponseError::QueryDevices)?;
        let window = QuarantineWindow::new(input.window_start, input.window_end)
            .map_err(ResponseError::QuarantineReadings)?;

        // 1. Query affected devices.
        let devices = self
            .devices
            .query_by_class_and_firmware_range(&filter)
            .await
            .map_err(ResponseError::QueryDevices)?;
        info!(count = devices.len(), "Matched vulnerable devices");

        if devices.is_empty() {
            return Ok(SecurityResponseResult::default());
        }

        // 2. Suspend each device, strictly one after another.
        let device_ids = self.suspend_all(&devices).await?;

        // 3. and 4. Quarantine readings from the vulnerability window.
        let quarantined_readings = if device_ids.is_empty() {
            0
        } else {
            self.readings
                .quarantine_by_window(&device_ids, &window, &input.reason)
                .await
                .map_err(ResponseError::QuarantineReadings)?
        };

        // 5. Notify each distinct owner once.
        let owners: OwnerSet = devices.iter().collect();
        let body = notice_body(input);
        let recipients: Vec<Recipient> = owners
            .iter()
            .map(|&scitizen_id| Recipient {
                scitizen_id,
                subject: NOTICE_SUBJECT.to_string(),
                body: body.clone(),
            })
            .collect();

        if !recipients.is_empty() {
            self.notifier
                .notify(&recipients)
                .await
                .map_err(ResponseError::NotifyOwners)?;
        }

        Ok(SecurityResponseResult {
            suspended_count: devices.len(),
            quarantined_readings,
            notified_scitizens: recipients.len(),
        })
    }

    /// Suspend devices in order, returning their IDs in the same order.
    async fn suspend_all(&self, devices: &[Device]) -> Result<Vec<DeviceId>, ResponseError> {
        let mut suspended = Vec::with_capacity(devices.len());
        for device in devices {
            if let Err(source) = self
                .devices
                .update_status(device.id, DeviceStatus::Suspended)
                .await
            {
                return Err(ResponseError::SuspendDevice {
                    device_id: device.id,
                    suspended,
                    source,
                });
            }
            suspended.push(device.id);
        }
        info!(count = suspended.len(), "Suspended devices");
        Ok(suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn device_owned_by(owner: ScitizenId) -> Device {
        Device::new(owner, "tier1", "1.0.0")
    }

    #[test]
    fn test_owner_set_keeps_first_occurrence_order() {
        let (a, b, c) = (ScitizenId::new(), ScitizenId::new(), ScitizenId::new());
        let devices = [
            device_owned_by(b),
            device_owned_by(a),
            device_owned_by(b),
            device_owned_by(c),
            device_owned_by(a),
        ];

        let owners: OwnerSet = devices.iter().collect();
        assert_eq!(owners.len(), 3);
        assert_eq!(owners.iter().copied().collect::<Vec<_>>(), vec![b, a, c]);
    }

    #[test]
    fn test_owner_set_insert_reports_duplicates() {
        let mut owners = OwnerSet::new();
        let id = ScitizenId::new();
        assert!(owners.is_empty());
        assert!(owners.insert(id));
        assert!(!owners.insert(id));
        assert_eq!(owners.len(), 1);
    }

    #[test]
    fn test_notice_body_embeds_input() {
        let input = SecurityResponseInput {
            class: "tier1".to_string(),
            firmware_min: "1.0.0".to_string(),
            firmware_max: "1.2.0".to_string(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            reason: "CVE-2025-0001".to_string(),
        };
        assert_eq!(
            notice_body(&input),
            "Your device (class tier1) has been suspended: CVE-2025-0001. \
             Affected firmware range: 1.0.0–1.2.0."
        );
    }

    #[rstest]
    #[case(ResponseError::QueryDevices(DirectoryError::InvalidFilter("x".into())), "query_devices")]
    #[case(
        ResponseError::SuspendDevice {
            device_id: DeviceId::new(),
            suspended: vec![],
            source: DirectoryError::NotFound(DeviceId::new()),
        },
        "suspend_devices"
    )]
    #[case(
        ResponseError::QuarantineReadings(QuarantineError::Store("down".into())),
        "quarantine_readings"
    )]
    #[case(
        ResponseError::NotifyOwners(NotifyError::Delivery {
            recipient: ScitizenId::new(),
            reason: "bounced".into(),
        }),
        "notify_scitizens"
    )]
    fn test_error_step_names(#[case] error: ResponseError, #[case] step: &str) {
        assert_eq!(error.step(), step);
    }

    #[test]
    fn test_error_message_names_step_and_cause() {
        let device_id = DeviceId::new();
        let err = ResponseError::SuspendDevice {
            device_id,
            suspended: vec![],
            source: DirectoryError::NotFound(device_id),
        };
        assert_eq!(
            err.to_string(),
            format!("suspend device {device_id}: device {device_id} not found")
        );
    }
}
