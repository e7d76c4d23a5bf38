//! Reading quarantine capability.
//!
//! Quarantining marks readings as untrusted without deleting them. Only
//! readings still `accepted` are transitioned, so re-running a quarantine
//! over the same window affects nothing and keeps the original reason.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rootstock_id::{DeviceId, ReadingId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::actors::{self, Actor, ActorContext, ActorError, ActorHandle};

// =============================================================================
// Model
// =============================================================================

/// Reading status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    /// Passed ingestion checks; counts toward aggregates.
    Accepted,
    /// Excluded from aggregation but retained.
    Quarantined,
    /// Failed ingestion checks.
    Rejected,
}

impl ReadingStatus {
    /// Storage form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Quarantined => "quarantined",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "quarantined" => Ok(Self::Quarantined),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown reading status '{other}'")),
        }
    }
}

/// Truncate to the microsecond precision timestamps are stored with.
///
/// Window bounds and reading timestamps both pass through here, so the
/// in-memory store draws the window edge where Postgres does.
pub fn storage_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub device_id: DeviceId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub status: ReadingStatus,
    pub quarantine_reason: Option<String>,
}

impl Reading {
    /// A new accepted reading with a fresh ID.
    pub fn new(device_id: DeviceId, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: ReadingId::new(),
            device_id,
            value,
            timestamp: storage_precision(timestamp),
            status: ReadingStatus::Accepted,
            quarantine_reason: None,
        }
    }
}

/// Inclusive time window `[since, until]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuarantineWindow {
    since: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl QuarantineWindow {
    /// Build a window, rejecting `since > until`. Bounds are kept at
    /// storage precision.
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self, QuarantineError> {
        let (since, until) = (storage_precision(since), storage_precision(until));
        if since > until {
            return Err(QuarantineError::InvalidWindow { since, until });
        }
        Ok(Self { since, until })
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    /// True if `timestamp` lies within the window, bounds included.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.since && timestamp <= self.until
    }
}

/// Accepted vs quarantined counts over a set of devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityMetrics {
    pub accepted: u64,
    pub quarantined: u64,
}

// =============================================================================
// Capability
// =============================================================================

/// Errors from reading store operations.
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// The window ends before it starts.
    #[error("invalid quarantine window: {since} is after {until}")]
    InvalidWindow {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },

    /// The reading does not exist.
    #[error("reading {0} not found")]
    NotFound(ReadingId),

    /// The backing store failed.
    #[error("reading store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The store worker is not accepting requests.
    #[error("reading store unavailable: {0}")]
    Actor(#[from] ActorError),
}

/// Bulk quarantine of readings by device set and time window.
#[async_trait]
pub trait ReadingQuarantine: Send + Sync {
    /// Quarantine every accepted reading of `device_ids` inside `window`.
    ///
    /// Returns the number of readings transitioned. An empty `device_ids`
    /// matches nothing and returns 0.
    async fn quarantine_by_window(
        &self,
        device_ids: &[DeviceId],
        window: &QuarantineWindow,
        reason: &str,
    ) -> Result<u64, QuarantineError>;
}

// =============================================================================
// Actor-backed store
// =============================================================================

/// Messages handled by `ReadingStoreActor`.
#[derive(Debug)]
pub enum ReadingMessage {
    Record {
        reading: Reading,
        reply_to: oneshot::Sender<()>,
    },
    Get {
        reading_id: ReadingId,
        reply_to: oneshot::Sender<Result<Reading, QuarantineError>>,
    },
    Quarantine {
        reading_id: ReadingId,
        reason: String,
        reply_to: oneshot::Sender<Result<(), QuarantineError>>,
    },
    QuarantineByWindow {
        device_ids: Vec<DeviceId>,
        window: QuarantineWindow,
        reason: String,
        reply_to: oneshot::Sender<u64>,
    },
    Quality {
        device_ids: Vec<DeviceId>,
        reply_to: oneshot::Sender<QualityMetrics>,
    },
}

struct ReadingStoreActor {
    readings: HashMap<ReadingId, Reading>,
}

impl ReadingStoreActor {
    fn quarantine(&mut self, reading_id: ReadingId, reason: String) -> Result<(), QuarantineError> {
        let reading = self
            .readings
            .get_mut(&reading_id)
            .ok_or(QuarantineError::NotFound(reading_id))?;
        reading.status = ReadingStatus::Quarantined;
        reading.quarantine_reason = Some(reason);
        Ok(())
    }

    fn quarantine_by_window(
        &mut self,
        device_ids: &[DeviceId],
        window: &QuarantineWindow,
        reason: &str,
    ) -> u64 {
        let devices: HashSet<&DeviceId> = device_ids.iter().collect();
        let mut affected = 0;
        for reading in self.readings.values_mut() {
            if reading.status == ReadingStatus::Accepted
                && devices.contains(&reading.device_id)
                && window.contains(reading.timestamp)
            {
                reading.status = ReadingStatus::Quarantined;
                reading.quarantine_reason = Some(reason.to_string());
                affected += 1;
            }
        }
        affected
    }

    fn quality(&self, device_ids: &[DeviceId]) -> QualityMetrics {
        let devices: HashSet<&DeviceId> = device_ids.iter().collect();
        let mut metrics = QualityMetrics::default();
        for reading in self.readings.values() {
            if !devices.contains(&reading.device_id) {
                continue;
            }
            match reading.status {
                ReadingStatus::Accepted => metrics.accepted += 1,
                ReadingStatus::Quarantined => metrics.quarantined += 1,
                ReadingStatus::Rejected => {}
            }
        }
        metrics
    }
}

#[async_trait]
impl Actor for ReadingStoreActor {
    type Message = ReadingMessage;

    fn name(&self) -> &str {
        "reading_store"
    }

    async fn handle(
        &mut self,
        msg: ReadingMessage,
        _ctx: &mut ActorContext,
    ) -> Result<(), ActorError> {
        match msg {
            ReadingMessage::Record {
                mut reading,
                reply_to,
            } => {
                reading.timestamp = storage_precision(reading.timestamp);
                self.readings.insert(reading.id, reading);
                let _ = reply_to.send(());
            }
            ReadingMessage::Get {
                reading_id,
                reply_to,
            } => {
                let result = self
                    .readings
                    .get(&reading_id)
                    .cloned()
                    .ok_or(QuarantineError::NotFound(reading_id));
                let _ = reply_to.send(result);
            }
            ReadingMessage::Quarantine {
                reading_id,
                reason,
                reply_to,
            } => {
                let _ = reply_to.send(self.quarantine(reading_id, reason));
            }
            ReadingMessage::QuarantineByWindow {
                device_ids,
                window,
                reason,
                reply_to,
            } => {
                let affected = self.quarantine_by_window(&device_ids, &window, &reason);
                info!(
                    devices = device_ids.len(),
                    since = %window.since(),
                    until = %window.until(),
                    affected,
                    "Quarantined readings by window"
                );
                let _ = reply_to.send(affected);
            }
            ReadingMessage::Quality {
                device_ids,
                reply_to,
            } => {
                let _ = reply_to.send(self.quality(&device_ids));
            }
        }
        Ok(())
    }
}

/// Reading store whose rows live inside a serialized actor.
#[derive(Debug, Clone)]
pub struct InMemoryReadingStore {
    handle: ActorHandle<ReadingMessage>,
}

impl InMemoryReadingStore {
    /// Spawn an empty store. Must be called inside a tokio runtime.
    pub fn spawn(mailbox_size: usize) -> Self {
        let actor = ReadingStoreActor {
            readings: HashMap::new(),
        };
        Self {
            handle: actors::spawn(actor, mailbox_size),
        }
    }

    /// Store a reading, replacing any reading with the same ID.
    pub async fn record(&self, reading: Reading) -> Result<(), QuarantineError> {
        Ok(self
            .handle
            .call(|reply_to| ReadingMessage::Record { reading, reply_to })
            .await?)
    }

    /// Fetch a reading by ID.
    pub async fn get(&self, reading_id: ReadingId) -> Result<Reading, QuarantineError> {
        self.handle
            .call(|reply_to| ReadingMessage::Get {
                reading_id,
                reply_to,
            })
            .await?
    }

    /// Quarantine a single reading regardless of its current status.
    pub async fn quarantine(
        &self,
        reading_id: ReadingId,
        reason: impl Into<String>,
    ) -> Result<(), QuarantineError> {
        let reason = reason.into();
        self.handle
            .call(|reply_to| ReadingMessage::Quarantine {
                reading_id,
                reason,
                reply_to,
            })
            .await?
    }

    /// Accepted vs quarantined counts for the given devices.
    pub async fn quality(&self, device_ids: &[DeviceId]) -> Result<QualityMetrics, QuarantineError> {
        let device_ids = device_ids.to_vec();
        Ok(self
            .handle
            .call(|reply_to| ReadingMessage::Quality {
                device_ids,
                reply_to,
            })
            .await?)
    }

    /// Stop the worker after all pending requests.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
    }
}

#[async_trait]
impl ReadingQuarantine for InMemoryReadingStore {
    async fn quarantine_by_window(
        &self,
        device_ids: &[DeviceId],
        window: &QuarantineWindow,
        reason: &str,
    ) -> Result<u64, QuarantineError> {
        if device_ids.is_empty() {
            debug!("No devices given, skipping quarantine");
            return Ok(0);
        }

        let device_ids = device_ids.to_vec();
        let window = *window;
        let reason = reason.to_string();
        Ok(self
            .handle
            .call(|reply_to| ReadingMessage::QuarantineByWindow {
                device_ids,
                window,
                reason,
                reply_to,
            })
            .await?)
    }
}
