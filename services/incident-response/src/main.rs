//! rootstock incident response
//!
//! Runs one security response against either Postgres (`DATABASE_URL` set)
//! or the in-memory actor-backed stores, and prints the summary as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rootstock_incident_response::config::{Config, LogFormat};
use rootstock_incident_response::db::Database;
use rootstock_incident_response::device::{Device, DeviceDirectory, InMemoryDeviceDirectory};
use rootstock_incident_response::notification::{LoggingNotifier, NotificationDispatcher};
use rootstock_incident_response::reading::{InMemoryReadingStore, Reading, ReadingQuarantine};
use rootstock_incident_response::{SecurityResponse, SecurityResponseInput};

/// Suspend devices running vulnerable firmware, quarantine their readings
/// and notify their owners.
#[derive(Debug, Parser)]
#[command(name = "incident-response", version)]
struct Args {
    /// Device class to respond to (exact match).
    #[arg(long)]
    class: String,

    /// Lowest vulnerable firmware version, inclusive.
    #[arg(long)]
    firmware_min: String,

    /// Highest vulnerable firmware version, inclusive.
    #[arg(long)]
    firmware_max: String,

    /// Start of the vulnerability window (RFC 3339).
    #[arg(long)]
    since: DateTime<Utc>,

    /// End of the vulnerability window (RFC 3339).
    #[arg(long)]
    until: DateTime<Utc>,

    /// Reason shown to owners and stored on quarantined readings.
    #[arg(long)]
    reason: String,

    /// JSON file of devices and readings to load before running.
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Apply schema migrations before running (Postgres only).
    #[arg(long)]
    migrate: bool,
}

impl Args {
    fn input(&self) -> SecurityResponseInput {
        SecurityResponseInput {
            class: self.class.clone(),
            firmware_min: self.firmware_min.clone(),
            firmware_max: self.firmware_max.clone(),
            window_start: self.since,
            window_end: self.until,
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Fixtures {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    readings: Vec<Reading>,
}

impl Fixtures {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read fixtures from {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse fixtures {}", path.display()))
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the result.
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}

type Response =
    SecurityResponse<dyn DeviceDirectory, dyn ReadingQuarantine, dyn NotificationDispatcher>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(
        mailbox_size = config.mailbox_size,
        backend = if config.database.is_some() { "postgres" } else { "memory" },
        "Starting incident response"
    );

    let fixtures = Fixtures::load(args.fixtures.as_deref())?;
    let notifier = LoggingNotifier::spawn(config.mailbox_size);

    let mut in_memory = None;
    let response: Response = match &config.database {
        Some(db_config) => {
            let db = Database::connect(db_config).await?;
            db.health_check().await?;
            if args.migrate {
                db.run_migrations().await?;
            }

            let devices = db.device_directory();
            let readings = db.reading_store();
            for device in &fixtures.devices {
                devices.register(device).await?;
            }
            for reading in &fixtures.readings {
                readings.record(reading).await?;
            }

            SecurityResponse::new(
                Arc::new(devices) as Arc<dyn DeviceDirectory>,
                Arc::new(readings) as Arc<dyn ReadingQuarantine>,
                Arc::new(notifier.clone()) as Arc<dyn NotificationDispatcher>,
            )
        }
        None => {
            let devices = InMemoryDeviceDirectory::spawn(config.mailbox_size);
            let readings = InMemoryReadingStore::spawn(config.mailbox_size);
            for device in fixtures.devices {
                devices.register(device).await?;
            }
            for reading in fixtures.readings {
                readings.record(reading).await?;
            }
            in_memory = Some((devices.clone(), readings.clone()));

            SecurityResponse::new(
                Arc::new(devices) as Arc<dyn DeviceDirectory>,
                Arc::new(readings) as Arc<dyn ReadingQuarantine>,
                Arc::new(notifier.clone()) as Arc<dyn NotificationDispatcher>,
            )
        }
    };

    let outcome = response.run(&args.input()).await;

    notifier.shutdown().await;
    if let Some((devices, readings)) = in_memory {
        devices.shutdown().await;
        readings.shutdown().await;
    }

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!(step = e.step(), error = %e, "Incident response failed");
            Err(e.into())
        }
    }
}
