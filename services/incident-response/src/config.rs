use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::db::DbConfig;

/// Default actor mailbox capacity.
pub const DEFAULT_MAILBOX_SIZE: usize = 64;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub mailbox_size: usize,
    /// `None` runs against the in-memory stores.
    pub database: Option<DbConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = get("ROOTSTOCK_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = match get("ROOTSTOCK_LOG_FORMAT") {
            Some(v) => v.parse()?,
            None => LogFormat::Json,
        };

        let mailbox_size = match get("ROOTSTOCK_MAILBOX_SIZE") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("invalid ROOTSTOCK_MAILBOX_SIZE '{v}'"))?,
            None => DEFAULT_MAILBOX_SIZE,
        };
        if mailbox_size == 0 {
            bail!("ROOTSTOCK_MAILBOX_SIZE must be at least 1");
        }

        let database = get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                let mut db = DbConfig::new(url);
                if let Some(n) = get("DB_MAX_CONNECTIONS").and_then(|s| s.parse().ok()) {
                    db.max_connections = n;
                }
                if let Some(n) = get("DB_MIN_CONNECTIONS").and_then(|s| s.parse().ok()) {
                    db.min_connections = n;
                }
                db
            });

        Ok(Self {
            log_level,
            log_format,
            mailbox_size,
            database,
        })
    }
}
