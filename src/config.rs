use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, bail};

use crate::{hub::SessionLimits, logging::LogFormat, model::WireClock};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub display_utc_offset_minutes: i32,
    pub session_expiry_minutes: i64,
    pub outbox_capacity: usize,
    pub close_timeout: Duration,
    pub redis_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Config {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://pairchat.db?mode=rwc".to_owned()),
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            bind_addr: parsed(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            display_utc_offset_minutes: parsed(&lookup, "DISPLAY_UTC_OFFSET_MINUTES", 330)?,
            session_expiry_minutes: parsed(&lookup, "SESSION_EXPIRY_MINUTES", 60)?,
            outbox_capacity: parsed(&lookup, "OUTBOX_CAPACITY", 256)?,
            close_timeout: Duration::from_millis(parsed(&lookup, "CLOSE_TIMEOUT_MS", 2000)?),
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            log_format: parsed(&lookup, "LOG_FORMAT", LogFormat::Compact)?,
        };

        if config.outbox_capacity == 0 {
            bail!("OUTBOX_CAPACITY must be at least 1");
        }
        if config.display_utc_offset_minutes.abs() >= 24 * 60 {
            bail!("DISPLAY_UTC_OFFSET_MINUTES must be within a day");
        }
        Ok(config)
    }

    pub fn clock(&self) -> WireClock {
        WireClock::from_offset_minutes(self.display_utc_offset_minutes)
    }

    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            outbox_capacity: self.outbox_capacity,
            close_timeout: self.close_timeout,
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid {key}: {raw:?}")),
    }
}
