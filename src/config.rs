use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::auth::StaticTokenVerifier;
use crate::model::Ms;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Process configuration, read once at startup.
#[derive(Debug)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub cache_ttl: Duration,
    pub reminder_lead: Ms,
    pub metrics_port: Option<u16>,
    pub tokens: StaticTokenVerifier,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_ttl_secs: u64 = try_load("CLINICBOOK_CACHE_TTL_SECS", "60")?;
        let reminder_lead_mins: i64 = try_load("CLINICBOOK_REMINDER_LEAD_MINS", "1440")?;
        let data_dir: String = try_load("CLINICBOOK_DATA_DIR", "./data")?;
        let metrics_port = match std::env::var("CLINICBOOK_METRICS_PORT") {
            Ok(v) => Some(parse("CLINICBOOK_METRICS_PORT", &v)?),
            Err(_) => None,
        };
        let tokens = match std::env::var("CLINICBOOK_TOKENS") {
            Ok(table) => StaticTokenVerifier::parse(&table).map_err(|message| ConfigError::Invalid {
                key: "CLINICBOOK_TOKENS",
                message,
            })?,
            Err(_) => {
                tracing::warn!("CLINICBOOK_TOKENS not set, every request will be rejected");
                StaticTokenVerifier::new()
            }
        };

        Ok(Self {
            bind: try_load("CLINICBOOK_BIND", "0.0.0.0")?,
            port: try_load("CLINICBOOK_PORT", "8080")?,
            data_dir: PathBuf::from(data_dir),
            max_connections: try_load("CLINICBOOK_MAX_CONNECTIONS", "256")?,
            compact_threshold: try_load("CLINICBOOK_COMPACT_THRESHOLD", "1000")?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            reminder_lead: reminder_lead_mins.saturating_mul(60_000),
            metrics_port,
            tokens,
        })
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, &raw)
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}
