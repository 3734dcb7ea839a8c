//! Incremental export: records of one entity type changed since a moment
//! and/or above a version, written as JSON lines.

use chrono::{DateTime, Utc};
use handleref_model::{HandleRefManager, ModelError};
use handleref_types::{ConfigError, EntityOptions, EntityStore, Moment, Registry, Since};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] handleref_types::StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Export settings, normally read from `HANDLEREF_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub entity_type: String,
    pub since: Since,
}

impl SyncConfig {
    /// `HANDLEREF_DB` (default `handleref.db`), `HANDLEREF_TYPE` (required),
    /// `HANDLEREF_SINCE` (epoch seconds or RFC 3339), `HANDLEREF_SINCE_VERSION`,
    /// `HANDLEREF_INCLUDE_DELETED`.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("HANDLEREF_DB").unwrap_or_else(|| "handleref.db".to_string());
        let entity_type = lookup("HANDLEREF_TYPE")
            .filter(|t| !t.trim().is_empty())
            .ok_or(SyncError::MissingVar("HANDLEREF_TYPE"))?;

        let mut since = Since::new();
        if let Some(raw) = lookup("HANDLEREF_SINCE").filter(|v| !v.is_empty()) {
            since = since.timestamp(parse_moment(&raw)?);
        }
        if let Some(raw) = lookup("HANDLEREF_SINCE_VERSION").filter(|v| !v.is_empty()) {
            let version = raw.trim().parse::<u32>().map_err(|_| SyncError::InvalidVar {
                name: "HANDLEREF_SINCE_VERSION",
                value: raw.clone(),
            })?;
            since = since.version(version);
        }
        if let Some(raw) = lookup("HANDLEREF_INCLUDE_DELETED") {
            since = since.include_deleted(parse_flag(&raw)?);
        }

        Ok(Self {
            db_path: PathBuf::from(db_path),
            entity_type: entity_type.trim().to_string(),
            since,
        })
    }

    /// Registry holding just the exported type with default options.
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        Registry::new().with(EntityOptions::new(self.entity_type.clone()))
    }
}

fn parse_moment(raw: &str) -> Result<Moment, SyncError> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        return Ok(Moment::Epoch(secs));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Moment::At(dt.with_timezone(&Utc)))
        .map_err(|_| SyncError::InvalidVar {
            name: "HANDLEREF_SINCE",
            value: raw.to_string(),
        })
}

fn parse_flag(raw: &str) -> Result<bool, SyncError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::InvalidVar {
            name: "HANDLEREF_INCLUDE_DELETED",
            value: raw.to_string(),
        }),
    }
}

/// Write each matching record as one JSON line; returns how many were written.
pub async fn export<S, W>(
    manager: &HandleRefManager<S>,
    config: &SyncConfig,
    writer: &mut W,
) -> Result<usize, SyncError>
where
    S: EntityStore,
    W: Write,
{
    let records = manager.since(&config.entity_type, &config.since).await?;
    for record in &records {
        serde_json::to_writer(&mut *writer, record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    tracing::debug!(entity_type = %config.entity_type, count = records.len(), "exported");
    Ok(records.len())
}
