//! Query filters: status exclusion, field equality, changed-since and version-since.

use crate::{Record, StoreError, STATUS_DELETED};
use chrono::{DateTime, TimeZone, Utc};

/// A single comparison against a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    StatusEq(String),
    FieldEq {
        field: String,
        value: serde_json::Value,
    },
    /// `created > t OR updated > t`.
    ChangedAfter(DateTime<Utc>),
    VersionGt(u32),
}

impl Condition {
    pub fn field_eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Condition::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::StatusEq(status) => &record.status == status,
            Condition::FieldEq { field, value } => record.get(field).as_ref() == Some(value),
            Condition::ChangedAfter(ts) => record.created > *ts || record.updated > *ts,
            Condition::VersionGt(version) => record.version > *version,
        }
    }
}

/// Conjunction of `include` conditions minus anything matching an `exclude` condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub include: Vec<Condition>,
    pub exclude: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.include.push(condition);
        self
    }

    pub fn exclude(mut self, condition: Condition) -> Self {
        self.exclude.push(condition);
        self
    }

    pub fn undeleted(self) -> Self {
        self.exclude(Condition::StatusEq(STATUS_DELETED.to_string()))
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.include.iter().all(|c| c.matches(record))
            && !self.exclude.iter().any(|c| c.matches(record))
    }
}

/// Point in time for `since` queries; plain numbers are epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Moment {
    At(DateTime<Utc>),
    Epoch(f64),
}

impl Moment {
    pub fn to_datetime(self) -> Result<DateTime<Utc>, StoreError> {
        match self {
            Moment::At(ts) => Ok(ts),
            Moment::Epoch(secs) => {
                if !secs.is_finite() {
                    return Err(StoreError::InvalidTimestamp(secs.to_string()));
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
                    return Err(StoreError::InvalidTimestamp(secs.to_string()));
                }
                Utc.timestamp_opt(whole as i64, nanos)
                    .single()
                    .ok_or_else(|| StoreError::InvalidTimestamp(secs.to_string()))
            }
        }
    }
}

impl From<DateTime<Utc>> for Moment {
    fn from(ts: DateTime<Utc>) -> Self {
        Moment::At(ts)
    }
}

impl From<i64> for Moment {
    fn from(secs: i64) -> Self {
        Moment::Epoch(secs as f64)
    }
}

impl From<f64> for Moment {
    fn from(secs: f64) -> Self {
        Moment::Epoch(secs)
    }
}

/// Incremental-sync query: records changed after a moment and/or above a version.
///
/// With neither bound set the query returns every (undeleted) record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Since {
    pub timestamp: Option<Moment>,
    pub version: Option<u32>,
    pub include_deleted: bool,
}

impl Since {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(mut self, moment: impl Into<Moment>) -> Self {
        self.timestamp = Some(moment.into());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.timestamp.is_none() && self.version.is_none()
    }

    pub fn to_filter(&self) -> Result<Filter, StoreError> {
        let mut filter = Filter::all();
        if let Some(moment) = self.timestamp {
            filter = filter.filter(Condition::ChangedAfter(moment.to_datetime()?));
        }
        if let Some(version) = self.version {
            filter = filter.filter(Condition::VersionGt(version));
        }
        if !self.include_deleted {
            filter = filter.undeleted();
        }
        Ok(filter)
    }
}
