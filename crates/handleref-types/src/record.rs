//! Soft-deletable record with timestamps and a version counter.

use crate::{format_handle, EntityOptions, HandleError, ValidationError};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status value marking a record as soft-deleted.
pub const STATUS_DELETED: &str = "deleted";

/// Columns every record has besides its custom fields.
pub const BUILTIN_FIELDS: [&str; 5] = ["id", "status", "created", "updated", "version"];

const STATUS_MAX_LENGTH: usize = 255;

/// Fixed-width RFC 3339 (nanoseconds, `Z` suffix) so string order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Current time, or one microsecond past `previous` if the clock has not moved on.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// One stored record. `id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: Option<i64>,
    pub entity_type: String,
    #[serde(default)]
    pub status: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            entity_type: entity_type.into(),
            status: String::new(),
            created: now,
            updated: now,
            version: 0,
            fields: HashMap::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.status == STATUS_DELETED
    }

    /// Read a built-in or custom field as a JSON value.
    pub fn get(&self, field: &str) -> Option<serde_json::Value> {
        match field {
            "id" => Some(self.id.map_or(serde_json::Value::Null, serde_json::Value::from)),
            "status" => Some(serde_json::Value::String(self.status.clone())),
            "created" => Some(serde_json::Value::String(format_timestamp(&self.created))),
            "updated" => Some(serde_json::Value::String(format_timestamp(&self.updated))),
            "version" => Some(serde_json::Value::from(self.version)),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Custom field as a string, if it is one.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Write a built-in or custom field. Built-ins are type checked.
    pub fn set(&mut self, field: &str, value: serde_json::Value) -> Result<(), ValidationError> {
        match field {
            "id" => {
                let id = value.as_i64();
                if id != self.id {
                    return Err(ValidationError::single("id", "The primary key cannot be changed."));
                }
            }
            "status" => {
                let status = value
                    .as_str()
                    .ok_or_else(|| ValidationError::single("status", "Status must be a string."))?;
                self.status = status.to_string();
            }
            "version" => {
                let version = value
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| {
                        ValidationError::single("version", "Version must be a non-negative integer.")
                    })?;
                self.version = version;
            }
            "created" | "updated" => {
                let ts = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| {
                        ValidationError::single(field, "Enter a valid RFC 3339 date/time.")
                    })?;
                if field == "created" {
                    self.created = ts;
                } else {
                    self.updated = ts;
                }
            }
            _ => {
                self.fields.insert(field.to_string(), value);
            }
        }
        Ok(())
    }

    /// Full field map as captured in a snapshot: custom fields plus built-ins.
    pub fn snapshot_data(&self) -> HashMap<String, serde_json::Value> {
        let mut data = self.fields.clone();
        for field in BUILTIN_FIELDS {
            if let Some(value) = self.get(field) {
                data.insert(field.to_string(), value);
            }
        }
        data
    }

    pub fn handle(&self, options: &EntityOptions) -> Result<String, HandleError> {
        format_handle(options.ref_tag()?, self.id)
    }

    /// `<name or type>-<handle>`, used when a record is named in messages.
    pub fn label(&self, options: &EntityOptions) -> String {
        let name = self
            .str_field("name")
            .map(str::to_string)
            .unwrap_or_else(|| options.entity_type.clone());
        match self.handle(options) {
            Ok(handle) => format!("{}-{}", name, handle),
            Err(_) => name,
        }
    }

    /// Validation of the built-in columns (custom fields are checked by the model layer).
    pub fn clean_builtins(&self) -> Result<(), ValidationError> {
        let len = self.status.chars().count();
        if len > STATUS_MAX_LENGTH {
            return Err(ValidationError::single(
                "status",
                format!(
                    "Ensure this value has at most {} characters (it has {}).",
                    STATUS_MAX_LENGTH, len
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_and_set_builtins() {
        let mut r = Record::new("org").with_field("name", "Acme");
        r.id = Some(3);
        r.set("status", json!("ok")).unwrap();
        r.set("version", json!(4)).unwrap();
        assert_eq!(r.get("status"), Some(json!("ok")));
        assert_eq!(r.get("version"), Some(json!(4)));
        assert_eq!(r.get("id"), Some(json!(3)));
        assert_eq!(r.get("name"), Some(json!("Acme")));
        assert_eq!(r.get("missing"), None);

        assert!(r.set("status", json!(1)).is_err());
        assert!(r.set("version", json!(-1)).is_err());
        assert!(r.set("id", json!(4)).is_err());
        r.set("id", json!(3)).unwrap();
    }

    #[test]
    fn timestamps_round_trip_through_set() {
        let mut r = Record::new("org");
        let created = r.get("created").unwrap();
        let original = r.created;
        r.created = original + Duration::seconds(5);
        r.set("created", created).unwrap();
        assert_eq!(r.created, original);
        assert!(r.set("updated", json!("yesterday")).is_err());
    }

    #[test]
    fn snapshot_data_includes_builtins() {
        let mut r = Record::new("org").with_field("name", "Acme");
        r.id = Some(1);
        let data = r.snapshot_data();
        for field in BUILTIN_FIELDS {
            assert!(data.contains_key(field), "{field}");
        }
        assert_eq!(data["name"], json!("Acme"));
    }

    #[test]
    fn next_timestamp_always_advances() {
        let far_future = Utc::now() + Duration::days(1);
        assert!(next_timestamp(Some(far_future)) > far_future);
        let past = Utc::now() - Duration::days(1);
        assert!(next_timestamp(Some(past)) > past);
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let a = Utc::now();
        let b = a + Duration::nanoseconds(1500);
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert_eq!(format_timestamp(&a).len(), format_timestamp(&b).len());
    }

    #[test]
    fn long_status_fails_builtin_validation() {
        let r = Record::new("org").with_status("x".repeat(256));
        let err = r.clean_builtins().unwrap_err();
        assert!(err.get("status").is_some());
    }
}
