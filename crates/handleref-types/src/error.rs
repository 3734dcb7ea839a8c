//! Error types shared by stores, versioning and the model layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for validation messages that concern the record as a whole.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("unable to split string '{0}'")]
    InvalidFormat(String),
    #[error("id not set")]
    IdNotSet,
    #[error("tag not set for entity type '{0}'")]
    TagNotSet(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown entity type: {0}")]
    UnknownType(String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("entity type already registered: {0}")]
    Duplicate(String),
    #[error("no relation provides collection '{name}' on {entity_type}")]
    UnknownCollection { entity_type: String, name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: i64 },
    #[error("record has no id")]
    MissingId,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RevisionStoreError {
    #[error("version not found: {0}")]
    NotFound(u64),
    #[error("revision store error: {0}")]
    Other(String),
}

/// Field-level validation failure: field name -> messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add(field, message);
        err
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn message_dict(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub fn into_message_dict(self) -> BTreeMap<String, Vec<String>> {
        self.errors
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by the model layer (manager, validation, reverters).
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("revisions: {0}")]
    Revision(#[from] RevisionStoreError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("handle: {0}")]
    Handle(#[from] HandleError),
    #[error("version is empty")]
    EmptyVersion,
    #[error("version {version_id} has no field '{field}'")]
    MissingField { version_id: u64, field: String },
    #[error("revision tracking is not configured")]
    NoRevisions,
}
