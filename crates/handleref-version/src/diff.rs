//! Field-level differences between versions.

use crate::version::Version;
use handleref_types::RevisionStoreError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Bookkeeping fields that never show up in a diff.
pub const DIFF_IGNORE_FIELDS: [&str; 3] = ["version", "created", "updated"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub changed: Value,
}

impl FieldChange {
    /// Strings and integers are kept as they are; anything else on the old
    /// side turns both values into display text.
    fn between(old: Value, changed: Value) -> Self {
        let primitive = old.is_string() || old.is_i64() || old.is_u64();
        if primitive {
            Self { old, changed }
        } else {
            Self {
                old: Value::String(render(&old)),
                changed: Value::String(render(&changed)),
            }
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Changes between an older version `a` and a newer version `b`.
pub struct Diff<'a, V: Version> {
    a: &'a V,
    b: &'a V,
}

impl<'a, V: Version> Diff<'a, V> {
    pub fn new(a: &'a V, b: &'a V) -> Self {
        Self { a, b }
    }

    /// `None` when either side is the empty version. Fields present in `b`
    /// whose value differs from `a` (missing counts as null) are reported.
    pub fn changes(&self) -> Option<BTreeMap<String, FieldChange>> {
        let data_a = self.a.data()?;
        let data_b = self.b.data()?;
        let mut diff = BTreeMap::new();
        for (field, value_b) in data_b {
            if DIFF_IGNORE_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let value_a = data_a.get(field).cloned().unwrap_or(Value::Null);
            if &value_a == value_b {
                continue;
            }
            diff.insert(field.clone(), FieldChange::between(value_a, value_b.clone()));
        }
        Some(diff)
    }

    pub fn changed_fields(&self) -> Option<Vec<String>> {
        // BTreeMap keys are already sorted
        self.changes().map(|c| c.into_keys().collect())
    }
}

/// One version's change to one field inside a [`ChangesSummary`].
#[derive(Debug, Clone)]
pub struct SummaryEntry<V> {
    pub version: V,
    pub old: Value,
    pub changed: Value,
}

/// `(field, version id -> entry)` pairs sorted by field name.
pub type ChangesSummary<V> = Vec<(String, BTreeMap<u64, SummaryEntry<V>>)>;

/// Diff every version against its own predecessor and merge the results per field.
pub async fn changes_summary<V: Version>(
    versions: &[V],
) -> Result<ChangesSummary<V>, RevisionStoreError> {
    let mut merged: BTreeMap<String, BTreeMap<u64, SummaryEntry<V>>> = BTreeMap::new();
    for version in versions {
        let Some(id) = version.id() else {
            continue;
        };
        let previous = version.previous().await?;
        let Some(changes) = version.changes(&previous) else {
            continue;
        };
        for (field, change) in changes {
            merged.entry(field).or_default().insert(
                id,
                SummaryEntry {
                    version: version.clone(),
                    old: change.old,
                    changed: change.changed,
                },
            );
        }
    }
    Ok(merged.into_iter().collect())
}
