//! Paginated history listing: one row per version, each diffed against its predecessor.

use crate::diff::FieldChange;
use crate::version::Version;
use chrono::{DateTime, Utc};
use handleref_types::RevisionStoreError;
use serde::Serialize;
use std::collections::BTreeMap;

pub const HISTORY_PAGE_SIZE: usize = 100;

/// A column of the history listing. `version_*` keys read version metadata,
/// any other key reads the snapshot data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryColumn {
    VersionId,
    VersionDate,
    VersionAuthor,
    VersionComment,
    Changes,
    ChangedFields,
    Data(String),
}

impl HistoryColumn {
    pub fn parse(key: &str) -> Self {
        match key {
            "version_id" => HistoryColumn::VersionId,
            "version_date" => HistoryColumn::VersionDate,
            "version_user" | "version_author" => HistoryColumn::VersionAuthor,
            "version_comment" => HistoryColumn::VersionComment,
            "version_changes" => HistoryColumn::Changes,
            "version_changed_fields" => HistoryColumn::ChangedFields,
            other => HistoryColumn::Data(other.to_string()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            HistoryColumn::VersionId => "version_id",
            HistoryColumn::VersionDate => "version_date",
            HistoryColumn::VersionAuthor => "version_user",
            HistoryColumn::VersionComment => "version_comment",
            HistoryColumn::Changes => "version_changes",
            HistoryColumn::ChangedFields => "version_changed_fields",
            HistoryColumn::Data(field) => field.as_str(),
        }
    }

    /// version_id, version, version_date, version_user, status, version_changes
    pub fn defaults() -> Vec<HistoryColumn> {
        vec![
            HistoryColumn::VersionId,
            HistoryColumn::Data("version".into()),
            HistoryColumn::VersionDate,
            HistoryColumn::VersionAuthor,
            HistoryColumn::Data("status".into()),
            HistoryColumn::Changes,
        ]
    }

    fn cell<V: Version>(&self, version: &V, previous: &V) -> HistoryCell {
        match self {
            HistoryColumn::VersionId => HistoryCell::Id(version.id()),
            HistoryColumn::VersionDate => HistoryCell::Date(version.date()),
            HistoryColumn::VersionAuthor => {
                HistoryCell::Text(version.author().map(str::to_string))
            }
            HistoryColumn::VersionComment => {
                HistoryCell::Text(version.comment().map(str::to_string))
            }
            HistoryColumn::Changes => HistoryCell::Changes(version.changes(previous)),
            HistoryColumn::ChangedFields => {
                HistoryCell::ChangedFields(version.changed_fields(previous))
            }
            HistoryColumn::Data(field) => HistoryCell::Value(
                version
                    .data()
                    .and_then(|d| d.get(field).cloned())
                    .unwrap_or_else(|| serde_json::Value::String(String::new())),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistoryCell {
    Id(Option<u64>),
    Date(Option<DateTime<Utc>>),
    Text(Option<String>),
    Changes(Option<BTreeMap<String, FieldChange>>),
    ChangedFields(Option<Vec<String>>),
    Value(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: Option<u64>,
    pub comment: Option<String>,
    pub fields: Vec<(String, HistoryCell)>,
}

impl HistoryEntry {
    pub fn field(&self, key: &str) -> Option<&HistoryCell> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub page_num: usize,
    pub per_page: usize,
    pub result_count: usize,
    pub multi_page: bool,
    pub num_pages: usize,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct HistoryListing {
    columns: Vec<HistoryColumn>,
    per_page: usize,
}

impl Default for HistoryListing {
    fn default() -> Self {
        Self {
            columns: HistoryColumn::defaults(),
            per_page: HISTORY_PAGE_SIZE,
        }
    }
}

impl HistoryListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: Vec<HistoryColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn entry<V: Version>(&self, version: &V, previous: &V) -> HistoryEntry {
        HistoryEntry {
            id: version.id(),
            comment: version.comment().map(str::to_string),
            fields: self
                .columns
                .iter()
                .map(|c| (c.key().to_string(), c.cell(version, previous)))
                .collect(),
        }
    }

    /// Rows for `versions` (newest first), newest first. The oldest version is
    /// compared against its own stored predecessor.
    pub async fn entries<V: Version>(
        &self,
        versions: &[V],
    ) -> Result<Vec<HistoryEntry>, RevisionStoreError> {
        let Some(oldest) = versions.last() else {
            return Ok(Vec::new());
        };
        let mut previous = oldest.previous().await?;
        let mut rows = Vec::with_capacity(versions.len());
        for version in versions.iter().rev() {
            rows.push(self.entry(version, &previous));
            previous = version.clone();
        }
        rows.reverse();
        Ok(rows)
    }

    /// One page of `versions` (newest first). Pages are 1-based; page numbers
    /// below 1 read page 1 and pages past the end come back without entries.
    pub async fn page<V: Version>(
        &self,
        versions: &[V],
        page_num: usize,
    ) -> Result<HistoryPage, RevisionStoreError> {
        let page_num = page_num.max(1);
        let result_count = versions.len();
        let num_pages = result_count.div_ceil(self.per_page).max(1);
        let start = (page_num - 1).saturating_mul(self.per_page);
        let entries = if start < result_count {
            let end = (start + self.per_page).min(result_count);
            self.entries(&versions[start..end]).await?
        } else {
            Vec::new()
        };
        Ok(HistoryPage {
            page_num,
            per_page: self.per_page,
            result_count,
            multi_page: result_count > self.per_page,
            num_pages,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryRevisionStore, RevisionVersion};
    use handleref_types::{Record, RevisionMeta, SnapshotStore};
    use serde_json::json;
    use std::sync::Arc;

    async fn history_of(names: &[&str]) -> Vec<RevisionVersion> {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemoryRevisionStore::new());
        let mut org = Record::new("Org").with_status("ok");
        org.id = Some(1);
        for (i, name) in names.iter().enumerate() {
            org.fields.insert("name".into(), json!(name));
            let meta = RevisionMeta::new().author("admin").comment(format!("edit {}", i));
            store.commit(&meta, &[org.clone()]).await.unwrap();
            org.version += 1;
        }
        let mut versions = RevisionVersion::for_object(store, "Org", 1).await.unwrap();
        versions.reverse();
        versions
    }

    #[test]
    fn column_keys_round_trip() {
        for column in HistoryColumn::defaults() {
            assert_eq!(HistoryColumn::parse(column.key()), column);
        }
        assert_eq!(HistoryColumn::parse("website"), HistoryColumn::Data("website".into()));
    }

    #[tokio::test]
    async fn entries_are_newest_first_and_diffed_against_predecessor() {
        let versions = history_of(&["Test", "Updated", "Again"]).await;
        let rows = HistoryListing::new().entries(&versions).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, versions[0].id());
        assert_eq!(rows[0].comment.as_deref(), Some("edit 2"));
        assert_eq!(rows[0].field("version"), Some(&HistoryCell::Value(json!(2))));
        assert_eq!(rows[0].field("status"), Some(&HistoryCell::Value(json!("ok"))));
        assert_eq!(
            rows[0].field("version_user"),
            Some(&HistoryCell::Text(Some("admin".into())))
        );

        let Some(HistoryCell::Changes(Some(changes))) = rows[0].field("version_changes") else {
            panic!("expected changes");
        };
        assert_eq!(changes["name"].old, json!("Updated"));

        // the first version has no predecessor
        assert_eq!(rows[2].field("version_changes"), Some(&HistoryCell::Changes(None)));
    }

    #[tokio::test]
    async fn oldest_row_of_a_page_uses_stored_predecessor() {
        let versions = history_of(&["a", "b", "c"]).await;
        let listing = HistoryListing::new().per_page(2);
        let page = listing.page(&versions, 2).await.unwrap();
        assert_eq!(page.num_pages, 2);
        assert!(page.multi_page);
        assert_eq!(page.result_count, 3);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].field("version_changes"), Some(&HistoryCell::Changes(None)));

        let first = listing.page(&versions, 1).await.unwrap();
        let Some(HistoryCell::Changes(Some(changes))) = first.entries[1].field("version_changes")
        else {
            panic!("expected changes");
        };
        assert_eq!(changes["name"].old, json!("a"));
    }

    #[tokio::test]
    async fn out_of_range_pages() {
        let versions = history_of(&["a"]).await;
        let listing = HistoryListing::new();
        let page = listing.page(&versions, 0).await.unwrap();
        assert_eq!(page.page_num, 1);
        assert_eq!(page.per_page, HISTORY_PAGE_SIZE);
        assert!(!page.multi_page);
        assert_eq!(page.entries.len(), 1);
        assert!(listing.page(&versions, 5).await.unwrap().entries.is_empty());

        let empty: Vec<RevisionVersion> = Vec::new();
        let page = listing.page(&empty, 1).await.unwrap();
        assert_eq!(page.num_pages, 1);
        assert!(page.entries.is_empty());
    }
}
