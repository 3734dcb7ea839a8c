//! Write historical field values back onto live records.

use crate::manager::HandleRefManager;
use crate::validate::check_parent_status;
use async_trait::async_trait;
use handleref_types::{
    EntityStore, ModelError, Record, RevisionMeta, Snapshot, ValidationError, NON_FIELD_ERRORS,
};
use handleref_version::Version;
use std::collections::{BTreeMap, BTreeSet};

/// Bookkeeping fields owned by the manager; never copied from a snapshot.
const BOOKKEEPING_FIELDS: [&str; 3] = ["created", "updated", "version"];

/// Revert / rollback capability. On success `record` holds the saved state;
/// on failure it is left untouched.
#[async_trait]
pub trait Reverter: Send + Sync {
    /// Set each field to its value in the paired version, validate, save.
    /// `created`, `updated` and `version` are skipped.
    async fn revert_fields<V: Version>(
        &self,
        record: &mut Record,
        field_versions: &BTreeMap<String, V>,
        author: Option<&str>,
    ) -> Result<(), ModelError>;

    /// Apply every field of `version` except the bookkeeping ones, validate, save.
    async fn rollback<V: Version>(
        &self,
        record: &mut Record,
        version: &V,
        author: Option<&str>,
    ) -> Result<(), ModelError>;
}

fn snapshot_for<'v, V: Version>(record: &Record, version: &'v V) -> Result<&'v Snapshot, ModelError> {
    let snapshot = version.snapshot().ok_or(ModelError::EmptyVersion)?;
    if snapshot.entity_type != record.entity_type || Some(snapshot.object_id) != record.id {
        return Err(ValidationError::single(
            NON_FIELD_ERRORS,
            format!(
                "Version {} belongs to {} {}, not to this object.",
                snapshot.id, snapshot.entity_type, snapshot.object_id
            ),
        )
        .into());
    }
    Ok(snapshot)
}

/// Working copy of `record` with the selected fields applied and the parent rule checked.
async fn apply_fields<S, V>(
    manager: &HandleRefManager<S>,
    record: &Record,
    field_versions: &BTreeMap<String, V>,
) -> Result<Record, ModelError>
where
    S: EntityStore,
    V: Version,
{
    let mut working = record.clone();
    for (field, version) in field_versions {
        let snapshot = snapshot_for(record, version)?;
        if BOOKKEEPING_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let value = snapshot
            .data
            .get(field)
            .cloned()
            .ok_or_else(|| ModelError::MissingField {
                version_id: snapshot.id,
                field: field.clone(),
            })?;
        working.set(field, value)?;
    }
    if field_versions.contains_key("status") {
        let status = working.status.clone();
        check_parent_status(manager.store(), manager.registry(), &working, &status).await?;
    }
    Ok(working)
}

async fn apply_rollback<S, V>(
    manager: &HandleRefManager<S>,
    record: &Record,
    version: &V,
) -> Result<Record, ModelError>
where
    S: EntityStore,
    V: Version,
{
    let snapshot = snapshot_for(record, version)?;
    let mut working = record.clone();
    let mut fields: Vec<(&String, &serde_json::Value)> = snapshot.data.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    for (field, value) in fields {
        if BOOKKEEPING_FIELDS.contains(&field.as_str()) {
            continue;
        }
        working.set(field, value.clone())?;
    }
    let status = working.status.clone();
    check_parent_status(manager.store(), manager.registry(), &working, &status).await?;
    Ok(working)
}

/// Applies, validates and saves through the manager with no revision comment.
pub struct StoreReverter<'m, S> {
    manager: &'m HandleRefManager<S>,
}

impl<'m, S: EntityStore> StoreReverter<'m, S> {
    pub fn new(manager: &'m HandleRefManager<S>) -> Self {
        Self { manager }
    }

    async fn commit(
        &self,
        record: &mut Record,
        mut working: Record,
        meta: RevisionMeta,
    ) -> Result<(), ModelError> {
        self.manager.save_as(&mut working, &meta).await?;
        *record = working;
        Ok(())
    }
}

fn author_meta(author: Option<&str>) -> RevisionMeta {
    match author {
        Some(author) => RevisionMeta::new().author(author),
        None => RevisionMeta::new(),
    }
}

#[async_trait]
impl<'m, S: EntityStore> Reverter for StoreReverter<'m, S> {
    async fn revert_fields<V: Version>(
        &self,
        record: &mut Record,
        field_versions: &BTreeMap<String, V>,
        author: Option<&str>,
    ) -> Result<(), ModelError> {
        let working = apply_fields(self.manager, record, field_versions).await?;
        self.commit(record, working, author_meta(author)).await
    }

    async fn rollback<V: Version>(
        &self,
        record: &mut Record,
        version: &V,
        author: Option<&str>,
    ) -> Result<(), ModelError> {
        let working = apply_rollback(self.manager, record, version).await?;
        self.commit(record, working, author_meta(author)).await
    }
}

/// Like [`StoreReverter`], with the revision carrying the author and a comment
/// naming the versions used. Requires revision tracking on the manager.
pub struct RevisionReverter<'m, S> {
    inner: StoreReverter<'m, S>,
}

impl<'m, S: EntityStore> RevisionReverter<'m, S> {
    pub fn new(manager: &'m HandleRefManager<S>) -> Result<Self, ModelError> {
        if manager.revisions().is_none() {
            return Err(ModelError::NoRevisions);
        }
        Ok(Self {
            inner: StoreReverter::new(manager),
        })
    }
}

#[async_trait]
impl<'m, S: EntityStore> Reverter for RevisionReverter<'m, S> {
    async fn revert_fields<V: Version>(
        &self,
        record: &mut Record,
        field_versions: &BTreeMap<String, V>,
        author: Option<&str>,
    ) -> Result<(), ModelError> {
        let working = apply_fields(self.inner.manager, record, field_versions).await?;
        let ids: BTreeSet<u64> = field_versions.values().filter_map(|v| v.id()).collect();
        let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
        let meta = author_meta(author)
            .comment(format!("reverted some fields via versions: {}", ids.join(", ")));
        tracing::info!(entity_type = %record.entity_type, id = ?record.id, versions = %ids.join(","), "revert fields");
        self.inner.commit(record, working, meta).await
    }

    async fn rollback<V: Version>(
        &self,
        record: &mut Record,
        version: &V,
        author: Option<&str>,
    ) -> Result<(), ModelError> {
        let working = apply_rollback(self.inner.manager, record, version).await?;
        let target = version
            .data()
            .and_then(|d| d.get("version"))
            .map(|v| v.to_string())
            .unwrap_or_default();
        let meta = author_meta(author).comment(format!("rollback to version {}", target));
        tracing::info!(entity_type = %record.entity_type, id = ?record.id, version = %target, "rollback");
        self.inner.commit(record, working, meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manager, plain_manager};
    use handleref_types::{Since, SnapshotStore};
    use handleref_version::{DetachedVersion, InMemoryRevisionStore, RevisionVersion};
    use serde_json::json;
    use std::sync::Arc;

    /// Org Test -> Updated -> Again (+ website), one snapshot per step.
    async fn org_history() -> (
        HandleRefManager<handleref_store::InMemoryEntityStore>,
        Arc<dyn SnapshotStore>,
        Record,
        Vec<RevisionVersion>,
    ) {
        let revisions: Arc<dyn SnapshotStore> = Arc::new(InMemoryRevisionStore::new());
        let m = manager(Arc::clone(&revisions));
        let mut org = Record::new("Org")
            .with_status("ok")
            .with_field("name", "Test")
            .with_field("website", "");
        m.create(&mut org).await.unwrap();
        org.fields.insert("name".into(), json!("Updated"));
        m.save(&mut org).await.unwrap();
        org.fields.insert("name".into(), json!("Again"));
        org.fields.insert("website".into(), json!("http://localhost"));
        m.save(&mut org).await.unwrap();
        let versions = RevisionVersion::for_object(Arc::clone(&revisions), "Org", 1)
            .await
            .unwrap();
        (m, revisions, org, versions)
    }

    #[tokio::test]
    async fn revert_fields_restores_selected_values() {
        let (m, revisions, mut org, versions) = org_history().await;
        let reverter = RevisionReverter::new(&m).unwrap();
        let fields = BTreeMap::from([
            ("name".to_string(), versions[0].clone()),
            ("website".to_string(), versions[1].clone()),
        ]);
        reverter.revert_fields(&mut org, &fields, Some("admin")).await.unwrap();

        assert_eq!(org.str_field("name"), Some("Test"));
        assert_eq!(org.str_field("website"), Some(""));
        assert_eq!(org.version, 4);
        let stored = m.get("Org", 1).await.unwrap().unwrap();
        assert_eq!(stored, org);

        let latest = revisions.for_object("Org", 1).await.unwrap().pop().unwrap();
        assert_eq!(latest.revision.author.as_deref(), Some("admin"));
        assert_eq!(
            latest.revision.comment.as_deref(),
            Some(format!("reverted some fields via versions: {}, {}", versions[0].id().unwrap(), versions[1].id().unwrap()).as_str())
        );
    }

    #[tokio::test]
    async fn revert_fields_never_moves_version_backwards() {
        let (m, _, mut org, versions) = org_history().await;
        assert_eq!(org.version, 3);
        let fields = BTreeMap::from([
            ("name".to_string(), versions[0].clone()),
            ("version".to_string(), versions[0].clone()),
            ("created".to_string(), versions[0].clone()),
        ]);
        RevisionReverter::new(&m)
            .unwrap()
            .revert_fields(&mut org, &fields, None)
            .await
            .unwrap();

        assert_eq!(org.str_field("name"), Some("Test"));
        assert_eq!(org.version, 4);
        let changed = m.since("Org", &Since::new().version(3)).await.unwrap();
        assert_eq!(changed, vec![org]);
    }

    #[tokio::test]
    async fn rollback_applies_everything_but_bookkeeping() {
        let (m, revisions, mut org, versions) = org_history().await;
        let created = org.created;
        let reverter = RevisionReverter::new(&m).unwrap();
        reverter.rollback(&mut org, &versions[1], None).await.unwrap();

        assert_eq!(org.str_field("name"), Some("Updated"));
        assert_eq!(org.str_field("website"), Some(""));
        assert_eq!(org.created, created);
        assert_eq!(org.version, 4);
        let latest = revisions.for_object("Org", 1).await.unwrap().pop().unwrap();
        assert_eq!(latest.revision.comment.as_deref(), Some("rollback to version 1"));
    }

    #[tokio::test]
    async fn failed_validation_leaves_record_untouched() {
        let (m, _, mut org, versions) = org_history().await;
        // "Test" is free again since org was renamed
        let mut other = Record::new("Org").with_status("ok").with_field("name", "Test");
        m.create(&mut other).await.unwrap();

        let before = org.clone();
        let fields = BTreeMap::from([("name".to_string(), versions[0].clone())]);
        let err = StoreReverter::new(&m)
            .revert_fields(&mut org, &fields, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
        assert_eq!(org, before);
        assert_eq!(m.get("Org", 1).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn empty_foreign_and_incomplete_versions_are_rejected() {
        let (m, _, mut org, versions) = org_history().await;
        let reverter = StoreReverter::new(&m);

        let empty = BTreeMap::from([("name".to_string(), DetachedVersion::empty())]);
        assert!(matches!(
            reverter.revert_fields(&mut org, &empty, None).await,
            Err(ModelError::EmptyVersion)
        ));

        let missing = BTreeMap::from([("color".to_string(), versions[0].clone())]);
        assert!(matches!(
            reverter.revert_fields(&mut org, &missing, None).await,
            Err(ModelError::MissingField { field, .. }) if field == "color"
        ));

        let mut stranger = Record::new("Org").with_status("ok").with_field("name", "Stranger");
        m.create(&mut stranger).await.unwrap();
        assert!(matches!(
            reverter.rollback(&mut stranger, &versions[0], None).await,
            Err(ModelError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn child_cannot_be_undeleted_under_deleted_parent() {
        let revisions: Arc<dyn SnapshotStore> = Arc::new(InMemoryRevisionStore::new());
        let m = manager(Arc::clone(&revisions));
        let mut org = Record::new("Org").with_status("ok").with_field("name", "Parent");
        m.create(&mut org).await.unwrap();
        let mut widget = Record::new("Widget")
            .with_status("ok")
            .with_field("name", "w")
            .with_field("org", 1);
        m.create(&mut widget).await.unwrap();
        m.delete(&mut org, false).await.unwrap();
        let mut widget = m.get("Widget", 1).await.unwrap().unwrap();
        assert!(widget.is_deleted());

        let versions = RevisionVersion::for_object(Arc::clone(&revisions), "Widget", 1)
            .await
            .unwrap();
        let fields = BTreeMap::from([("status".to_string(), versions[0].clone())]);
        let err = RevisionReverter::new(&m)
            .unwrap()
            .revert_fields(&mut widget, &fields, None)
            .await
            .unwrap_err();
        let ModelError::Validation(err) = err else {
            panic!("expected validation error");
        };
        assert!(err.get(NON_FIELD_ERRORS).unwrap()[0].contains("Parent-org1"));
        assert!(m.get("Widget", 1).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn revision_reverter_requires_revisions() {
        let m = plain_manager();
        assert!(matches!(RevisionReverter::new(&m), Err(ModelError::NoRevisions)));
    }
}
