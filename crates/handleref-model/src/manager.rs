//! HandleRefManager: record lifecycle on top of an entity store, with optional
//! revision tracking.

use crate::validate;
use chrono::{DateTime, Utc};
use handleref_types::*;
use std::collections::VecDeque;
use std::sync::Arc;

/// Create, save and delete records of registered entity types.
///
/// With a snapshot store wired in, every write is one unit: the record writes,
/// one revision holding a snapshot of each written record, then a version bump
/// per snapshot. If any step fails the records are restored and the revision
/// is discarded.
pub struct HandleRefManager<S> {
    store: S,
    registry: Arc<Registry>,
    revisions: Option<Arc<dyn SnapshotStore>>,
}

impl<S> HandleRefManager<S>
where
    S: EntityStore,
{
    pub fn new(store: S, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            revisions: None,
        }
    }

    pub fn with_revisions(mut self, revisions: Arc<dyn SnapshotStore>) -> Self {
        self.revisions = Some(revisions);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn revisions(&self) -> Option<&Arc<dyn SnapshotStore>> {
        self.revisions.as_ref()
    }

    pub fn options(&self, entity_type: &str) -> Result<&EntityOptions, ConfigError> {
        self.registry.get(entity_type)
    }

    pub fn tag(&self, entity_type: &str) -> Result<&str, ModelError> {
        Ok(self.options(entity_type)?.ref_tag()?)
    }

    /// Passthrough option declared on the entity type.
    pub fn prop(&self, entity_type: &str, key: &str) -> Result<Option<&serde_json::Value>, ConfigError> {
        Ok(self.options(entity_type)?.prop(key))
    }

    pub fn handle(&self, record: &Record) -> Result<String, ModelError> {
        Ok(record.handle(self.options(&record.entity_type)?)?)
    }

    pub async fn get(&self, entity_type: &str, id: i64) -> Result<Option<Record>, ModelError> {
        self.options(entity_type)?;
        Ok(self.store.get(entity_type, id).await?)
    }

    /// Resolve a handle such as `org12` through the registered tags.
    pub async fn get_by_handle(&self, handle: &str) -> Result<Option<Record>, ModelError> {
        let (tag, id) = split_ref(handle)?;
        let entity_type = self.registry.by_tag(&tag)?.entity_type.clone();
        Ok(self.store.get(&entity_type, id).await?)
    }

    pub async fn full_clean(&self, record: &Record) -> Result<(), ModelError> {
        validate::full_clean(&self.store, &self.registry, record).await
    }

    pub async fn create(&self, record: &mut Record) -> Result<(), ModelError> {
        self.create_as(record, &RevisionMeta::new()).await
    }

    pub async fn create_as(&self, record: &mut Record, meta: &RevisionMeta) -> Result<(), ModelError> {
        self.full_clean(record).await?;
        let mut unit = Unit::new(self);
        if let Err(err) = unit.insert(record).await {
            unit.undo(None).await;
            return Err(err);
        }
        unit.finish(meta, record).await
    }

    pub async fn save(&self, record: &mut Record) -> Result<(), ModelError> {
        self.save_as(record, &RevisionMeta::new()).await
    }

    pub async fn save_as(&self, record: &mut Record, meta: &RevisionMeta) -> Result<(), ModelError> {
        self.full_clean(record).await?;
        let mut unit = Unit::new(self);
        if let Err(err) = unit.save(record).await {
            unit.undo(None).await;
            return Err(err);
        }
        unit.finish(meta, record).await
    }

    pub async fn delete(&self, record: &mut Record, hard: bool) -> Result<(), ModelError> {
        self.delete_as(record, hard, &RevisionMeta::new()).await
    }

    /// Soft delete marks the record and every undeleted member of its cascade
    /// collections as deleted; hard delete removes them from the store.
    pub async fn delete_as(
        &self,
        record: &mut Record,
        hard: bool,
        meta: &RevisionMeta,
    ) -> Result<(), ModelError> {
        let mut unit = Unit::new(self);
        let result = if hard {
            self.hard_delete(&mut unit, record).await
        } else {
            self.soft_delete(&mut unit, record).await
        };
        if let Err(err) = result {
            unit.undo(None).await;
            return Err(err);
        }
        unit.finish(meta, record).await
    }

    async fn soft_delete(&self, unit: &mut Unit<'_, S>, record: &mut Record) -> Result<(), ModelError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        record.status = STATUS_DELETED.to_string();
        unit.save(record).await?;
        tracing::info!(entity_type = %record.entity_type, id, "soft deleted");

        let mut queue = VecDeque::from([(record.entity_type.clone(), id)]);
        while let Some((owner, owner_id)) = queue.pop_front() {
            for (child, relation) in self.registry.cascade_targets(&owner)? {
                let filter = Filter::all()
                    .filter(Condition::field_eq(relation.field.as_str(), owner_id))
                    .undeleted();
                for mut member in self.store.query(&child.entity_type, &filter).await? {
                    member.status = STATUS_DELETED.to_string();
                    unit.save(&mut member).await?;
                    if let Some(member_id) = member.id {
                        tracing::debug!(entity_type = %child.entity_type, id = member_id, "cascade soft delete");
                        queue.push_back((child.entity_type.clone(), member_id));
                    }
                }
            }
        }
        Ok(())
    }

    async fn hard_delete(&self, unit: &mut Unit<'_, S>, record: &Record) -> Result<(), ModelError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        let mut queue = VecDeque::from([(record.entity_type.clone(), id)]);
        while let Some((owner, owner_id)) = queue.pop_front() {
            for (child, relation) in self.registry.cascade_targets(&owner)? {
                let filter = Filter::all().filter(Condition::field_eq(relation.field.as_str(), owner_id));
                for member in self.store.query(&child.entity_type, &filter).await? {
                    if let Some(member_id) = member.id {
                        queue.push_back((child.entity_type.clone(), member_id));
                    }
                }
            }
            unit.remove(&owner, owner_id).await?;
        }
        tracing::info!(entity_type = %record.entity_type, id, "hard deleted");
        Ok(())
    }

    /// All records of the type that are not soft-deleted.
    pub async fn undeleted(&self, entity_type: &str) -> Result<Vec<Record>, ModelError> {
        self.options(entity_type)?;
        Ok(self.store.query(entity_type, &Filter::all().undeleted()).await?)
    }

    /// Records changed after `since.timestamp` and/or above `since.version`.
    pub async fn since(&self, entity_type: &str, since: &Since) -> Result<Vec<Record>, ModelError> {
        self.options(entity_type)?;
        if since.is_unbounded() {
            tracing::debug!(entity_type, "since() without timestamp or version, returning all");
        }
        let filter = since.to_filter()?;
        Ok(self.store.query(entity_type, &filter).await?)
    }

    pub async fn last_change(&self, entity_type: &str) -> Result<Option<DateTime<Utc>>, ModelError> {
        self.options(entity_type)?;
        Ok(self.store.last_change(entity_type, &Filter::all()).await?)
    }
}

/// Writes of one manager call, with what is needed to undo them.
struct Unit<'m, S> {
    manager: &'m HandleRefManager<S>,
    /// (type, id, state before the unit); `None` for records the unit inserted.
    originals: Vec<(String, i64, Option<Record>)>,
    /// Records written (not removed) by the unit, in write order.
    touched: Vec<Record>,
}

impl<'m, S: EntityStore> Unit<'m, S> {
    fn new(manager: &'m HandleRefManager<S>) -> Self {
        Self {
            manager,
            originals: Vec::new(),
            touched: Vec::new(),
        }
    }

    fn remember(&mut self, entity_type: &str, id: i64, original: Option<Record>) {
        let seen = self
            .originals
            .iter()
            .any(|(t, i, _)| t == entity_type && *i == id);
        if !seen {
            self.originals.push((entity_type.to_string(), id, original));
        }
    }

    fn touch(&mut self, record: &Record) {
        match self
            .touched
            .iter_mut()
            .find(|r| r.entity_type == record.entity_type && r.id == record.id)
        {
            Some(slot) => *slot = record.clone(),
            None => self.touched.push(record.clone()),
        }
    }

    async fn insert(&mut self, record: &mut Record) -> Result<(), ModelError> {
        self.manager.store.insert(record).await?;
        let id = record.id.ok_or(StoreError::MissingId)?;
        self.remember(&record.entity_type, id, None);
        self.touch(record);
        Ok(())
    }

    async fn save(&mut self, record: &mut Record) -> Result<(), ModelError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        let original = self
            .manager
            .store
            .get(&record.entity_type, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity_type: record.entity_type.clone(),
                id,
            })?;
        // the counter only moves through the post-commit bump
        record.version = original.version;
        self.manager.store.save(record).await?;
        self.remember(&record.entity_type, id, Some(original));
        self.touch(record);
        Ok(())
    }

    async fn remove(&mut self, entity_type: &str, id: i64) -> Result<(), ModelError> {
        let Some(original) = self.manager.store.get(entity_type, id).await? else {
            return Ok(());
        };
        self.manager.store.remove(entity_type, id).await?;
        self.remember(entity_type, id, Some(original));
        Ok(())
    }

    /// Commit the revision, bump versions and refresh `record` from the final state.
    async fn finish(mut self, meta: &RevisionMeta, record: &mut Record) -> Result<(), ModelError> {
        let Some(revisions) = self.manager.revisions.clone() else {
            return Ok(());
        };
        if self.touched.is_empty() {
            return Ok(());
        }
        let snapshots = match revisions.commit(meta, &self.touched).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                self.undo(None).await;
                return Err(err.into());
            }
        };
        let revision_id = snapshots.first().map(|s| s.revision.id);

        // post-commit hook: one version step per snapshot, `updated` untouched
        for snapshot in &snapshots {
            let Some(touched) = self
                .touched
                .iter_mut()
                .find(|r| r.entity_type == snapshot.entity_type && r.id == Some(snapshot.object_id))
            else {
                continue;
            };
            touched.version += 1;
            if let Err(err) = self.manager.store.replace(touched).await {
                self.undo(revision_id).await;
                return Err(err.into());
            }
        }

        if let Some(last) = self
            .touched
            .iter()
            .find(|r| r.entity_type == record.entity_type && r.id == record.id)
        {
            *record = last.clone();
        }
        Ok(())
    }

    /// Restore every original in reverse order and drop the revision, if any.
    async fn undo(&self, revision_id: Option<u64>) {
        for (entity_type, id, original) in self.originals.iter().rev() {
            let result = match original {
                Some(original) => self.manager.store.replace(original).await,
                None => self.manager.store.remove(entity_type, *id).await.map(|_| ()),
            };
            if let Err(err) = result {
                tracing::warn!(%entity_type, id, error = %err, "failed to restore record");
            }
        }
        if let (Some(revision_id), Some(revisions)) = (revision_id, &self.manager.revisions) {
            if let Err(err) = revisions.discard(revision_id).await {
                tracing::warn!(revision_id, error = %err, "failed to discard revision");
            }
        }
    }
}
