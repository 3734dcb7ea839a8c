//! Storage traits: entity store and snapshot (revision) store.

use crate::{Filter, Record, RevisionMeta, RevisionStoreError, Snapshot, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Relational-style record store keyed by (entity type, id).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a new record; assigns `id` and sets `created`/`updated` to now.
    async fn insert(&self, record: &mut Record) -> Result<(), StoreError>;

    /// Persist changes to an existing record and refresh its `updated` timestamp.
    async fn save(&self, record: &mut Record) -> Result<(), StoreError>;

    /// Write a record exactly as given, timestamps included. Used to undo a failed unit.
    async fn replace(&self, record: &Record) -> Result<(), StoreError>;

    async fn get(&self, entity_type: &str, id: i64) -> Result<Option<Record>, StoreError>;

    /// Physically remove a record. Returns false when it did not exist.
    async fn remove(&self, entity_type: &str, id: i64) -> Result<bool, StoreError>;

    /// Records of one type matching `filter`, ordered by `-updated, -created, -id`.
    async fn query(&self, entity_type: &str, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Later of max(created) and max(updated) over the matching records; `None` when empty.
    async fn last_change(
        &self,
        entity_type: &str,
        filter: &Filter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let records = self.query(entity_type, filter).await?;
        Ok(records
            .iter()
            .map(|r| r.created.max(r.updated))
            .max())
    }
}

/// Append-only snapshot store. Snapshot ids increase in commit order.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Record one revision holding a snapshot of each record.
    async fn commit(
        &self,
        meta: &RevisionMeta,
        records: &[Record],
    ) -> Result<Vec<Snapshot>, RevisionStoreError>;

    /// Drop a revision and its snapshots (only for undoing a unit that failed to complete).
    async fn discard(&self, revision_id: u64) -> Result<(), RevisionStoreError>;

    async fn get(&self, id: u64) -> Result<Option<Snapshot>, RevisionStoreError>;

    /// Snapshots of one object, ascending by id.
    async fn for_object(
        &self,
        entity_type: &str,
        object_id: i64,
    ) -> Result<Vec<Snapshot>, RevisionStoreError>;

    /// Nearest snapshot of the same object with a lower id.
    async fn previous(&self, snapshot: &Snapshot) -> Result<Option<Snapshot>, RevisionStoreError> {
        let all = self
            .for_object(&snapshot.entity_type, snapshot.object_id)
            .await?;
        Ok(all.into_iter().rev().find(|s| s.id < snapshot.id))
    }

    /// Nearest snapshot of the same object with a higher id.
    async fn next(&self, snapshot: &Snapshot) -> Result<Option<Snapshot>, RevisionStoreError> {
        let all = self
            .for_object(&snapshot.entity_type, snapshot.object_id)
            .await?;
        Ok(all.into_iter().find(|s| s.id > snapshot.id))
    }
}
