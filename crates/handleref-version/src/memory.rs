//! In-memory snapshot store: revisions and their snapshots, append-only.

use chrono::Utc;
use handleref_types::{Record, Revision, RevisionMeta, RevisionStoreError, Snapshot, SnapshotStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    next_revision: u64,
    next_snapshot: u64,
    /// snapshot_id -> snapshot.
    snapshots: BTreeMap<u64, Snapshot>,
    /// (entity_type, object_id) -> snapshot ids, ascending.
    by_object: HashMap<(String, i64), Vec<u64>>,
}

/// In-memory implementation of SnapshotStore (process lifetime only).
pub struct InMemoryRevisionStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Total number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.state.read().await.snapshots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryRevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemoryRevisionStore {
    async fn commit(
        &self,
        meta: &RevisionMeta,
        records: &[Record],
    ) -> Result<Vec<Snapshot>, RevisionStoreError> {
        let mut state = self.state.write().await;
        for record in records {
            if record.id.is_none() {
                return Err(RevisionStoreError::Other(format!(
                    "cannot snapshot unsaved {} record",
                    record.entity_type
                )));
            }
        }
        state.next_revision += 1;
        let revision = Revision {
            id: state.next_revision,
            date_created: Utc::now(),
            author: meta.author.clone(),
            comment: meta.comment.clone(),
        };
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let object_id = record.id.unwrap_or_default();
            state.next_snapshot += 1;
            let snapshot = Snapshot {
                id: state.next_snapshot,
                revision: revision.clone(),
                entity_type: record.entity_type.clone(),
                object_id,
                data: record.snapshot_data(),
            };
            state
                .by_object
                .entry((record.entity_type.clone(), object_id))
                .or_default()
                .push(snapshot.id);
            state.snapshots.insert(snapshot.id, snapshot.clone());
            out.push(snapshot);
        }
        Ok(out)
    }

    async fn discard(&self, revision_id: u64) -> Result<(), RevisionStoreError> {
        let mut state = self.state.write().await;
        let doomed: Vec<u64> = state
            .snapshots
            .values()
            .filter(|s| s.revision.id == revision_id)
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            state.snapshots.remove(id);
        }
        for ids in state.by_object.values_mut() {
            ids.retain(|id| !doomed.contains(id));
        }
        state.by_object.retain(|_, ids| !ids.is_empty());
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Snapshot>, RevisionStoreError> {
        Ok(self.state.read().await.snapshots.get(&id).cloned())
    }

    async fn for_object(
        &self,
        entity_type: &str,
        object_id: i64,
    ) -> Result<Vec<Snapshot>, RevisionStoreError> {
        let state = self.state.read().await;
        let ids = state
            .by_object
            .get(&(entity_type.to_string(), object_id))
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.snapshots.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity_type: &str, id: i64, name: &str) -> Record {
        let mut r = Record::new(entity_type).with_field("name", name);
        r.id = Some(id);
        r
    }

    #[tokio::test]
    async fn commit_creates_one_revision_for_all_records() {
        let store = InMemoryRevisionStore::new();
        let meta = RevisionMeta::new().author("admin").comment("initial");
        let snaps = store
            .commit(&meta, &[record("org", 1, "a"), record("widget", 1, "w")])
            .await
            .unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].revision, snaps[1].revision);
        assert_eq!(snaps[0].revision.author.as_deref(), Some("admin"));
        assert_eq!(snaps[0].data["name"], serde_json::json!("a"));
        assert!(snaps[0].id < snaps[1].id);
    }

    #[tokio::test]
    async fn neighbours_stay_within_one_object() {
        let store = InMemoryRevisionStore::new();
        let meta = RevisionMeta::new();
        let a1 = store.commit(&meta, &[record("org", 1, "a")]).await.unwrap();
        store.commit(&meta, &[record("org", 2, "other")]).await.unwrap();
        let a2 = store.commit(&meta, &[record("org", 1, "b")]).await.unwrap();

        let prev = store.previous(&a2[0]).await.unwrap().unwrap();
        assert_eq!(prev.id, a1[0].id);
        let next = store.next(&a1[0]).await.unwrap().unwrap();
        assert_eq!(next.id, a2[0].id);
        assert!(store.previous(&a1[0]).await.unwrap().is_none());
        assert!(store.next(&a2[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn discard_removes_a_revision() {
        let store = InMemoryRevisionStore::new();
        let meta = RevisionMeta::new();
        store.commit(&meta, &[record("org", 1, "a")]).await.unwrap();
        let second = store.commit(&meta, &[record("org", 1, "b")]).await.unwrap();
        store.discard(second[0].revision.id).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.for_object("org", 1).await.unwrap().len(), 1);
        assert!(store.get(second[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsaved_records_cannot_be_snapshotted() {
        let store = InMemoryRevisionStore::new();
        let result = store.commit(&RevisionMeta::new(), &[Record::new("org")]).await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }
}
