//! Version abstraction over stored snapshots.

use crate::diff::{Diff, FieldChange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handleref_types::{RevisionStoreError, Snapshot, SnapshotStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One historical snapshot of a record, or the empty version when there is none.
///
/// Navigation never fails for a missing neighbour: `previous` of the first
/// snapshot (and `next` of the last) is an empty version.
#[async_trait]
pub trait Version: Clone + Send + Sync + Sized {
    /// Underlying snapshot; `None` for the empty version.
    fn snapshot(&self) -> Option<&Snapshot>;

    async fn previous(&self) -> Result<Self, RevisionStoreError>;

    async fn next(&self) -> Result<Self, RevisionStoreError>;

    fn is_empty(&self) -> bool {
        self.snapshot().is_none()
    }

    fn id(&self) -> Option<u64> {
        self.snapshot().map(|s| s.id)
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|s| s.revision.date_created)
    }

    fn author(&self) -> Option<&str> {
        self.snapshot().and_then(|s| s.revision.author.as_deref())
    }

    fn comment(&self) -> Option<&str> {
        self.snapshot().and_then(|s| s.revision.comment.as_deref())
    }

    fn data(&self) -> Option<&HashMap<String, serde_json::Value>> {
        self.snapshot().map(|s| &s.data)
    }

    /// `data` as `(field, value)` pairs sorted by field name.
    fn data_sorted(&self) -> Vec<(String, serde_json::Value)> {
        let mut pairs: Vec<(String, serde_json::Value)> = self
            .data()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    fn entity_type(&self) -> Option<&str> {
        self.snapshot().map(|s| s.entity_type.as_str())
    }

    fn object_id(&self) -> Option<i64> {
        self.snapshot().map(|s| s.object_id)
    }

    /// Field changes from `previous` to this version.
    fn changes(&self, previous: &Self) -> Option<BTreeMap<String, FieldChange>> {
        Diff::new(previous, self).changes()
    }

    /// Sorted names of the fields changed since `previous`.
    fn changed_fields(&self, previous: &Self) -> Option<Vec<String>> {
        Diff::new(previous, self).changed_fields()
    }
}

/// Version backed by a [`SnapshotStore`].
#[derive(Clone)]
pub struct RevisionVersion {
    snapshot: Option<Snapshot>,
    store: Arc<dyn SnapshotStore>,
}

impl RevisionVersion {
    pub fn new(store: Arc<dyn SnapshotStore>, snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            store,
        }
    }

    pub fn empty(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            snapshot: None,
            store,
        }
    }

    /// Resolve a snapshot id reference.
    pub async fn load(store: Arc<dyn SnapshotStore>, id: u64) -> Result<Self, RevisionStoreError> {
        let snapshot = store
            .get(id)
            .await?
            .ok_or(RevisionStoreError::NotFound(id))?;
        Ok(Self::new(store, snapshot))
    }

    /// All versions of one object, oldest first.
    pub async fn for_object(
        store: Arc<dyn SnapshotStore>,
        entity_type: &str,
        object_id: i64,
    ) -> Result<Vec<Self>, RevisionStoreError> {
        let snapshots = store.for_object(entity_type, object_id).await?;
        Ok(snapshots
            .into_iter()
            .map(|s| Self::new(Arc::clone(&store), s))
            .collect())
    }

    fn wrap(&self, snapshot: Option<Snapshot>) -> Self {
        Self {
            snapshot,
            store: Arc::clone(&self.store),
        }
    }
}

impl std::fmt::Debug for RevisionVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionVersion")
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl PartialEq for RevisionVersion {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot == other.snapshot
    }
}

#[async_trait]
impl Version for RevisionVersion {
    fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    async fn previous(&self) -> Result<Self, RevisionStoreError> {
        match &self.snapshot {
            Some(s) => Ok(self.wrap(self.store.previous(s).await?)),
            None => Ok(self.wrap(None)),
        }
    }

    async fn next(&self) -> Result<Self, RevisionStoreError> {
        match &self.snapshot {
            Some(s) => Ok(self.wrap(self.store.next(s).await?)),
            None => Ok(self.wrap(None)),
        }
    }
}

/// Version with no backing store; its neighbours are always empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetachedVersion {
    snapshot: Option<Snapshot>,
}

impl DetachedVersion {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Version for DetachedVersion {
    fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    async fn previous(&self) -> Result<Self, RevisionStoreError> {
        Ok(Self::empty())
    }

    async fn next(&self) -> Result<Self, RevisionStoreError> {
        Ok(Self::empty())
    }
}
