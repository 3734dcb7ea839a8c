//! History browsing and revert/rollback processing for an admin-style caller.
//! Failures are reported as a message dict rather than an error value.

use crate::manager::HandleRefManager;
use crate::reverter::{RevisionReverter, Reverter};
use crate::MessageDict;
use handleref_types::{
    EntityStore, ModelError, Record, SnapshotStore, StoreError, ValidationError, NON_FIELD_ERRORS,
};
use handleref_version::{
    changes_summary, ChangesSummary, FieldChange, HistoryListing, HistoryPage, RevisionVersion,
    Version,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const INTERNAL_ERROR: &str = "Internal Error (check server logs)";
const FIELD_PREFIX: &str = "field_";

/// One version with its diff against the version before it.
#[derive(Debug, Clone)]
pub struct VersionDetails {
    pub version: RevisionVersion,
    pub previous: RevisionVersion,
    pub changes: Option<BTreeMap<String, FieldChange>>,
}

/// Versions selected for a revert and what each would change.
#[derive(Debug, Clone)]
pub struct RevertPreview {
    pub versions: Vec<RevisionVersion>,
    pub count: usize,
    pub changes: ChangesSummary<RevisionVersion>,
}

pub struct HistoryService<'m, S> {
    manager: &'m HandleRefManager<S>,
    revisions: Arc<dyn SnapshotStore>,
    listing: HistoryListing,
}

impl<'m, S: EntityStore> HistoryService<'m, S> {
    pub fn new(manager: &'m HandleRefManager<S>) -> Result<Self, ModelError> {
        let revisions = manager.revisions().cloned().ok_or(ModelError::NoRevisions)?;
        Ok(Self {
            manager,
            revisions,
            listing: HistoryListing::new(),
        })
    }

    pub fn with_listing(mut self, listing: HistoryListing) -> Self {
        self.listing = listing;
        self
    }

    /// Page `page_num` (1-based) of the object's history, newest first.
    pub async fn history(
        &self,
        entity_type: &str,
        object_id: i64,
        page_num: usize,
    ) -> Result<HistoryPage, ModelError> {
        self.manager.options(entity_type)?;
        let mut versions =
            RevisionVersion::for_object(Arc::clone(&self.revisions), entity_type, object_id).await?;
        versions.reverse();
        Ok(self.listing.page(&versions, page_num).await?)
    }

    pub async fn version_details(&self, version_id: u64) -> Result<VersionDetails, ModelError> {
        let version = self.load(version_id).await?;
        let previous = version.previous().await?;
        let changes = version.changes(&previous);
        Ok(VersionDetails {
            version,
            previous,
            changes,
        })
    }

    pub async fn revert_preview(&self, version_ids: &[u64]) -> Result<RevertPreview, ModelError> {
        let mut versions = Vec::with_capacity(version_ids.len());
        for id in version_ids {
            versions.push(self.load(*id).await?);
        }
        let changes = changes_summary(&versions).await?;
        Ok(RevertPreview {
            count: versions.len(),
            versions,
            changes,
        })
    }

    /// Revert fields named by `field_<name>` keys to the version id in the value.
    /// A value of `0` leaves that field alone.
    pub async fn revert_process(
        &self,
        entity_type: &str,
        object_id: i64,
        form: &[(String, String)],
        author: Option<&str>,
    ) -> Result<Record, MessageDict> {
        let result: Result<Record, ModelError> = async {
            let mut field_versions = BTreeMap::new();
            for (key, value) in form {
                let Some(field) = key.strip_prefix(FIELD_PREFIX).filter(|f| !f.is_empty()) else {
                    continue;
                };
                let version_id: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ValidationError::single(key.as_str(), "Enter a whole number."))?;
                if version_id == 0 {
                    continue;
                }
                field_versions.insert(field.to_string(), self.load(version_id).await?);
            }
            let mut record = self.live(entity_type, object_id).await?;
            RevisionReverter::new(self.manager)?
                .revert_fields(&mut record, &field_versions, author)
                .await?;
            Ok::<_, ModelError>(record)
        }
        .await;
        result.map_err(surface)
    }

    pub async fn rollback_process(
        &self,
        entity_type: &str,
        object_id: i64,
        version_id: u64,
        author: Option<&str>,
    ) -> Result<Record, MessageDict> {
        let result: Result<Record, ModelError> = async {
            let version = self.load(version_id).await?;
            let mut record = self.live(entity_type, object_id).await?;
            RevisionReverter::new(self.manager)?
                .rollback(&mut record, &version, author)
                .await?;
            Ok::<_, ModelError>(record)
        }
        .await;
        result.map_err(surface)
    }

    async fn load(&self, version_id: u64) -> Result<RevisionVersion, ModelError> {
        Ok(RevisionVersion::load(Arc::clone(&self.revisions), version_id).await?)
    }

    async fn live(&self, entity_type: &str, object_id: i64) -> Result<Record, ModelError> {
        self.manager
            .get(entity_type, object_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound {
                    entity_type: entity_type.to_string(),
                    id: object_id,
                }
                .into()
            })
    }
}

/// Validation problems go back verbatim; anything else is logged and masked.
fn surface(err: ModelError) -> MessageDict {
    match err {
        ModelError::Validation(err) => err.into_message_dict(),
        other => {
            tracing::error!(error = %other, "revert failed");
            BTreeMap::from([(
                NON_FIELD_ERRORS.to_string(),
                vec![INTERNAL_ERROR.to_string()],
            )])
        }
    }
}
