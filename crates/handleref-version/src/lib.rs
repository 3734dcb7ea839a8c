//! Snapshot storage and version abstractions: navigation, diffs, change summaries
//! and paginated history listings.

mod diff;
mod history;
mod memory;
mod version;

pub use diff::{changes_summary, ChangesSummary, Diff, FieldChange, SummaryEntry, DIFF_IGNORE_FIELDS};
pub use handleref_types::{Revision, RevisionMeta, RevisionStoreError, Snapshot, SnapshotStore};
pub use history::{HistoryCell, HistoryColumn, HistoryEntry, HistoryListing, HistoryPage, HISTORY_PAGE_SIZE};
pub use memory::InMemoryRevisionStore;
pub use version::{DetachedVersion, RevisionVersion, Version};
