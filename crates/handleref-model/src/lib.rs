//! Record lifecycle for handleref entities: soft/hard delete with cascade,
//! revision-tracked writes with version bumps, incremental `since` queries,
//! validation, reverters and history actions.

mod actions;
mod manager;
mod reverter;
mod validate;

use std::collections::BTreeMap;

pub use actions::{HistoryService, RevertPreview, VersionDetails};
pub use handleref_types::{ModelError, ValidationError, NON_FIELD_ERRORS};
pub use manager::HandleRefManager;
pub use reverter::{RevisionReverter, Reverter, StoreReverter};
pub use validate::{check_parent_status, full_clean};

/// Field name -> messages, as handed back to an admin-style caller.
pub type MessageDict = BTreeMap<String, Vec<String>>;
