//! Core types and traits for soft-deletable, versioned records.
//!
//! Records carry a status flag, created/updated timestamps and a version counter.
//! Storage and snapshot backends implement the traits in this crate.

mod error;
mod handle;
mod options;
mod query;
mod record;
mod snapshot;
mod traits;

pub use error::*;
pub use handle::{format_handle, split_ref};
pub use options::{EntityOptions, FieldSpec, Registry, Relation};
pub use query::{Condition, Filter, Moment, Since};
pub use record::{format_timestamp, next_timestamp, Record, BUILTIN_FIELDS, STATUS_DELETED};
pub use snapshot::{Revision, RevisionMeta, Snapshot};
pub use traits::{EntityStore, SnapshotStore};
