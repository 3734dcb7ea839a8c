//! Entity store trait and in-memory implementation.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use handleref_types::{EntityStore, Filter, Record, StoreError};
pub use memory::InMemoryEntityStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEntityStore;

/// Store ordering: newest `updated` first, then newest `created`, then highest id.
pub(crate) fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.updated
            .cmp(&a.updated)
            .then_with(|| b.created.cmp(&a.created))
            .then_with(|| b.id.cmp(&a.id))
    });
}
