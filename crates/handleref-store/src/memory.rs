//! In-memory entity store.

use crate::sort_records;
use handleref_types::{next_timestamp, EntityStore, Filter, Record, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Record>,
}

/// In-memory implementation of EntityStore.
/// One table per entity type; ids auto-increment from 1 and are never reused.
pub struct InMemoryEntityStore {
    /// entity_type -> table.
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn require_id(record: &Record) -> Result<i64, StoreError> {
        record.id.ok_or(StoreError::MissingId)
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert(&self, record: &mut Record) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(record.entity_type.clone()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        let now = next_timestamp(None);
        record.id = Some(id);
        record.created = now;
        record.updated = now;
        table.rows.insert(id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        let id = Self::require_id(record)?;
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(&record.entity_type)
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound {
                entity_type: record.entity_type.clone(),
                id,
            })?;
        record.created = row.created;
        record.updated = next_timestamp(Some(row.updated.max(record.updated)));
        *row = record.clone();
        Ok(())
    }

    async fn replace(&self, record: &Record) -> Result<(), StoreError> {
        let id = Self::require_id(record)?;
        let mut tables = self.tables.write().await;
        let table = tables.entry(record.entity_type.clone()).or_default();
        table.next_id = table.next_id.max(id);
        table.rows.insert(id, record.clone());
        Ok(())
    }

    async fn get(&self, entity_type: &str, id: i64) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(entity_type)
            .and_then(|t| t.rows.get(&id))
            .cloned())
    }

    async fn remove(&self, entity_type: &str, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(entity_type)
            .and_then(|t| t.rows.remove(&id))
            .is_some())
    }

    async fn query(&self, entity_type: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Record> = tables
            .get(entity_type)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_records(&mut out);
        Ok(out)
    }
}
