//! SQLite-backed entity store (persistence).

use crate::sort_records;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handleref_types::{
    format_timestamp, next_timestamp, Condition, EntityStore, Filter, Record, StoreError,
};
use std::collections::HashMap;
use std::path::Path;

/// SQLite-backed entity store. Custom fields are stored as a JSON object.
pub struct SqliteEntityStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

const SELECT_COLUMNS: &str = "SELECT entity_type, id, status, created, updated, version, fields FROM records";

impl SqliteEntityStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| StoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            rusqlite::Connection::open_in_memory().map_err(|e| StoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                entity_type TEXT NOT NULL,
                id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                fields TEXT NOT NULL,
                PRIMARY KEY (entity_type, id)
            );

            CREATE TABLE IF NOT EXISTS sequences (
                entity_type TEXT PRIMARY KEY,
                last_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_status ON records(entity_type, status);
            CREATE INDEX IF NOT EXISTS idx_records_updated ON records(entity_type, updated);
            CREATE INDEX IF NOT EXISTS idx_records_version ON records(entity_type, version);
            "#,
        )
        .map_err(|e| StoreError::Other(e.to_string()))?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&conn).map_err(|e| StoreError::Other(e.to_string()))
    }

    fn write_row(conn: &rusqlite::Connection, record: &Record, id: i64) -> Result<(), rusqlite::Error> {
        let fields_json = serde_json::to_string(&record.fields)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "INSERT OR REPLACE INTO records (entity_type, id, status, created, updated, version, fields) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.entity_type,
                id,
                record.status,
                format_timestamp(&record.created),
                format_timestamp(&record.updated),
                record.version,
                fields_json,
            ],
        )?;
        Ok(())
    }

    fn bump_sequence(conn: &rusqlite::Connection, entity_type: &str, id: i64) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO sequences (entity_type, last_id) VALUES (?1, ?2)
             ON CONFLICT(entity_type) DO UPDATE SET last_id = MAX(last_id, excluded.last_id)",
            rusqlite::params![entity_type, id],
        )?;
        Ok(())
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_record_row(row: &rusqlite::Row) -> Result<Record, rusqlite::Error> {
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    let fields_json: String = row.get(6)?;
    let fields: HashMap<String, serde_json::Value> =
        serde_json::from_str(&fields_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Record {
        entity_type: row.get(0)?,
        id: Some(row.get(1)?),
        status: row.get(2)?,
        created: parse_timestamp(3, &created)?,
        updated: parse_timestamp(4, &updated)?,
        version: row.get(5)?,
        fields,
    })
}

/// SQL for the conditions SQLite can evaluate directly. `FieldEq` on custom
/// fields is left to the caller (applied after decoding).
fn condition_sql(condition: &Condition, params: &mut Vec<Box<dyn rusqlite::ToSql>>) -> Option<String> {
    match condition {
        Condition::StatusEq(status) => {
            params.push(Box::new(status.clone()));
            Some(format!("status = ?{}", params.len()))
        }
        Condition::ChangedAfter(ts) => {
            params.push(Box::new(format_timestamp(ts)));
            let n = params.len();
            Some(format!("(created > ?{n} OR updated > ?{n})"))
        }
        Condition::VersionGt(version) => {
            params.push(Box::new(*version));
            Some(format!("version > ?{}", params.len()))
        }
        Condition::FieldEq { .. } => None,
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn insert(&self, record: &mut Record) -> Result<(), StoreError> {
        let now = next_timestamp(None);
        record.created = now;
        record.updated = now;
        let id = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let last: Option<i64> = tx
                .query_row(
                    "SELECT last_id FROM sequences WHERE entity_type = ?1",
                    [&record.entity_type],
                    |row| row.get(0),
                )
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            let id = last.unwrap_or(0) + 1;
            Self::write_row(&tx, record, id)?;
            Self::bump_sequence(&tx, &record.entity_type, id)?;
            tx.commit()?;
            Ok(id)
        })?;
        record.id = Some(id);
        Ok(())
    }

    async fn save(&self, record: &mut Record) -> Result<(), StoreError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        let existing = self
            .get(&record.entity_type, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity_type: record.entity_type.clone(),
                id,
            })?;
        record.created = existing.created;
        record.updated = next_timestamp(Some(existing.updated.max(record.updated)));
        self.with_conn(|conn| Self::write_row(conn, record, id))
    }

    async fn replace(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id.ok_or(StoreError::MissingId)?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            Self::write_row(&tx, record, id)?;
            Self::bump_sequence(&tx, &record.entity_type, id)?;
            tx.commit()
        })
    }

    async fn get(&self, entity_type: &str, id: i64) -> Result<Option<Record>, StoreError> {
        let sql = format!("{} WHERE entity_type = ?1 AND id = ?2", SELECT_COLUMNS);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(rusqlite::params![entity_type, id], parse_record_row) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    async fn remove(&self, entity_type: &str, id: i64) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let count = conn.execute(
                "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
                rusqlite::params![entity_type, id],
            )?;
            Ok(count > 0)
        })
    }

    async fn query(&self, entity_type: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(entity_type.to_string())];
        let mut clauses = vec!["entity_type = ?1".to_string()];
        let mut residual = Filter::all();

        for condition in &filter.include {
            match condition_sql(condition, &mut params) {
                Some(sql) => clauses.push(sql),
                None => residual.include.push(condition.clone()),
            }
        }
        for condition in &filter.exclude {
            match condition_sql(condition, &mut params) {
                Some(sql) => clauses.push(format!("NOT ({})", sql)),
                None => residual.exclude.push(condition.clone()),
            }
        }

        let sql = format!(
            "{} WHERE {} ORDER BY updated DESC, created DESC, id DESC",
            SELECT_COLUMNS,
            clauses.join(" AND ")
        );
        tracing::debug!(%sql, "sqlite query");

        let mut records = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), parse_record_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;
        records.retain(|r| residual.matches(r));
        sort_records(&mut records);
        Ok(records)
    }

    async fn last_change(
        &self,
        entity_type: &str,
        filter: &Filter,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if !filter.include.is_empty() || !filter.exclude.is_empty() {
            let records = self.query(entity_type, filter).await?;
            return Ok(records.iter().map(|r| r.created.max(r.updated)).max());
        }
        let maxes: (Option<String>, Option<String>) = self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(created), MAX(updated) FROM records WHERE entity_type = ?1",
                [entity_type],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        let mut latest: Option<DateTime<Utc>> = None;
        for raw in [maxes.0, maxes.1].into_iter().flatten() {
            let ts = DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::InvalidTimestamp(e.to_string()))?;
            latest = Some(latest.map_or(ts, |l| l.max(ts)));
        }
        Ok(latest)
    }
}
