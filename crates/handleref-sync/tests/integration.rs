//! Integration tests: lifecycle, history actions and export across stores.

use handleref_model::{HandleRefManager, HistoryService, NON_FIELD_ERRORS};
use handleref_store::{InMemoryEntityStore, SqliteEntityStore};
use handleref_sync::{export, SyncConfig};
use handleref_types::{
    EntityOptions, EntityStore, FieldSpec, Record, Registry, Relation, Since, SnapshotStore,
};
use handleref_version::InMemoryRevisionStore;
use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<Registry> {
    let registry = Registry::new()
        .with(
            EntityOptions::new("Org")
                .cascade("net_set")
                .field(FieldSpec::new("name").required().unique()),
        )
        .and_then(|r| {
            r.with(
                EntityOptions::new("Net")
                    .relation(Relation::new("org", "Org"))
                    .field(FieldSpec::new("name").required()),
            )
        })
        .unwrap();
    Arc::new(registry)
}

fn config(entity_type: &str, since: Since) -> SyncConfig {
    SyncConfig {
        db_path: std::env::temp_dir().join("unused.db"),
        entity_type: entity_type.to_string(),
        since,
    }
}

async fn export_lines<S: EntityStore>(
    manager: &HandleRefManager<S>,
    config: &SyncConfig,
) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    let count = export(manager, config, &mut out).await.unwrap();
    let lines: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), count);
    lines
}

#[tokio::test]
async fn revert_through_history_then_export_by_version() {
    let revisions: Arc<dyn SnapshotStore> = Arc::new(InMemoryRevisionStore::new());
    let manager = HandleRefManager::new(InMemoryEntityStore::new(), registry())
        .with_revisions(Arc::clone(&revisions));

    let mut org = Record::new("Org")
        .with_status("ok")
        .with_field("name", "Test")
        .with_field("website", "");
    manager.create(&mut org).await.unwrap();
    let mut other = Record::new("Org").with_status("ok").with_field("name", "Other");
    manager.create(&mut other).await.unwrap();

    org.fields.insert("name".into(), json!("Updated"));
    manager.save(&mut org).await.unwrap();
    org.fields.insert("name".into(), json!("Again"));
    org.fields.insert("website".into(), json!("http://localhost"));
    manager.save(&mut org).await.unwrap();

    let service = HistoryService::new(&manager).unwrap();
    let history = service.history("Org", 1, 1).await.unwrap();
    let ids: Vec<u64> = history.entries.iter().filter_map(|e| e.id).collect();
    assert_eq!(ids.len(), 3);
    let (oldest, middle) = (ids[2], ids[1]);

    let form = vec![
        ("field_name".to_string(), oldest.to_string()),
        ("field_website".to_string(), middle.to_string()),
    ];
    let reverted = service
        .revert_process("Org", 1, &form, Some("admin"))
        .await
        .unwrap();
    assert_eq!(reverted.str_field("name"), Some("Test"));
    assert_eq!(reverted.str_field("website"), Some(""));
    assert_eq!(reverted.version, 4);

    let lines = export_lines(&manager, &config("Org", Since::new().version(1))).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["id"], json!(1));
    assert_eq!(lines[0]["fields"]["name"], json!("Test"));

    let found = manager.get_by_handle("org1").await.unwrap().unwrap();
    assert_eq!(found, reverted);
}

#[tokio::test]
async fn sqlite_cascade_and_since_include_deleted() {
    let path = std::env::temp_dir().join(format!(
        "handleref-integration-{}-{}.db",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let store = SqliteEntityStore::new(&path).unwrap();
    let revisions: Arc<dyn SnapshotStore> = Arc::new(InMemoryRevisionStore::new());
    let manager = HandleRefManager::new(store, registry()).with_revisions(Arc::clone(&revisions));

    let mut org = Record::new("Org").with_status("ok").with_field("name", "Acme");
    manager.create(&mut org).await.unwrap();
    let mut net = Record::new("Net")
        .with_status("ok")
        .with_field("name", "acme-net")
        .with_field("org", 1);
    manager.create(&mut net).await.unwrap();
    let cutoff = net.updated;

    manager.delete(&mut org, false).await.unwrap();
    let net = manager.get("Net", 1).await.unwrap().unwrap();
    assert!(net.is_deleted());
    assert_eq!(net.version, 2);

    let visible = export_lines(&manager, &config("Net", Since::new().timestamp(cutoff))).await;
    assert!(visible.is_empty());
    let with_deleted = export_lines(
        &manager,
        &config("Net", Since::new().timestamp(cutoff).include_deleted(true)),
    )
    .await;
    assert_eq!(with_deleted.len(), 1);
    assert_eq!(with_deleted[0]["status"], json!("deleted"));

    // undelete of the child is refused while the org stays deleted
    let service = HistoryService::new(&manager).unwrap();
    let first = revisions.for_object("Net", 1).await.unwrap()[0].id;
    let errors = service
        .revert_process("Net", 1, &[("field_status".to_string(), first.to_string())], None)
        .await
        .unwrap_err();
    assert!(errors[NON_FIELD_ERRORS][0].starts_with("Parent object Acme-org1"));

    assert!(manager.last_change("Org").await.unwrap().is_some());
    let _ = std::fs::remove_file(&path);
}
