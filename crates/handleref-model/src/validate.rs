//! Full validation of a record against its entity options.

use handleref_types::{
    Condition, EntityStore, Filter, ModelError, Record, Registry, ValidationError, NON_FIELD_ERRORS,
};
use serde_json::Value;

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// `website_url` -> `Website url`
fn verbose_name(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Built-in checks, field specs (required, max_length, unique) and relation targets.
/// All failures are collected into one [`ValidationError`].
pub async fn full_clean<S>(store: &S, registry: &Registry, record: &Record) -> Result<(), ModelError>
where
    S: EntityStore + ?Sized,
{
    let options = registry.get(&record.entity_type)?;
    let mut errors = ValidationError::new();
    if let Err(err) = record.clean_builtins() {
        errors.merge(err);
    }

    for spec in &options.fields {
        let value = record.get(&spec.name);
        if is_blank(value.as_ref()) {
            if spec.required {
                errors.add(&spec.name, "This field cannot be blank.");
            }
            continue;
        }
        let Some(value) = value else { continue };
        if let (Some(max), Some(text)) = (spec.max_length, value.as_str()) {
            let len = text.chars().count();
            if len > max {
                errors.add(
                    &spec.name,
                    format!("Ensure this value has at most {} characters (it has {}).", max, len),
                );
            }
        }
        if spec.unique {
            let filter = Filter::all().filter(Condition::FieldEq {
                field: spec.name.clone(),
                value,
            });
            let taken = store
                .query(&record.entity_type, &filter)
                .await?
                .iter()
                .any(|other| other.id != record.id);
            if taken {
                errors.add(
                    &spec.name,
                    format!(
                        "{} with this {} already exists.",
                        options.entity_type,
                        verbose_name(&spec.name)
                    ),
                );
            }
        }
    }

    for relation in &options.relations {
        let Some(value) = record.fields.get(&relation.field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let exists = match value.as_i64() {
            Some(id) => store.get(&relation.target, id).await?.is_some(),
            None => false,
        };
        if !exists {
            errors.add(
                &relation.field,
                format!("{} instance with id {} does not exist.", relation.target, value),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// An object may not leave the deleted state while any many-to-one parent is deleted.
pub async fn check_parent_status<S>(
    store: &S,
    registry: &Registry,
    record: &Record,
    status: &str,
) -> Result<(), ModelError>
where
    S: EntityStore + ?Sized,
{
    if status == handleref_types::STATUS_DELETED {
        return Ok(());
    }
    let options = registry.get(&record.entity_type)?;
    for relation in &options.relations {
        let Some(parent_id) = record.fields.get(&relation.field).and_then(Value::as_i64) else {
            continue;
        };
        let Some(parent) = store.get(&relation.target, parent_id).await? else {
            continue;
        };
        if parent.is_deleted() {
            let label = parent.label(registry.get(&relation.target)?);
            return Err(ValidationError::single(
                NON_FIELD_ERRORS,
                format!(
                    "Parent object {} is currently flagged as deleted. \
                     This object may not be undeleted while the parent is still deleted.",
                    label
                ),
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::registry;
    use handleref_store::InMemoryEntityStore;
    use serde_json::json;

    async fn seeded() -> (InMemoryEntityStore, Registry) {
        let store = InMemoryEntityStore::new();
        let mut org = Record::new("Org").with_status("ok").with_field("name", "Acme");
        store.insert(&mut org).await.unwrap();
        (store, registry())
    }

    fn validation(err: ModelError) -> ValidationError {
        match err {
            ModelError::Validation(v) => v,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn verbose_names_are_capitalised() {
        assert_eq!(verbose_name("name"), "Name");
        assert_eq!(verbose_name("website_url"), "Website url");
    }

    #[tokio::test]
    async fn required_and_max_length() {
        let (store, reg) = seeded().await;
        let blank = Record::new("Org").with_field("name", "");
        let err = validation(full_clean(&store, &reg, &blank).await.unwrap_err());
        assert_eq!(err.get("name"), Some(&["This field cannot be blank.".to_string()][..]));

        let long = Record::new("Org").with_field("name", "x".repeat(300));
        let err = validation(full_clean(&store, &reg, &long).await.unwrap_err());
        assert_eq!(
            err.get("name").unwrap()[0],
            "Ensure this value has at most 255 characters (it has 300)."
        );
    }

    #[tokio::test]
    async fn unique_ignores_the_record_itself() {
        let (store, reg) = seeded().await;
        let dup = Record::new("Org").with_field("name", "Acme");
        let err = validation(full_clean(&store, &reg, &dup).await.unwrap_err());
        assert_eq!(err.get("name").unwrap()[0], "Org with this Name already exists.");

        let existing = store.get("Org", 1).await.unwrap().unwrap();
        full_clean(&store, &reg, &existing).await.unwrap();
    }

    #[tokio::test]
    async fn relation_target_must_exist() {
        let (store, reg) = seeded().await;
        let ok = Record::new("Widget").with_field("name", "w").with_field("org", 1);
        full_clean(&store, &reg, &ok).await.unwrap();

        let dangling = Record::new("Widget").with_field("name", "w").with_field("org", 9);
        let err = validation(full_clean(&store, &reg, &dangling).await.unwrap_err());
        assert_eq!(err.get("org").unwrap()[0], "Org instance with id 9 does not exist.");
    }

    #[tokio::test]
    async fn unknown_type_is_a_config_error() {
        let (store, reg) = seeded().await;
        let err = full_clean(&store, &reg, &Record::new("Nope")).await.unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }

    #[tokio::test]
    async fn child_cannot_leave_deleted_while_parent_is_deleted() {
        let (store, reg) = seeded().await;
        let mut org = store.get("Org", 1).await.unwrap().unwrap();
        org.status = "deleted".into();
        store.save(&mut org).await.unwrap();

        let widget = Record::new("Widget")
            .with_status("deleted")
            .with_field("org", json!(1));
        check_parent_status(&store, &reg, &widget, "deleted").await.unwrap();
        let err = validation(
            check_parent_status(&store, &reg, &widget, "ok")
                .await
                .unwrap_err(),
        );
        let message = &err.get(NON_FIELD_ERRORS).unwrap()[0];
        assert!(message.starts_with("Parent object Acme-org1 is currently flagged as deleted."));
    }
}
