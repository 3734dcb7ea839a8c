//! Per-entity-type options (tag, delete cascade, relations, field rules) and their registry.

use crate::{ConfigError, HandleError};
use std::collections::HashMap;
use std::sync::Arc;

/// Many-to-one link: `field` on the owning record holds the id of a `target` record.
/// The reverse collection on the target is reachable as `related_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub field: String,
    pub target: String,
    /// Empty until registration, which fills in `<owner type>_set`.
    pub related_name: String,
}

impl Relation {
    pub fn new(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            related_name: String::new(),
        }
    }

    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = name.into();
        self
    }
}

/// Validation rules for one custom field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Blank values (missing, null, empty string) are rejected.
    pub required: bool,
    pub max_length: Option<usize>,
    pub unique: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Static configuration of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityOptions {
    pub entity_type: String,
    pub tag: String,
    /// Reverse collections soft-deleted together with the owner.
    pub delete_cascade: Vec<String>,
    pub relations: Vec<Relation>,
    pub fields: Vec<FieldSpec>,
    /// Passthrough options, readable with [`EntityOptions::prop`].
    pub extra: HashMap<String, serde_json::Value>,
}

impl EntityOptions {
    /// Options with the tag defaulting to the lower-cased type name.
    pub fn new(entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            tag: entity_type.to_lowercase(),
            entity_type,
            delete_cascade: Vec::new(),
            relations: Vec::new(),
            fields: Vec::new(),
            extra: HashMap::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn cascade(mut self, collection: impl Into<String>) -> Self {
        self.delete_cascade.push(collection.into());
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn ref_tag(&self) -> Result<&str, HandleError> {
        if self.tag.is_empty() {
            return Err(HandleError::TagNotSet(self.entity_type.clone()));
        }
        Ok(&self.tag)
    }

    pub fn prop(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// All registered entity types, resolved once at registration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: HashMap<String, Arc<EntityOptions>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut options: EntityOptions) -> Result<(), ConfigError> {
        if self.types.contains_key(&options.entity_type) {
            return Err(ConfigError::Duplicate(options.entity_type));
        }
        let owner = options.entity_type.to_lowercase();
        for rel in options.relations.iter_mut() {
            if rel.related_name.is_empty() {
                rel.related_name = format!("{}_set", owner);
            }
        }
        self.types
            .insert(options.entity_type.clone(), Arc::new(options));
        Ok(())
    }

    /// Builder-style registration for setup code.
    pub fn with(mut self, options: EntityOptions) -> Result<Self, ConfigError> {
        self.register(options)?;
        Ok(self)
    }

    pub fn get(&self, entity_type: &str) -> Result<&EntityOptions, ConfigError> {
        self.types
            .get(entity_type)
            .map(Arc::as_ref)
            .ok_or_else(|| ConfigError::UnknownType(entity_type.to_string()))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.types.contains_key(entity_type)
    }

    /// Options whose tag equals `tag` (tags compare lower-cased).
    pub fn by_tag(&self, tag: &str) -> Result<&EntityOptions, ConfigError> {
        let tag = tag.to_lowercase();
        self.types
            .values()
            .find(|o| o.tag.to_lowercase() == tag)
            .map(Arc::as_ref)
            .ok_or(ConfigError::UnknownTag(tag))
    }

    /// Resolve each `delete_cascade` name of `owner` to the child type and the relation
    /// on the child that points back at `owner`.
    pub fn cascade_targets(
        &self,
        owner: &str,
    ) -> Result<Vec<(&EntityOptions, &Relation)>, ConfigError> {
        let options = self.get(owner)?;
        let mut targets = Vec::with_capacity(options.delete_cascade.len());
        for name in &options.delete_cascade {
            let found = self.types.values().find_map(|child| {
                child
                    .relations
                    .iter()
                    .find(|rel| rel.target == owner && &rel.related_name == name)
                    .map(|rel| (child.as_ref(), rel))
            });
            let target = found.ok_or_else(|| ConfigError::UnknownCollection {
                entity_type: owner.to_string(),
                name: name.clone(),
            })?;
            targets.push(target);
        }
        Ok(targets)
    }
}
