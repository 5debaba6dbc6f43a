use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of an entity type: a namespace (schema) plus a name (table).
///
/// Rendered as `namespace.name`, which is also the snapshot directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName {
    namespace: String,
    name: String,
}

impl EntityName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for EntityName {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('.') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(Error::InvalidEntityName(value.to_string())),
        }
    }
}

impl TryFrom<String> for EntityName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityName> for String {
    fn from(value: EntityName) -> Self {
        value.to_string()
    }
}

/// A direct foreign-key style relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationField {
    pub field: String,
    pub target: EntityName,
    pub nullable: bool,
}

/// A many-to-many relation backed by a join table.
///
/// Only auto-created join tables contribute a dependency; explicit join
/// entities carry their own relation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToMany {
    pub field: String,
    pub target: EntityName,
    pub auto_created: bool,
}

/// Immutable description of an entity type derived from schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: EntityName,
    pub primary_key: String,
    pub relations: Vec<RelationField>,
    pub many_to_many: Vec<ManyToMany>,
}

impl EntityType {
    pub fn new(name: EntityName, primary_key: impl Into<String>) -> Self {
        Self {
            name,
            primary_key: primary_key.into(),
            relations: Vec::new(),
            many_to_many: Vec::new(),
        }
    }

    pub fn with_relation(
        mut self,
        field: impl Into<String>,
        target: EntityName,
        nullable: bool,
    ) -> Self {
        self.relations.push(RelationField {
            field: field.into(),
            target,
            nullable,
        });
        self
    }

    pub fn with_many_to_many(
        mut self,
        field: impl Into<String>,
        target: EntityName,
        auto_created: bool,
    ) -> Self {
        self.many_to_many.push(ManyToMany {
            field: field.into(),
            target,
            auto_created,
        });
        self
    }

    pub fn relation(&self, field: &str) -> Option<&RelationField> {
        self.relations.iter().find(|relation| relation.field == field)
    }

    /// Relation fields pointing at other entities; self references are skipped.
    pub fn parent_relations(&self) -> impl Iterator<Item = &RelationField> {
        self.relations
            .iter()
            .filter(move |relation| relation.target != self.name)
    }
}

/// Set of entity types known to the engine, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCatalog {
    entities: BTreeMap<EntityName, EntityType>,
}

impl EntityCatalog {
    pub fn new(entities: impl IntoIterator<Item = EntityType>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|entity| (entity.name.clone(), entity))
                .collect(),
        }
    }

    pub fn insert(&mut self, entity: EntityType) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, name: &EntityName) -> Option<&EntityType> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &EntityName) -> bool {
        self.entities.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &EntityName> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
