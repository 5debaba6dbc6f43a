//! Relational backends the engine reads from and writes to.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use devseed_core::{EntityCatalog, EntityType, ExportedKeys, MigrationRecord, PkKey};

use crate::errors::{Result, TransferError};

mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

/// One row keyed by column name, primary key included.
pub type Row = Map<String, Value>;

/// Row filter evaluated by the backend. Conditions are ANDed.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub conditions: Vec<Condition>,
    pub order: Option<Ordering>,
    pub limit: Option<usize>,
}

impl Selection {
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// `field` is null or its value is one of `keys`.
    NullOrIn {
        field: String,
        keys: Arc<ExportedKeys>,
    },
    /// `field` is one of `keys`.
    In {
        field: String,
        keys: Arc<ExportedKeys>,
    },
}

impl Condition {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::NullOrIn { field, keys } => match row.get(field) {
                None | Some(Value::Null) => true,
                Some(value) => keys.contains(value),
            },
            Condition::In { field, keys } => row
                .get(field)
                .is_some_and(|value| !value.is_null() && keys.contains(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    Random,
    Descending(String),
}

/// Counter metadata as captured on export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    #[serde(default = "default_schema")]
    pub schemaname: String,
    pub sequencename: String,
    pub data_type: String,
    pub start_value: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub increment_by: i64,
    pub cycle: bool,
    pub cache_size: i64,
    pub last_value: Option<i64>,
}

fn default_schema() -> String {
    "public".to_string()
}

impl SequenceState {
    /// `schema.name`, with both parts checked before they reach SQL.
    pub fn qualified_name(&self) -> Result<String> {
        let schema = ensure_simple_value("schemaname", &self.schemaname)?;
        let name = ensure_simple_value("sequencename", &self.sequencename)?;
        Ok(format!("{schema}.{name}"))
    }
}

/// Query execution against one relational store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Human-readable target with credentials masked, used in prompts.
    fn describe_target(&self) -> String;

    async fn catalog(&self) -> Result<EntityCatalog>;

    /// Every table the store holds, as `namespace.name`, including tables
    /// that did not qualify as entities.
    async fn table_names(&self) -> Result<Vec<String>>;

    async fn select_rows(&self, entity: &EntityType, selection: &Selection) -> Result<Vec<Row>>;

    /// Subset of `keys` already stored for `entity`.
    async fn existing_primary_keys(
        &self,
        entity: &EntityType,
        keys: &[Value],
    ) -> Result<BTreeSet<PkKey>>;

    async fn insert_rows(&self, entity: &EntityType, rows: &[Row]) -> Result<u64>;

    async fn delete_all(&self, entity: &EntityType) -> Result<u64>;

    /// Applied migrations in application order; a missing table yields none.
    async fn migration_history(&self, table: &str) -> Result<Vec<MigrationRecord>>;

    /// Append migration rows, creating the history table when needed.
    async fn record_migrations(&self, table: &str, records: &[MigrationRecord]) -> Result<()>;

    async fn apply_schema(&self, script: &str) -> Result<()>;

    /// Destroy and recreate the whole store.
    async fn drop_store(&self) -> Result<()>;

    /// Drop the listed tables when they exist.
    async fn drop_tables(&self, tables: &[String]) -> Result<()>;

    /// Counters not owned by an identity or serial column.
    async fn list_sequences(&self) -> Result<Vec<SequenceState>>;

    /// `name` is schema-qualified, as returned by [`SequenceState::qualified_name`].
    async fn drop_sequence(&self, name: &str) -> Result<()>;

    async fn create_sequence(&self, state: &SequenceState) -> Result<()>;

    async fn next_value(&self, name: &str) -> Result<i64>;

    /// Move the counter owned by the entity's primary key past its highest value.
    async fn reset_identity_counters(&self, entity: &EntityType) -> Result<()>;
}

/// Reject values that must be inlined into SQL unless they are plain
/// identifiers (ASCII alphanumerics and `_`).
pub fn ensure_simple_value<'a>(key: &'static str, value: &'a str) -> Result<&'a str> {
    if value.is_empty()
        || !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(TransferError::UnsafeValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}
