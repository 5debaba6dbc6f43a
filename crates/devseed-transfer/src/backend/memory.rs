use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;

use devseed_core::{EntityCatalog, EntityName, EntityType, MigrationRecord, PkKey};

use super::{Backend, Ordering, Row, Selection, SequenceState};
use crate::errors::{Result, TransferError};

#[derive(Debug, Clone)]
struct MemorySequence {
    state: SequenceState,
    current: Option<i64>,
}

#[derive(Debug, Default)]
struct Store {
    tables: BTreeMap<EntityName, Vec<Row>>,
    migrations: BTreeMap<String, Vec<MigrationRecord>>,
    sequences: BTreeMap<String, MemorySequence>,
    identity: BTreeMap<EntityName, i64>,
    schema_scripts: Vec<String>,
    store_drops: usize,
    dropped_tables: Vec<String>,
}

/// In-process backend holding rows in memory.
///
/// Rows are kept in insertion order; the catalog is fixed at construction and
/// survives resets, as if the schema were reapplied afterwards.
#[derive(Debug)]
pub struct MemoryBackend {
    catalog: EntityCatalog,
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new(catalog: EntityCatalog) -> Self {
        Self {
            catalog,
            store: Mutex::new(Store::default()),
        }
    }

    /// Seed rows without going through the import path.
    pub fn with_rows(self, entity: &EntityName, rows: Vec<Row>) -> Self {
        self.lock().tables.entry(entity.clone()).or_default().extend(rows);
        self
    }

    pub fn with_migrations(self, table: &str, records: Vec<MigrationRecord>) -> Self {
        self.lock()
            .migrations
            .entry(table.to_string())
            .or_default()
            .extend(records);
        self
    }

    pub fn with_sequence(self, state: SequenceState) -> Self {
        let key = format!("{}.{}", state.schemaname, state.sequencename);
        self.lock().sequences.insert(
            key,
            MemorySequence {
                current: state.last_value,
                state,
            },
        );
        self
    }

    pub fn rows(&self, entity: &EntityName) -> Vec<Row> {
        self.lock().tables.get(entity).cloned().unwrap_or_default()
    }

    pub fn migrations(&self, table: &str) -> Vec<MigrationRecord> {
        self.lock().migrations.get(table).cloned().unwrap_or_default()
    }

    pub fn sequence(&self, name: &str) -> Option<SequenceState> {
        self.lock().sequences.get(name).map(|seq| seq.state.clone())
    }

    /// Highest primary key recorded by the last identity reset of `entity`.
    pub fn identity_counter(&self, entity: &EntityName) -> Option<i64> {
        self.lock().identity.get(entity).copied()
    }

    pub fn schema_scripts(&self) -> Vec<String> {
        self.lock().schema_scripts.clone()
    }

    pub fn store_drops(&self) -> usize {
        self.lock().store_drops
    }

    pub fn dropped_tables(&self) -> Vec<String> {
        self.lock().dropped_tables.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn describe_target(&self) -> String {
        "in-memory store".to_string()
    }

    async fn catalog(&self) -> Result<EntityCatalog> {
        Ok(self.catalog.clone())
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let store = self.lock();
        let mut names: BTreeSet<String> = self.catalog.names().map(EntityName::label).collect();
        names.extend(store.tables.keys().map(EntityName::label));
        names.extend(store.migrations.keys().cloned());
        Ok(names.into_iter().collect())
    }

    async fn select_rows(&self, entity: &EntityType, selection: &Selection) -> Result<Vec<Row>> {
        let mut rows: Vec<Row> = self
            .lock()
            .tables
            .get(&entity.name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| selection.conditions.iter().all(|cond| cond.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        match &selection.order {
            Some(Ordering::Random) => rows.shuffle(&mut rand::rng()),
            Some(Ordering::Descending(field)) => {
                rows.sort_by(|a, b| compare_values(b.get(field), a.get(field)));
            }
            None => {}
        }

        if let Some(limit) = selection.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn existing_primary_keys(
        &self,
        entity: &EntityType,
        keys: &[Value],
    ) -> Result<BTreeSet<PkKey>> {
        let wanted: BTreeSet<PkKey> = keys.iter().map(PkKey::from).collect();
        let store = self.lock();
        Ok(store
            .tables
            .get(&entity.name)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(&entity.primary_key))
            .map(PkKey::from)
            .filter(|key| wanted.contains(key))
            .collect())
    }

    async fn insert_rows(&self, entity: &EntityType, rows: &[Row]) -> Result<u64> {
        let mut store = self.lock();
        let table = store.tables.entry(entity.name.clone()).or_default();
        let mut present: BTreeSet<PkKey> = table
            .iter()
            .filter_map(|row| row.get(&entity.primary_key))
            .map(PkKey::from)
            .collect();

        for row in rows {
            let key = row
                .get(&entity.primary_key)
                .map(PkKey::from)
                .ok_or_else(|| {
                    TransferError::Backend(format!(
                        "row for {} has no primary key '{}'",
                        entity.name, entity.primary_key
                    ))
                })?;
            if !present.insert(key.clone()) {
                return Err(TransferError::Backend(format!(
                    "duplicate key value {key} violates primary key of {}",
                    entity.name
                )));
            }
            table.push(row.clone());
        }

        Ok(rows.len() as u64)
    }

    async fn delete_all(&self, entity: &EntityType) -> Result<u64> {
        let removed = self
            .lock()
            .tables
            .remove(&entity.name)
            .map_or(0, |rows| rows.len());
        Ok(removed as u64)
    }

    async fn migration_history(&self, table: &str) -> Result<Vec<MigrationRecord>> {
        Ok(self.migrations(table))
    }

    async fn record_migrations(&self, table: &str, records: &[MigrationRecord]) -> Result<()> {
        self.lock()
            .migrations
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn apply_schema(&self, script: &str) -> Result<()> {
        self.lock().schema_scripts.push(script.to_string());
        Ok(())
    }

    async fn drop_store(&self) -> Result<()> {
        let mut store = self.lock();
        let drops = store.store_drops + 1;
        *store = Store {
            store_drops: drops,
            ..Store::default()
        };
        Ok(())
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        let mut store = self.lock();
        for table in tables {
            if let Ok(name) = table.parse::<EntityName>() {
                store.tables.remove(&name);
                store.identity.remove(&name);
            }
            store.migrations.remove(table);
            store.dropped_tables.push(table.clone());
        }
        Ok(())
    }

    async fn list_sequences(&self) -> Result<Vec<SequenceState>> {
        Ok(self
            .lock()
            .sequences
            .values()
            .map(|seq| SequenceState {
                last_value: seq.current.or(Some(seq.state.start_value)),
                ..seq.state.clone()
            })
            .collect())
    }

    async fn drop_sequence(&self, name: &str) -> Result<()> {
        self.lock().sequences.remove(name);
        Ok(())
    }

    async fn create_sequence(&self, state: &SequenceState) -> Result<()> {
        let key = state.qualified_name()?;
        let mut store = self.lock();
        if store.sequences.contains_key(&key) {
            return Err(TransferError::Backend(format!("relation \"{key}\" already exists")));
        }
        let start_value = state.last_value.unwrap_or(state.start_value);
        store.sequences.insert(
            key,
            MemorySequence {
                state: SequenceState {
                    start_value,
                    last_value: None,
                    ..state.clone()
                },
                current: None,
            },
        );
        Ok(())
    }

    async fn next_value(&self, name: &str) -> Result<i64> {
        let mut store = self.lock();
        let seq = store.sequences.get_mut(name).ok_or_else(|| {
            TransferError::Backend(format!("relation \"{name}\" does not exist"))
        })?;

        let next = match seq.current {
            None => seq.state.start_value,
            Some(current) => {
                let candidate = current.saturating_add(seq.state.increment_by);
                let out_of_range =
                    candidate > seq.state.max_value || candidate < seq.state.min_value;
                match (out_of_range, seq.state.cycle) {
                    (false, _) => candidate,
                    (true, true) if seq.state.increment_by > 0 => seq.state.min_value,
                    (true, true) => seq.state.max_value,
                    (true, false) => {
                        return Err(TransferError::Backend(format!(
                            "nextval: reached limit of sequence \"{name}\""
                        )));
                    }
                }
            }
        };

        seq.current = Some(next);
        seq.state.last_value = Some(next);
        Ok(next)
    }

    async fn reset_identity_counters(&self, entity: &EntityType) -> Result<()> {
        let mut store = self.lock();
        let highest = store
            .tables
            .get(&entity.name)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(&entity.primary_key).and_then(Value::as_i64))
            .max();
        if let Some(highest) = highest {
            store.identity.insert(entity.name.clone(), highest);
        }
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Less,
        (_, None | Some(Value::Null)) => CmpOrdering::Greater,
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}
