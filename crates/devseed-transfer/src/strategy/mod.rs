//! Extraction and load strategies.
//!
//! A strategy is a named policy bound to one entity. Export selects rows
//! from the source (always restricted to parents already in the snapshot),
//! anonymises them and writes `<root>/<entity>/<name>.json`; import merges
//! that file into the target.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use devseed_core::{
    EntityCatalog, EntityName, EntityType, ExportedKeys, MembershipIndex, PkKey, Record,
    SnapshotLayout, is_populated, read_records, write_records,
};

use crate::anonymise::Anonymiser;
use crate::backend::{Backend, Condition, Row, Selection};
use crate::errors::{Result, TransferError};

mod delete_first;
mod kinds;
mod registry;

pub use delete_first::DeleteFirst;
pub use kinds::{All, Exact, Failing, Latest, Random, Reverse, StrategyBase};
pub use registry::{StrategyConfig, StrategyFactory, StrategyKind, StrategyRegistry};

/// Per-run export state shared by every strategy.
pub struct ExportContext<'a> {
    pub backend: &'a dyn Backend,
    pub catalog: &'a EntityCatalog,
    pub layout: SnapshotLayout,
    pub index: MembershipIndex,
    pub anonymiser: Anonymiser,
    seen: HashSet<(EntityName, String)>,
}

impl<'a> ExportContext<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        catalog: &'a EntityCatalog,
        layout: SnapshotLayout,
        anonymiser: Anonymiser,
    ) -> Self {
        Self {
            backend,
            catalog,
            layout,
            index: MembershipIndex::new(),
            anonymiser,
            seen: HashSet::new(),
        }
    }

    /// Record that `strategy` writes a file for `entity` in this run.
    ///
    /// Two strategies with one name would overwrite each other's file.
    pub fn claim_name(&mut self, entity: &EntityName, strategy: &str) -> Result<()> {
        if !self.seen.insert((entity.clone(), strategy.to_string())) {
            return Err(TransferError::configuration(format!(
                "strategy names must be unique per entity so exports do not collide: \
                 '{strategy}' is used twice for {entity}"
            )));
        }
        Ok(())
    }

    /// Primary keys already written for `entity` in this snapshot.
    pub fn exported(&mut self, entity: &EntityName) -> Result<Arc<ExportedKeys>> {
        Ok(self.index.exported(self.layout.root(), entity)?)
    }

    /// Forget cached keys of `entity` after one of its files changed.
    pub fn invalidate(&mut self, entity: &EntityName) {
        self.index.invalidate(self.layout.root(), entity);
    }

    /// Turn selected rows into records, anonymising them when asked to.
    pub fn records_from_rows(
        &mut self,
        entity: &EntityType,
        strategy: &str,
        rows: Vec<Row>,
        anonymise: bool,
    ) -> Result<Vec<Record>> {
        let mut records = rows
            .into_iter()
            .map(|row| row_to_record(entity, row))
            .collect::<Result<Vec<_>>>()?;

        if anonymise {
            self.anonymiser.anonymise_records(
                entity,
                strategy,
                &mut records,
                &mut self.index,
                self.layout.root(),
            )?;
        }

        Ok(records)
    }
}

/// Per-run import state.
pub struct ImportContext<'a> {
    pub backend: &'a dyn Backend,
    pub layout: SnapshotLayout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub rows: Option<usize>,
    pub bytes: u64,
    /// The file was left alone because of `no_update`.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// No file was exported for this strategy.
    pub missing: bool,
    pub inserted: u64,
    /// Records skipped because their primary key was already present.
    pub existing: usize,
    pub deleted: u64,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Entities that must be exported first, beyond schema relations.
    fn depends_on(&self) -> Vec<EntityName> {
        Vec::new()
    }

    fn anonymises(&self) -> bool {
        true
    }

    /// Whether import clears the target table first.
    fn replaces_existing(&self) -> bool {
        false
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        referential_selection(ctx, entity)
    }

    /// Select and anonymise this strategy's records without writing them.
    async fn collect(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Vec<Record>> {
        let selection = self.selection(ctx, entity).await?;
        let rows = ctx.backend.select_rows(entity, &selection).await?;
        ctx.records_from_rows(entity, self.name(), rows, self.anonymises())
    }

    async fn export(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
        no_update: bool,
    ) -> Result<ExportOutcome> {
        ctx.claim_name(&entity.name, self.name())?;
        let path = ctx.layout.strategy_file(&entity.name, self.name());
        if no_update && is_populated(&path) {
            debug!(entity = %entity.name, strategy = self.name(), "keeping existing export");
            return Ok(ExportOutcome {
                skipped: true,
                ..ExportOutcome::default()
            });
        }

        let records = self.collect(ctx, entity).await?;
        if records.is_empty() {
            warn!(entity = %entity.name, strategy = self.name(), "strategy selected no rows");
        }

        let bytes = write_records(&path, &records)?;
        ctx.invalidate(&entity.name);

        Ok(ExportOutcome {
            rows: Some(records.len()),
            bytes,
            skipped: false,
        })
    }

    async fn import(&self, ctx: &ImportContext<'_>, entity: &EntityType) -> Result<ImportOutcome> {
        merge_records(ctx, entity, self.name()).await
    }
}

/// Rows whose relations all point at null or at parents already exported.
///
/// Self references are not restricted.
pub fn referential_selection(
    ctx: &mut ExportContext<'_>,
    entity: &EntityType,
) -> Result<Selection> {
    let mut selection = Selection::default();
    for relation in entity.parent_relations() {
        let keys = ctx.exported(&relation.target)?;
        selection.conditions.push(Condition::NullOrIn {
            field: relation.field.clone(),
            keys,
        });
    }
    Ok(selection)
}

/// Insert the records of one strategy file whose keys are not yet present.
pub async fn merge_records(
    ctx: &ImportContext<'_>,
    entity: &EntityType,
    strategy: &str,
) -> Result<ImportOutcome> {
    let path = ctx.layout.strategy_file(&entity.name, strategy);
    if !path.exists() {
        warn!(entity = %entity.name, strategy, "no exported file; nothing to import");
        return Ok(ImportOutcome {
            missing: true,
            ..ImportOutcome::default()
        });
    }

    let rows: Vec<Row> = read_records(&path)?
        .into_iter()
        .map(|record| record_to_row(entity, record))
        .collect();
    let keys: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get(&entity.primary_key).cloned())
        .collect();
    let present = ctx.backend.existing_primary_keys(entity, &keys).await?;

    let total = rows.len();
    let fresh: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            row.get(&entity.primary_key)
                .is_some_and(|key| !present.contains(&PkKey::from(key)))
        })
        .collect();
    let inserted = ctx.backend.insert_rows(entity, &fresh).await?;

    Ok(ImportOutcome {
        missing: false,
        inserted,
        existing: total - fresh.len(),
        deleted: 0,
    })
}

fn row_to_record(entity: &EntityType, mut row: Row) -> Result<Record> {
    let primary_key = row.remove(&entity.primary_key).ok_or_else(|| {
        TransferError::Backend(format!(
            "row of {} has no primary key column '{}'",
            entity.name, entity.primary_key
        ))
    })?;
    Ok(Record {
        entity: entity.name.label(),
        primary_key,
        field_map: row,
    })
}

fn record_to_row(entity: &EntityType, record: Record) -> Row {
    let mut row = record.field_map;
    row.insert(entity.primary_key.clone(), record.primary_key);
    row
}
