//! Export and import runs over a backend and a snapshot directory.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use devseed_core::{
    EntityCatalog, EntityName, MigrationRecord, SnapshotLayout, is_populated, read_json_list,
    resolve_order, write_json_list,
};

use crate::backend::Backend;
use crate::config::Config;
use crate::errors::{Result, TransferError};
use crate::report::{Direction, ExtraReport, StrategyReport, TransferReport};
use crate::reset::{Confirm, ResetMode, ResetOrchestrator};
use crate::strategy::{ExportContext, ExportOutcome, ImportContext, Strategy, StrategyRegistry};
use crate::worker::{ExportRequest, RequestHandler, WorkerClient};

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Restrict the run to these entities; empty means all of them.
    pub only: Vec<EntityName>,
    /// Keep strategy files that already hold records.
    pub no_update: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub reset_mode: ResetMode,
    /// SQL applied after the reset and before any data is loaded.
    pub schema_script: Option<String>,
}

/// A strategy bound to the entity it runs for.
pub type Step = (EntityName, Box<dyn Strategy>);

/// Runs exports and imports for one configuration.
pub struct Transfer<'a> {
    config: &'a Config,
    registry: &'a StrategyRegistry,
}

impl<'a> Transfer<'a> {
    pub fn new(config: &'a Config, registry: &'a StrategyRegistry) -> Self {
        Self { config, registry }
    }

    /// Fail when an entity in scope has no strategy configured.
    pub fn check_strategies<'n>(
        &self,
        entities: impl IntoIterator<Item = &'n EntityName>,
        only: &[EntityName],
    ) -> Result<()> {
        let missing: Vec<String> = entities
            .into_iter()
            .filter(|entity| only.is_empty() || only.contains(entity))
            .filter(|entity| self.config.strategies_for(entity).is_none())
            .map(|entity| format!("  * {entity}"))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(TransferError::configuration(format!(
            "found entities without strategies:\n{}",
            missing.join("\n")
        )))
    }

    /// Every configured strategy of the catalog, in dependency order.
    pub fn plan(&self, catalog: &EntityCatalog, only: &[EntityName]) -> Result<Vec<Step>> {
        for entity in only {
            if !catalog.contains(entity) {
                return Err(TransferError::configuration(format!(
                    "unknown entity '{entity}'"
                )));
            }
        }
        self.check_strategies(catalog.names(), only)?;

        for entity in self.config.entities.keys() {
            if !catalog.contains(entity) {
                warn!(entity = %entity, "configured entity not found in the catalog");
            }
        }

        let mut plan = Vec::new();
        for entity in catalog.names() {
            let Some(configs) = self.config.strategies_for(entity) else {
                continue;
            };
            let strategies = configs
                .iter()
                .map(|config| self.registry.build(config))
                .collect::<Result<Vec<_>>>()?;
            plan.push((entity.clone(), strategies));
        }

        Ok(resolve_order(catalog, plan, |strategy| strategy.depends_on())?)
    }

    /// Write a snapshot of `backend` under `root`.
    ///
    /// With a worker, strategy files are produced by the worker process while
    /// this side keeps the no-update check, name claims and file placement.
    pub async fn export(
        &self,
        backend: &dyn Backend,
        root: &Path,
        options: &ExportOptions,
        mut worker: Option<&mut WorkerClient>,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::start(Direction::Export);
        info!(
            event = "export_started",
            run_id = %report.run_id,
            source = %backend.describe_target(),
            destination = %root.display(),
            "export started"
        );

        let catalog = backend.catalog().await?;
        let steps = self.plan(&catalog, &options.only)?;
        let anonymiser = self.config.anonymiser()?;
        anonymiser.validate(&catalog)?;
        let extras = self.config.extras()?;

        let layout = SnapshotLayout::new(root);
        let history = backend
            .migration_history(&self.config.migration_table)
            .await?;
        write_json_list(&layout.migrations_file(), &history)?;
        report.migrations = history.len();

        let mut ctx = ExportContext::new(backend, &catalog, layout.clone(), anonymiser);
        for (name, strategy) in steps {
            if !options.only.is_empty() && !options.only.contains(&name) {
                continue;
            }
            let Some(entity) = catalog.get(&name) else {
                continue;
            };

            if self.config.is_auto_populated(&name) && !strategy.replaces_existing() {
                warn!(
                    entity = %name,
                    strategy = strategy.name(),
                    "the backend fills this entity by itself; import may conflict unless the strategy sets delete_first"
                );
            }

            let outcome = match worker.as_deref_mut() {
                Some(client) => {
                    export_through_worker(
                        client,
                        &mut ctx,
                        &name,
                        strategy.as_ref(),
                        options.no_update,
                    )
                    .await
                }
                None => strategy.export(&mut ctx, entity, options.no_update).await,
            }
            .map_err(|err| TransferError::export(&name, strategy.name(), err))?;

            info!(
                event = "strategy_exported",
                entity = %name,
                strategy = strategy.name(),
                rows = ?outcome.rows,
                bytes = outcome.bytes,
                skipped = outcome.skipped,
                "strategy exported"
            );
            report
                .strategies
                .push(StrategyReport::exported(&name, strategy.name(), outcome));
        }

        for extra in extras {
            let outcome = extra.export(backend, &layout, options.no_update).await?;
            info!(
                event = "extra_exported",
                extra = extra.name(),
                items = outcome.items,
                "extra exported"
            );
            report.extras.push(ExtraReport::new(extra.name(), outcome));
        }

        report.finish();
        info!(
            event = "export_finished",
            run_id = %report.run_id,
            strategies = report.strategies.len(),
            rows = report.total_rows(),
            duration_ms = report.duration_ms,
            "export finished"
        );
        Ok(report)
    }

    /// Reset `backend` and load the snapshot under `root` into it.
    ///
    /// A failure after the reset leaves the target partially loaded.
    pub async fn import(
        &self,
        backend: &dyn Backend,
        root: &Path,
        options: &ImportOptions,
        confirm: &dyn Confirm,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::start(Direction::Import);
        info!(
            event = "import_started",
            run_id = %report.run_id,
            source = %root.display(),
            target = %backend.describe_target(),
            reset_mode = %options.reset_mode,
            "import started"
        );

        let layout = SnapshotLayout::new(root);
        let migrations_file = layout.migrations_file();
        if !migrations_file.exists() {
            return Err(TransferError::configuration(format!(
                "{} is not a snapshot: {} is missing",
                root.display(),
                migrations_file.display()
            )));
        }
        let migrations: Vec<MigrationRecord> = read_json_list(&migrations_file)?;
        let exported = layout.entities()?;
        self.check_strategies(&exported, &[])?;
        let extras = self.config.extras()?;

        let existing = backend.table_names().await?;
        let mut orchestrator = ResetOrchestrator::new();
        let managed = self.managed_tables(&exported, &existing);
        orchestrator
            .reset(options.reset_mode, backend, &managed, confirm)
            .await?;

        if let Some(script) = &options.schema_script {
            backend.apply_schema(script).await?;
            info!(event = "schema_applied", bytes = script.len(), "schema applied");
        }

        let catalog = backend.catalog().await?;
        let absent: Vec<String> = exported
            .iter()
            .filter(|entity| !catalog.contains(entity))
            .map(|entity| format!("  * {entity}"))
            .collect();
        if !absent.is_empty() {
            return Err(TransferError::configuration(format!(
                "the target has no table for these snapshot entities \
                 (apply the schema first or pass a schema script):\n{}",
                absent.join("\n")
            )));
        }
        let steps = self.plan(&catalog, &[])?;

        if !migrations.is_empty() {
            backend
                .record_migrations(&self.config.migration_table, &migrations)
                .await?;
        }
        report.migrations = migrations.len();

        let ctx = ImportContext {
            backend,
            layout: layout.clone(),
        };
        for (name, strategy) in steps {
            let Some(entity) = catalog.get(&name) else {
                continue;
            };
            let outcome = strategy
                .import(&ctx, entity)
                .await
                .map_err(|err| TransferError::import(&name, strategy.name(), err))?;

            info!(
                event = "strategy_imported",
                entity = %name,
                strategy = strategy.name(),
                inserted = outcome.inserted,
                existing = outcome.existing,
                deleted = outcome.deleted,
                "strategy imported"
            );
            report
                .strategies
                .push(StrategyReport::imported(&name, strategy.name(), outcome));
        }

        for extra in extras {
            let outcome = extra.import(backend, &layout).await?;
            info!(
                event = "extra_imported",
                extra = extra.name(),
                items = outcome.items,
                "extra imported"
            );
            report.extras.push(ExtraReport::new(extra.name(), outcome));
        }

        for entity in catalog.iter() {
            backend.reset_identity_counters(entity).await?;
        }

        report.finish();
        info!(
            event = "import_finished",
            run_id = %report.run_id,
            strategies = report.strategies.len(),
            rows = report.total_rows(),
            duration_ms = report.duration_ms,
            "import finished"
        );
        Ok(report)
    }

    /// Tables removed by a `drop-tables` reset: everything the target holds,
    /// plus every snapshot or configured entity, with the migration table last.
    pub fn managed_tables(&self, exported: &[EntityName], existing: &[String]) -> Vec<String> {
        let mut tables: BTreeSet<String> = existing.iter().cloned().collect();
        tables.extend(exported.iter().map(EntityName::label));
        tables.extend(self.config.entities.keys().map(EntityName::label));
        tables.remove(&self.config.migration_table);

        let mut tables: Vec<String> = tables.into_iter().collect();
        tables.push(self.config.migration_table.clone());
        tables
    }

    /// Request handler for the worker side of an out-of-process export.
    pub fn worker<'b>(
        &self,
        backend: &'b dyn Backend,
        catalog: &'b EntityCatalog,
    ) -> Result<StrategyWorker<'b>> {
        let anonymiser = self.config.anonymiser()?;
        anonymiser.validate(catalog)?;

        let mut strategies = HashMap::new();
        for entity in catalog.names() {
            let Some(configs) = self.config.strategies_for(entity) else {
                continue;
            };
            for config in configs.iter() {
                strategies.insert(
                    (entity.clone(), config.name.clone()),
                    self.registry.build(config)?,
                );
            }
        }

        Ok(StrategyWorker {
            catalog,
            ctx: ExportContext::new(backend, catalog, SnapshotLayout::new(""), anonymiser),
            strategies,
        })
    }
}

async fn export_through_worker(
    client: &mut WorkerClient,
    ctx: &mut ExportContext<'_>,
    entity: &EntityName,
    strategy: &dyn Strategy,
    no_update: bool,
) -> Result<ExportOutcome> {
    ctx.claim_name(entity, strategy.name())?;
    let path = ctx.layout.strategy_file(entity, strategy.name());
    if no_update && is_populated(&path) {
        debug!(entity = %entity, strategy = strategy.name(), "keeping existing export");
        return Ok(ExportOutcome {
            skipped: true,
            ..ExportOutcome::default()
        });
    }

    let request = ExportRequest {
        entity: entity.clone(),
        strategy: strategy.name().to_string(),
        destination: ctx.layout.root().to_path_buf(),
    };
    let bytes = client.export(&request, &path).await?;
    ctx.invalidate(entity);

    Ok(ExportOutcome {
        rows: None,
        bytes,
        skipped: false,
    })
}

/// Serves export requests by running configured strategies in-process.
pub struct StrategyWorker<'a> {
    catalog: &'a EntityCatalog,
    ctx: ExportContext<'a>,
    strategies: HashMap<(EntityName, String), Box<dyn Strategy>>,
}

#[async_trait]
impl RequestHandler for StrategyWorker<'_> {
    async fn handle(&mut self, request: ExportRequest) -> Result<Vec<u8>> {
        let catalog = self.catalog;
        let entity = catalog.get(&request.entity).ok_or_else(|| {
            TransferError::configuration(format!("unknown entity '{}'", request.entity))
        })?;
        let strategy = self
            .strategies
            .get(&(request.entity.clone(), request.strategy.clone()))
            .ok_or_else(|| {
                TransferError::configuration(format!(
                    "no strategy '{}' configured for {}",
                    request.strategy, request.entity
                ))
            })?;

        if self.ctx.layout.root() != request.destination.as_path() {
            self.ctx.layout = SnapshotLayout::new(&request.destination);
        }

        let records = strategy
            .collect(&mut self.ctx, entity)
            .await
            .map_err(|err| TransferError::export(&request.entity, &request.strategy, err))?;
        if records.is_empty() {
            warn!(
                entity = %request.entity,
                strategy = %request.strategy,
                "strategy selected no rows"
            );
        }

        // The parent writes this entity's file after the response arrives.
        self.ctx.invalidate(&request.entity);
        Ok(serde_json::to_vec_pretty(&records)?)
    }
}
