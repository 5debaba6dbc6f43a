use async_trait::async_trait;

use devseed_core::{EntityName, EntityType, Record};

use super::{ExportContext, ExportOutcome, ImportContext, ImportOutcome, Strategy};
use crate::backend::Selection;
use crate::errors::Result;

/// Import layer that empties the target table before merging.
///
/// Meant for tables the backend fills on its own while the schema is
/// applied; every row of the entity is deleted, including rows loaded by an
/// earlier strategy of the same entity.
pub struct DeleteFirst {
    inner: Box<dyn Strategy>,
}

impl DeleteFirst {
    pub fn new(inner: Box<dyn Strategy>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Strategy for DeleteFirst {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn depends_on(&self) -> Vec<EntityName> {
        self.inner.depends_on()
    }

    fn anonymises(&self) -> bool {
        self.inner.anonymises()
    }

    fn replaces_existing(&self) -> bool {
        true
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        self.inner.selection(ctx, entity).await
    }

    async fn collect(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Vec<Record>> {
        self.inner.collect(ctx, entity).await
    }

    async fn export(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
        no_update: bool,
    ) -> Result<ExportOutcome> {
        self.inner.export(ctx, entity, no_update).await
    }

    async fn import(&self, ctx: &ImportContext<'_>, entity: &EntityType) -> Result<ImportOutcome> {
        let deleted = ctx.backend.delete_all(entity).await?;
        let outcome = self.inner.import(ctx, entity).await?;
        Ok(ImportOutcome { deleted, ..outcome })
    }
}
