use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use devseed_core::{EntityName, EntityType, ExportedKeys, Record, read_records};

use super::{ExportContext, Strategy, referential_selection};
use crate::backend::{Condition, Ordering, Selection};
use crate::errors::{Result, TransferError};

/// Settings every configurable strategy carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyBase {
    pub name: String,
    pub anonymise: bool,
    pub depends_on: Vec<EntityName>,
}

impl StrategyBase {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            anonymise: true,
            depends_on: Vec::new(),
        }
    }
}

/// Every row passing the referential filter.
#[derive(Debug, Clone)]
pub struct All {
    pub base: StrategyBase,
}

#[async_trait]
impl Strategy for All {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn depends_on(&self) -> Vec<EntityName> {
        self.base.depends_on.clone()
    }

    fn anonymises(&self) -> bool {
        self.base.anonymise
    }
}

/// Rows with the given primary keys.
#[derive(Debug, Clone)]
pub struct Exact {
    pub base: StrategyBase,
    pub primary_keys: Arc<ExportedKeys>,
}

impl Exact {
    pub fn new(base: StrategyBase, primary_keys: impl IntoIterator<Item = Value>) -> Self {
        Self {
            base,
            primary_keys: Arc::new(primary_keys.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Strategy for Exact {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn depends_on(&self) -> Vec<EntityName> {
        self.base.depends_on.clone()
    }

    fn anonymises(&self) -> bool {
        self.base.anonymise
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        Ok(referential_selection(ctx, entity)?.with(Condition::In {
            field: entity.primary_key.clone(),
            keys: Arc::clone(&self.primary_keys),
        }))
    }
}

/// A pseudo-random sample of `count` rows.
#[derive(Debug, Clone)]
pub struct Random {
    pub base: StrategyBase,
    pub count: usize,
}

#[async_trait]
impl Strategy for Random {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn depends_on(&self) -> Vec<EntityName> {
        self.base.depends_on.clone()
    }

    fn anonymises(&self) -> bool {
        self.base.anonymise
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        let mut selection = referential_selection(ctx, entity)?;
        selection.order = Some(Ordering::Random);
        selection.limit = Some(self.count);
        Ok(selection)
    }
}

/// The `count` rows with the highest `order_by` value (primary key by default).
#[derive(Debug, Clone)]
pub struct Latest {
    pub base: StrategyBase,
    pub count: usize,
    pub order_by: Option<String>,
}

#[async_trait]
impl Strategy for Latest {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn depends_on(&self) -> Vec<EntityName> {
        self.base.depends_on.clone()
    }

    fn anonymises(&self) -> bool {
        self.base.anonymise
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        let field = self
            .order_by
            .clone()
            .unwrap_or_else(|| entity.primary_key.clone());
        let mut selection = referential_selection(ctx, entity)?;
        selection.order = Some(Ordering::Descending(field));
        selection.limit = Some(self.count);
        Ok(selection)
    }
}

/// Rows reached backwards from a parent that is exported first.
///
/// `field` on this entity must hold one of the values of `parent_field`
/// (the parent's primary key by default) across the parent's exported
/// records. Meant for references the schema does not declare: a charge is
/// exported only if an exported order carries its id.
#[derive(Debug, Clone)]
pub struct Reverse {
    pub base: StrategyBase,
    pub parent: EntityName,
    pub parent_field: Option<String>,
    pub field: String,
}

impl Reverse {
    fn reached_values(&self, ctx: &mut ExportContext<'_>) -> Result<Arc<ExportedKeys>> {
        let parent_pk = ctx
            .catalog
            .get(&self.parent)
            .map(|parent| parent.primary_key.clone());
        let parent_field = match &self.parent_field {
            Some(field) if parent_pk.as_ref() != Some(field) => field.clone(),
            _ => return ctx.exported(&self.parent),
        };

        let mut values = Vec::new();
        for file in ctx.layout.strategy_files(&self.parent)? {
            let records: Vec<Record> = read_records(&file)?;
            values.extend(
                records
                    .into_iter()
                    .filter_map(|mut record| record.field_map.remove(&parent_field))
                    .filter(|value| !value.is_null()),
            );
        }
        Ok(Arc::new(values.into_iter().collect()))
    }
}

#[async_trait]
impl Strategy for Reverse {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn depends_on(&self) -> Vec<EntityName> {
        let mut deps = self.base.depends_on.clone();
        if !deps.contains(&self.parent) {
            deps.push(self.parent.clone());
        }
        deps
    }

    fn anonymises(&self) -> bool {
        self.base.anonymise
    }

    async fn selection(
        &self,
        ctx: &mut ExportContext<'_>,
        entity: &EntityType,
    ) -> Result<Selection> {
        let keys = self.reached_values(ctx)?;
        Ok(referential_selection(ctx, entity)?.with(Condition::In {
            field: self.field.clone(),
            keys,
        }))
    }
}

/// Always fails on export; used to exercise error propagation.
#[derive(Debug, Clone)]
pub struct Failing {
    pub name: String,
}

#[async_trait]
impl Strategy for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(
        &self,
        _ctx: &mut ExportContext<'_>,
        _entity: &EntityType,
    ) -> Result<Vec<Record>> {
        Err(TransferError::StrategyFailed(
            "this strategy always fails".to_string(),
        ))
    }
}
