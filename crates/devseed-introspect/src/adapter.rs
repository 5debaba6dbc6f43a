use async_trait::async_trait;

use devseed_core::{EntityCatalog, EntityName, Result};

use crate::options::IntrospectOptions;

/// A table that exists in the database but cannot take part in transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    pub name: EntityName,
    pub reason: String,
}

/// Catalog built from a live database, plus what had to be left out.
#[derive(Debug, Clone, Default)]
pub struct IntrospectedCatalog {
    pub catalog: EntityCatalog,
    pub skipped: Vec<SkippedEntity>,
}

/// Trait implemented by database adapters that can describe their entities.
#[async_trait]
pub trait Adapter {
    /// Returns the engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Introspect the database and return its entity catalog.
    async fn introspect(&self, opts: &IntrospectOptions) -> Result<IntrospectedCatalog>;
}
