use sqlx::PgPool;

use devseed_core::{EntityCatalog, Result};

use crate::adapter::{Adapter, IntrospectedCatalog};
use crate::options::IntrospectOptions;

mod mapper;
mod queries;

/// Adapter for PostgreSQL databases.
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    /// Create a new adapter using a pre-configured pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Adapter for PostgresAdapter {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn introspect(&self, opts: &IntrospectOptions) -> Result<IntrospectedCatalog> {
        introspect_catalog(&self.pool, opts).await
    }
}

/// Introspect a Postgres database into an entity catalog.
pub async fn introspect_catalog(
    pool: &PgPool,
    opts: &IntrospectOptions,
) -> Result<IntrospectedCatalog> {
    let schemas = mapper::filter_schemas(queries::list_schemas(pool).await?, opts);

    let mut catalog = EntityCatalog::default();
    let mut skipped = Vec::new();

    for schema in schemas {
        let rows = mapper::SchemaRows {
            tables: queries::list_tables_in_schema(pool, &schema).await?,
            primary_keys: queries::list_primary_keys(pool, &schema).await?,
            columns: queries::list_columns(pool, &schema).await?,
            foreign_keys: queries::list_foreign_keys(pool, &schema).await?,
        };

        let (entities, schema_skipped) = mapper::map_entities(&schema, rows, opts);
        for entity in entities {
            catalog.insert(entity);
        }
        skipped.extend(schema_skipped);
    }

    Ok(IntrospectedCatalog { catalog, skipped })
}
