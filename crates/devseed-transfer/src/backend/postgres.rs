use std::collections::BTreeSet;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::warn;

use devseed_core::{
    EntityCatalog, EntityName, EntityType, ExportedKeys, MigrationRecord, PkKey,
    redact_connection_string,
};
use devseed_introspect::{IntrospectOptions, introspect_catalog};

use super::{Backend, Condition, Ordering, Row, Selection, SequenceState, ensure_simple_value};
use crate::errors::{Result, TransferError};

const MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Debug, sqlx::FromRow)]
struct RawSequence {
    schemaname: String,
    sequencename: String,
    data_type: String,
    start_value: i64,
    min_value: i64,
    max_value: i64,
    increment_by: i64,
    cycle: bool,
    cache_size: i64,
    last_value: Option<i64>,
}

/// Backend for a single PostgreSQL database.
///
/// The pool is swapped out when the database is dropped and recreated.
#[derive(Debug)]
pub struct PgBackend {
    options: PgConnectOptions,
    pool: RwLock<PgPool>,
    target: String,
    introspect: IntrospectOptions,
}

impl PgBackend {
    pub async fn connect(url: &str, introspect: IntrospectOptions) -> Result<Self> {
        let options: PgConnectOptions = url.parse()?;
        let pool = pool_options().connect_with(options.clone()).await?;
        let redacted = redact_connection_string(url);
        let target = match (redacted.database, redacted.host) {
            (Some(database), Some(host)) => format!("{database} on {host}"),
            _ => redacted.redacted,
        };

        Ok(Self {
            options,
            pool: RwLock::new(pool),
            target,
            introspect,
        })
    }

    fn pool(&self) -> PgPool {
        match self.pool.read() {
            Ok(pool) => pool.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_pool(&self, pool: PgPool) {
        match self.pool.write() {
            Ok(mut guard) => *guard = pool,
            Err(poisoned) => *poisoned.into_inner() = pool,
        }
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_entity(name: &EntityName) -> String {
    format!("{}.{}", quote_ident(name.namespace()), quote_ident(name.name()))
}

/// Quote a possibly schema-qualified table name.
fn quote_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn key_strings(keys: &ExportedKeys) -> Vec<String> {
    keys.keys().iter().map(|key| key.as_str().to_string()).collect()
}

fn push_selection(builder: &mut QueryBuilder<'_, Postgres>, selection: &Selection) {
    for (idx, condition) in selection.conditions.iter().enumerate() {
        builder.push(if idx == 0 { " WHERE " } else { " AND " });
        match condition {
            Condition::NullOrIn { field, keys } => {
                let column = quote_ident(field);
                builder.push(format!("(t.{column} IS NULL OR t.{column}::text = ANY("));
                builder.push_bind(key_strings(keys));
                builder.push("))");
            }
            Condition::In { field, keys } => {
                builder.push(format!("t.{}::text = ANY(", quote_ident(field)));
                builder.push_bind(key_strings(keys));
                builder.push(")");
            }
        }
    }

    match &selection.order {
        Some(Ordering::Random) => {
            builder.push(" ORDER BY random()");
        }
        Some(Ordering::Descending(field)) => {
            builder.push(format!(" ORDER BY t.{} DESC NULLS LAST", quote_ident(field)));
        }
        None => {}
    }

    if let Some(limit) = selection.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn describe_target(&self) -> String {
        self.target.clone()
    }

    async fn catalog(&self) -> Result<EntityCatalog> {
        let introspected = introspect_catalog(&self.pool(), &self.introspect).await?;
        for skipped in &introspected.skipped {
            warn!(entity = %skipped.name, reason = %skipped.reason, "table left out of catalog");
        }
        Ok(introspected.catalog)
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            select t.table_schema::text || '.' || t.table_name::text
            from information_schema.tables t
            where t.table_type = 'BASE TABLE'
              and t.table_schema not in ('pg_catalog', 'information_schema')
              and t.table_schema not like 'pg_toast%'
              and ($1::text[] is null or t.table_schema = any($1))
            order by 1
            "#,
        )
        .bind(self.introspect.schemas.clone())
        .fetch_all(&self.pool())
        .await?;
        Ok(names)
    }

    async fn select_rows(&self, entity: &EntityType, selection: &Selection) -> Result<Vec<Row>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT row_to_json(t)::text FROM ");
        builder.push(quote_entity(&entity.name));
        builder.push(" AS t");
        push_selection(&mut builder, selection);

        let rows: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&self.pool())
            .await?;

        rows.iter()
            .map(|text| serde_json::from_str::<Row>(text).map_err(TransferError::from))
            .collect()
    }

    async fn existing_primary_keys(
        &self,
        entity: &EntityType,
        keys: &[Value],
    ) -> Result<BTreeSet<PkKey>> {
        if keys.is_empty() {
            return Ok(BTreeSet::new());
        }

        let wanted: Vec<String> = keys
            .iter()
            .map(|key| PkKey::from(key).as_str().to_string())
            .collect();
        let column = quote_ident(&entity.primary_key);
        let sql = format!(
            "SELECT t.{column}::text FROM {} AS t WHERE t.{column}::text = ANY($1)",
            quote_entity(&entity.name)
        );
        let found: Vec<String> = sqlx::query_scalar(&sql)
            .bind(wanted)
            .fetch_all(&self.pool())
            .await?;

        Ok(found
            .into_iter()
            .map(|key| PkKey::from(&Value::String(key)))
            .collect())
    }

    async fn insert_rows(&self, entity: &EntityType, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let table = quote_entity(&entity.name);
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM json_populate_recordset(NULL::{table}, $1::json)"
        );
        let payload = serde_json::to_string(rows)?;
        let result = sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, entity: &EntityType) -> Result<u64> {
        let sql = format!("DELETE FROM {}", quote_entity(&entity.name));
        let result = sqlx::query(&sql).execute(&self.pool()).await?;
        Ok(result.rows_affected())
    }

    async fn migration_history(&self, table: &str) -> Result<Vec<MigrationRecord>> {
        let pool = self.pool();
        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(quote_table(table))
            .fetch_one(&pool)
            .await?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT app::text, name::text, applied::text FROM {} ORDER BY id ASC",
            quote_table(table)
        );
        let rows: Vec<(String, String, String)> = sqlx::query_as(&sql).fetch_all(&pool).await?;
        Ok(rows
            .into_iter()
            .map(|(app, name, applied)| MigrationRecord { app, name, applied })
            .collect())
    }

    async fn record_migrations(&self, table: &str, records: &[MigrationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let pool = self.pool();
        let table = quote_table(table);
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id serial PRIMARY KEY, \
             app varchar(255) NOT NULL, \
             name varchar(255) NOT NULL, \
             applied timestamptz NOT NULL)"
        );
        sqlx::query(&create).execute(&pool).await?;

        let insert =
            format!("INSERT INTO {table} (app, name, applied) VALUES ($1, $2, $3::timestamptz)");
        let mut tx = pool.begin().await?;
        for record in records {
            sqlx::query(&insert)
                .bind(&record.app)
                .bind(&record.name)
                .bind(&record.applied)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn apply_schema(&self, script: &str) -> Result<()> {
        sqlx::raw_sql(script).execute(&self.pool()).await?;
        Ok(())
    }

    async fn drop_store(&self) -> Result<()> {
        let database = self
            .options
            .get_database()
            .map(str::to_string)
            .ok_or_else(|| TransferError::configuration("connection string names no database"))?;

        self.pool().close().await;

        let admin = self.options.clone().database(MAINTENANCE_DATABASE);
        let mut conn = PgConnection::connect_with(&admin).await?;
        let quoted = quote_ident(&database);
        sqlx::query(&format!("DROP DATABASE IF EXISTS {quoted} WITH (FORCE)"))
            .execute(&mut conn)
            .await?;
        sqlx::query(&format!("CREATE DATABASE {quoted}"))
            .execute(&mut conn)
            .await?;
        conn.close().await?;

        let pool = pool_options().connect_with(self.options.clone()).await?;
        self.replace_pool(pool);
        Ok(())
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        let pool = self.pool();
        for table in tables {
            let sql = format!("DROP TABLE IF EXISTS {} CASCADE", quote_table(table));
            sqlx::query(&sql).execute(&pool).await?;
        }
        Ok(())
    }

    async fn list_sequences(&self) -> Result<Vec<SequenceState>> {
        let pool = self.pool();
        let raw = sqlx::query_as::<_, RawSequence>(
            r#"
            select
              s.schemaname::text as schemaname,
              s.sequencename::text as sequencename,
              s.data_type::text as data_type,
              s.start_value,
              s.min_value,
              s.max_value,
              s.increment_by,
              s.cycle,
              s.cache_size,
              s.last_value
            from pg_sequences s
            where s.schemaname not in ('pg_catalog', 'information_schema')
              and not exists (
                select 1
                from pg_class seq
                join pg_namespace n on n.oid = seq.relnamespace
                join pg_depend d
                  on d.objid = seq.oid
                 and d.classid = 'pg_class'::regclass
                 and d.refobjsubid > 0
                 and d.deptype in ('a', 'i')
                where seq.relkind = 'S'
                  and n.nspname = s.schemaname
                  and seq.relname = s.sequencename
              )
            order by s.schemaname, s.sequencename
            "#,
        )
        .fetch_all(&pool)
        .await?;

        let mut sequences = Vec::with_capacity(raw.len());
        for seq in raw {
            // Unused in this session: read the value straight from the relation.
            let last_value = match seq.last_value {
                Some(value) => value,
                None => {
                    let sql = format!(
                        "SELECT last_value FROM {}.{}",
                        quote_ident(&seq.schemaname),
                        quote_ident(&seq.sequencename)
                    );
                    sqlx::query_scalar::<_, i64>(&sql).fetch_one(&pool).await?
                }
            };

            sequences.push(SequenceState {
                schemaname: seq.schemaname,
                sequencename: seq.sequencename,
                data_type: seq.data_type,
                start_value: seq.start_value,
                min_value: seq.min_value,
                max_value: seq.max_value,
                increment_by: seq.increment_by,
                cycle: seq.cycle,
                cache_size: seq.cache_size,
                last_value: Some(last_value),
            });
        }

        Ok(sequences)
    }

    async fn drop_sequence(&self, name: &str) -> Result<()> {
        let sql = format!("DROP SEQUENCE IF EXISTS {}", quote_table(name));
        sqlx::query(&sql).execute(&self.pool()).await?;
        Ok(())
    }

    async fn create_sequence(&self, state: &SequenceState) -> Result<()> {
        let name = state.qualified_name()?;
        let data_type = ensure_simple_value("data_type", &state.data_type)?;
        let cycle = if state.cycle { "CYCLE" } else { "NO CYCLE" };
        let sql = format!(
            "CREATE SEQUENCE {} AS {data_type} INCREMENT BY {} MINVALUE {} MAXVALUE {} START {} CACHE {} {cycle}",
            quote_table(&name),
            state.increment_by,
            state.min_value,
            state.max_value,
            state.last_value.unwrap_or(state.start_value),
            state.cache_size,
        );
        sqlx::query(&sql).execute(&self.pool()).await?;
        Ok(())
    }

    async fn next_value(&self, name: &str) -> Result<i64> {
        let value = sqlx::query_scalar::<_, i64>("SELECT nextval($1::regclass)")
            .bind(quote_table(name))
            .fetch_one(&self.pool())
            .await?;
        Ok(value)
    }

    async fn reset_identity_counters(&self, entity: &EntityType) -> Result<()> {
        let pool = self.pool();
        let table = quote_entity(&entity.name);
        let sequence: Option<String> = sqlx::query_scalar("SELECT pg_get_serial_sequence($1, $2)")
            .bind(&table)
            .bind(&entity.primary_key)
            .fetch_one(&pool)
            .await?;
        let Some(sequence) = sequence else {
            return Ok(());
        };

        let column = quote_ident(&entity.primary_key);
        let sql = format!(
            "SELECT setval($1::regclass, coalesce(max({column}), 1), max({column}) IS NOT NULL) FROM {table}"
        );
        sqlx::query(&sql).bind(sequence).execute(&pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_qualified_tables() {
        assert_eq!(quote_table("schema_migrations"), "\"schema_migrations\"");
        assert_eq!(quote_table("public.schema_migrations"), "\"public\".\"schema_migrations\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn selection_renders_filters_order_and_limit() {
        let keys: ExportedKeys = [Value::from(101), Value::from(102)].into_iter().collect();
        let selection = Selection {
            conditions: vec![Condition::NullOrIn {
                field: "user_id".to_string(),
                keys: std::sync::Arc::new(keys),
            }],
            order: Some(Ordering::Descending("created".to_string())),
            limit: Some(10),
        };

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM t");
        push_selection(&mut builder, &selection);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM t WHERE (t.\"user_id\" IS NULL OR t.\"user_id\"::text = ANY($1)) \
             ORDER BY t.\"created\" DESC NULLS LAST LIMIT $2"
        );
    }
}
