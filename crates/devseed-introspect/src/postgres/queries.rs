use sqlx::PgPool;

use devseed_core::{Error, Result};

fn db_error(err: sqlx::Error) -> Error {
    Error::Db(err.to_string())
}

pub async fn list_schemas(pool: &PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        r#"
        select nspname::text
        from pg_namespace
        order by nspname
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(db_error)
}

pub async fn list_tables_in_schema(pool: &PgPool, schema: &str) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        r#"
        select c.relname::text
        from pg_class c
        join pg_namespace n on n.oid = c.relnamespace
        where n.nspname = $1
          and c.relkind in ('r', 'p')
          and not c.relispartition
        order by c.relname
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(db_error)
}

#[derive(Debug, sqlx::FromRow)]
pub struct RawPrimaryKey {
    pub table_name: String,
    pub columns: Vec<String>,
}

pub async fn list_primary_keys(pool: &PgPool, schema: &str) -> Result<Vec<RawPrimaryKey>> {
    sqlx::query_as::<_, RawPrimaryKey>(
        r#"
        select
          rel.relname::text as table_name,
          array_agg(att.attname::text order by ord.ordinality) as columns
        from pg_constraint con
        join pg_class rel on rel.oid = con.conrelid
        join pg_namespace nsp on nsp.oid = rel.relnamespace
        join unnest(con.conkey) with ordinality as ord(attnum, ordinality) on true
        join pg_attribute att on att.attrelid = rel.oid and att.attnum = ord.attnum
        where nsp.nspname = $1
          and con.contype = 'p'
        group by rel.relname
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(db_error)
}

#[derive(Debug, sqlx::FromRow)]
pub struct RawColumn {
    pub table_name: String,
    pub name: String,
    pub is_nullable: bool,
}

pub async fn list_columns(pool: &PgPool, schema: &str) -> Result<Vec<RawColumn>> {
    sqlx::query_as::<_, RawColumn>(
        r#"
        select
          c.relname::text as table_name,
          a.attname::text as name,
          (not a.attnotnull) as is_nullable
        from pg_attribute a
        join pg_class c on c.oid = a.attrelid
        join pg_namespace n on n.oid = c.relnamespace
        where n.nspname = $1
          and c.relkind in ('r', 'p')
          and a.attnum > 0
          and not a.attisdropped
        order by c.relname, a.attnum
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(db_error)
}

#[derive(Debug, sqlx::FromRow)]
pub struct RawForeignKey {
    pub table_name: String,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
}

pub async fn list_foreign_keys(pool: &PgPool, schema: &str) -> Result<Vec<RawForeignKey>> {
    sqlx::query_as::<_, RawForeignKey>(
        r#"
        select
          src_rel.relname::text as table_name,
          con.conname::text as name,
          array_agg(src_att.attname::text order by s_ord.ordinality) as columns,
          ref_nsp.nspname::text as referenced_schema,
          ref_rel.relname::text as referenced_table
        from pg_constraint con
        join pg_class src_rel on src_rel.oid = con.conrelid
        join pg_namespace src_nsp on src_nsp.oid = src_rel.relnamespace
        join pg_class ref_rel on ref_rel.oid = con.confrelid
        join pg_namespace ref_nsp on ref_nsp.oid = ref_rel.relnamespace
        join unnest(con.conkey) with ordinality as s_ord(attnum, ordinality) on true
        join pg_attribute src_att on src_att.attrelid = src_rel.oid and src_att.attnum = s_ord.attnum
        where src_nsp.nspname = $1
          and con.contype = 'f'
        group by src_rel.relname, con.conname, ref_nsp.nspname, ref_rel.relname
        order by src_rel.relname, con.conname
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(db_error)
}
