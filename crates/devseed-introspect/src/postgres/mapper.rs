use std::collections::{BTreeMap, BTreeSet};

use devseed_core::{EntityName, EntityType};

use crate::adapter::SkippedEntity;
use crate::options::IntrospectOptions;

use super::queries::{RawColumn, RawForeignKey, RawPrimaryKey};

pub fn filter_schemas(raw: Vec<String>, opts: &IntrospectOptions) -> Vec<String> {
    raw.into_iter()
        .filter(|schema| {
            let is_system = schema.starts_with("pg_") || schema == "information_schema";
            match &opts.schemas {
                Some(list) => list.iter().any(|item| item == schema),
                None => opts.include_system_schemas || !is_system,
            }
        })
        .collect()
}

pub fn is_excluded(schema: &str, table: &str, opts: &IntrospectOptions) -> bool {
    opts.exclude.iter().any(|label| match label.split_once('.') {
        Some((ex_schema, ex_table)) => ex_schema == schema && ex_table == table,
        None => label == table,
    })
}

/// Raw catalog rows of one schema.
pub struct SchemaRows {
    pub tables: Vec<String>,
    pub primary_keys: Vec<RawPrimaryKey>,
    pub columns: Vec<RawColumn>,
    pub foreign_keys: Vec<RawForeignKey>,
}

/// Turn one schema's tables into entity types.
///
/// Only single-column primary and foreign keys are representable; tables
/// without one are reported as skipped and multi-column foreign keys are
/// ignored.
pub fn map_entities(
    schema: &str,
    rows: SchemaRows,
    opts: &IntrospectOptions,
) -> (Vec<EntityType>, Vec<SkippedEntity>) {
    let primary_keys: BTreeMap<String, Vec<String>> = rows
        .primary_keys
        .into_iter()
        .map(|pk| (pk.table_name, pk.columns))
        .collect();

    let nullable: BTreeSet<(String, String)> = rows
        .columns
        .into_iter()
        .filter(|column| column.is_nullable)
        .map(|column| (column.table_name, column.name))
        .collect();

    let mut foreign_keys: BTreeMap<String, Vec<RawForeignKey>> = BTreeMap::new();
    for fk in rows.foreign_keys {
        foreign_keys.entry(fk.table_name.clone()).or_default().push(fk);
    }

    let mut entities = Vec::new();
    let mut skipped = Vec::new();

    for table in rows.tables {
        if is_excluded(schema, &table, opts) {
            continue;
        }

        let name = EntityName::new(schema, &table);
        let primary_key = match primary_keys.get(&table).map(Vec::as_slice) {
            Some([column]) => column.clone(),
            Some(_) => {
                skipped.push(SkippedEntity {
                    name,
                    reason: "composite primary key".to_string(),
                });
                continue;
            }
            None => {
                skipped.push(SkippedEntity {
                    name,
                    reason: "no primary key".to_string(),
                });
                continue;
            }
        };

        let mut entity = EntityType::new(name, primary_key);
        for fk in foreign_keys.remove(&table).unwrap_or_default() {
            if let [column] = fk.columns.as_slice() {
                let is_nullable = nullable.contains(&(table.clone(), column.clone()));
                entity = entity.with_relation(
                    column.clone(),
                    EntityName::new(fk.referenced_schema, fk.referenced_table),
                    is_nullable,
                );
            }
        }

        entities.push(entity);
    }

    (entities, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table: &str, name: &str, is_nullable: bool) -> RawColumn {
        RawColumn {
            table_name: table.to_string(),
            name: name.to_string(),
            is_nullable,
        }
    }

    #[test]
    fn maps_single_column_keys_and_skips_the_rest() {
        let rows = SchemaRows {
            tables: vec![
                "photos".to_string(),
                "tags".to_string(),
                "users".to_string(),
                "schema_migrations".to_string(),
            ],
            primary_keys: vec![
                RawPrimaryKey {
                    table_name: "photos".to_string(),
                    columns: vec!["id".to_string()],
                },
                RawPrimaryKey {
                    table_name: "tags".to_string(),
                    columns: vec!["photo_id".to_string(), "label".to_string()],
                },
                RawPrimaryKey {
                    table_name: "users".to_string(),
                    columns: vec!["id".to_string()],
                },
            ],
            columns: vec![
                column("photos", "id", false),
                column("photos", "user_id", true),
                column("users", "id", false),
            ],
            foreign_keys: vec![RawForeignKey {
                table_name: "photos".to_string(),
                name: "photos_user_id_fkey".to_string(),
                columns: vec!["user_id".to_string()],
                referenced_schema: "public".to_string(),
                referenced_table: "users".to_string(),
            }],
        };
        let opts = IntrospectOptions::default().excluding("schema_migrations");

        let (entities, skipped) = map_entities("public", rows, &opts);

        let labels: Vec<String> = entities.iter().map(|e| e.name.label()).collect();
        assert_eq!(labels, vec!["public.photos", "public.users"]);
        let photo_user = entities[0].relation("user_id").expect("relation");
        assert_eq!(photo_user.target, EntityName::new("public", "users"));
        assert!(photo_user.nullable);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name.label(), "public.tags");
    }
}
