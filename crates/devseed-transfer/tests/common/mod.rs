#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::Value;

use devseed_core::{EntityCatalog, EntityName, EntityType, SnapshotLayout, read_records};
use devseed_transfer::{Config, Row, StrategyRegistry, Transfer};

pub fn name(label: &str) -> EntityName {
    label.parse().expect("valid entity label")
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn temp_root(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("devseed_{label}_{}", uuid::Uuid::new_v4()))
}

pub fn config(toml: &str) -> Config {
    Config::from_toml_str(toml).expect("valid config")
}

pub fn transfer<'a>(config: &'a Config, registry: &'a StrategyRegistry) -> Transfer<'a> {
    Transfer::new(config, registry)
}

/// Primary keys written to one strategy file, in file order.
pub fn exported_keys(root: &Path, entity: &str, strategy: &str) -> Vec<Value> {
    let path = SnapshotLayout::new(root).strategy_file(&name(entity), strategy);
    read_records(&path)
        .expect("strategy file")
        .into_iter()
        .map(|record| record.primary_key)
        .collect()
}

/// Users, their photos and a self-referencing turtle stack.
pub fn photofeed_catalog() -> EntityCatalog {
    EntityCatalog::new([
        EntityType::new(name("auth.users"), "id"),
        EntityType::new(name("photos.photo"), "id")
            .with_relation("owner_id", name("auth.users"), true)
            .with_relation("parent_id", name("photos.photo"), true),
        EntityType::new(name("turtles.turtle"), "id")
            .with_relation("standing_on_id", name("turtles.turtle"), true),
    ])
}

pub fn cleanup(root: &Path) {
    let _ = std::fs::remove_dir_all(root);
}
