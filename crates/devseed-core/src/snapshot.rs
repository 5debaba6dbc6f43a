use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MIGRATIONS_FILE;
use crate::atomic::write_bytes_atomic;
use crate::catalog::EntityName;
use crate::error::{Error, Result};

/// One serialized row: `{type, primary_key, field_map}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    /// Entity label (`namespace.name`).
    #[serde(rename = "type")]
    pub entity: String,
    pub primary_key: Value,
    pub field_map: Map<String, Value>,
}

/// One applied migration as recorded by the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationRecord {
    pub app: String,
    pub name: String,
    pub applied: String,
}

/// Paths of every artifact inside a snapshot root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, entity: &EntityName) -> PathBuf {
        self.root.join(entity.label())
    }

    pub fn strategy_file(&self, entity: &EntityName, strategy: &str) -> PathBuf {
        self.entity_dir(entity).join(format!("{strategy}.json"))
    }

    pub fn migrations_file(&self) -> PathBuf {
        self.root.join(MIGRATIONS_FILE)
    }

    pub fn extra_file(&self, extra: &str) -> PathBuf {
        self.root.join(format!("{extra}.json"))
    }

    /// Strategy files written for `entity`, sorted by name.
    ///
    /// Hidden files (in-flight temporaries) are ignored and a missing
    /// directory yields no files.
    pub fn strategy_files(&self, entity: &EntityName) -> Result<Vec<PathBuf>> {
        let dir = self.entity_dir(entity);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && !path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Entities with at least one strategy file, sorted by label.
    ///
    /// Directories whose name is not an entity label are ignored.
    pub fn entities(&self) -> Result<Vec<EntityName>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entities = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(entity) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<EntityName>().ok())
            else {
                continue;
            };
            if !self.strategy_files(&entity)?.is_empty() {
                entities.push(entity);
            }
        }
        entities.sort();
        Ok(entities)
    }
}

/// Decode a JSON array file, naming the file on failure.
pub fn read_json_list<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let contents = fs::read(path)?;
    serde_json::from_slice(&contents).map_err(|source| Error::InvalidSnapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode a list as pretty JSON and move it atomically into place.
pub fn write_json_list<T: Serialize>(path: &Path, items: &[T]) -> Result<u64> {
    let data = serde_json::to_vec_pretty(items)?;
    write_bytes_atomic(path, &data)
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    read_json_list(path)
}

pub fn write_records(path: &Path, records: &[Record]) -> Result<u64> {
    write_json_list(path, records)
}

/// True when `path` holds at least one record.
///
/// Used by `no_update` exports: empty files and `[]` are rewritten.
pub fn is_populated(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if metadata.len() == 0 {
        return false;
    }
    if metadata.len() > 16 {
        return true;
    }
    fs::read_to_string(path)
        .map(|contents| contents.trim() != "[]" && !contents.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_snapshot_contract() {
        let layout = SnapshotLayout::new("/tmp/snap");
        let entity = EntityName::new("auth", "users");

        assert_eq!(
            layout.strategy_file(&entity, "internal"),
            PathBuf::from("/tmp/snap/auth.users/internal.json")
        );
        assert_eq!(
            layout.migrations_file(),
            PathBuf::from("/tmp/snap/migrations.json")
        );
        assert_eq!(
            layout.extra_file("postgres-sequences"),
            PathBuf::from("/tmp/snap/postgres-sequences.json")
        );
    }

    #[test]
    fn record_uses_contract_field_names() {
        let mut field_map = Map::new();
        field_map.insert("username".to_string(), Value::from("alice"));
        let record = Record {
            entity: "auth.users".to_string(),
            primary_key: Value::from(7),
            field_map,
        };

        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json["type"], "auth.users");
        assert_eq!(json["primary_key"], 7);
        assert_eq!(json["field_map"]["username"], "alice");
    }
}
