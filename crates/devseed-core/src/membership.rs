use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::catalog::EntityName;
use crate::error::Result;
use crate::snapshot::{SnapshotLayout, read_records};

/// Canonical text form of a primary-key value used for membership checks.
///
/// Strings are taken verbatim and other scalars use their JSON rendering, so
/// `7` and `"7"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PkKey(String);

impl PkKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Value> for PkKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(text) => PkKey(text.clone()),
            other => PkKey(other.to_string()),
        }
    }
}

impl fmt::Display for PkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary keys written for one entity across all of its strategy files.
#[derive(Debug, Clone, Default)]
pub struct ExportedKeys {
    keys: BTreeSet<PkKey>,
    values: Vec<Value>,
}

impl ExportedKeys {
    pub fn contains(&self, value: &Value) -> bool {
        self.keys.contains(&PkKey::from(value))
    }

    pub fn keys(&self) -> &BTreeSet<PkKey> {
        &self.keys
    }

    /// Original key values in file order, without duplicates.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn push(&mut self, value: Value) {
        if self.keys.insert(PkKey::from(&value)) {
            self.values.push(value);
        }
    }
}

impl FromIterator<Value> for ExportedKeys {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut exported = ExportedKeys::default();
        for value in iter {
            exported.push(value);
        }
        exported
    }
}

/// Per-run cache of exported primary keys, keyed by snapshot root and entity.
#[derive(Debug, Default)]
pub struct MembershipIndex {
    cache: HashMap<(PathBuf, EntityName), Arc<ExportedKeys>>,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys exported so far for `entity` under `root`.
    ///
    /// A missing entity directory yields an empty set.
    pub fn exported(&mut self, root: &Path, entity: &EntityName) -> Result<Arc<ExportedKeys>> {
        let cache_key = (root.to_path_buf(), entity.clone());
        if let Some(keys) = self.cache.get(&cache_key) {
            return Ok(Arc::clone(keys));
        }

        let keys = Arc::new(load_exported(root, entity)?);
        self.cache.insert(cache_key, Arc::clone(&keys));
        Ok(keys)
    }

    /// Forget the cached keys of `entity`; called after one of its files changes.
    pub fn invalidate(&mut self, root: &Path, entity: &EntityName) {
        self.cache.remove(&(root.to_path_buf(), entity.clone()));
    }
}

fn load_exported(root: &Path, entity: &EntityName) -> Result<ExportedKeys> {
    let mut exported = ExportedKeys::default();
    for file in SnapshotLayout::new(root).strategy_files(entity)? {
        for record in read_records(&file)? {
            exported.push(record.primary_key);
        }
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::snapshot::{Record, write_records};

    fn record(pk: Value) -> Record {
        Record {
            entity: "auth.users".to_string(),
            primary_key: pk,
            field_map: Map::new(),
        }
    }

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "devseed_membership_{label}_{}",
            std::process::id()
        ))
    }

    #[test]
    fn unions_every_strategy_file() {
        let root = temp_root("union");
        let users = EntityName::new("auth", "users");
        let layout = SnapshotLayout::new(&root);
        write_records(
            &layout.strategy_file(&users, "internal"),
            &[record(json!(101))],
        )
        .expect("write internal");
        write_records(
            &layout.strategy_file(&users, "sample"),
            &[record(json!(102)), record(json!(101))],
        )
        .expect("write sample");

        let mut index = MembershipIndex::new();
        let keys = index.exported(&root, &users).expect("load keys");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&json!(101)));
        assert!(keys.contains(&json!("102")));
        assert!(!keys.contains(&json!(103)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_entity_is_empty_and_invalidation_reloads() {
        let root = temp_root("reload");
        let users = EntityName::new("auth", "users");
        let mut index = MembershipIndex::new();
        assert!(index.exported(&root, &users).expect("empty").is_empty());

        write_records(
            &SnapshotLayout::new(&root).strategy_file(&users, "default"),
            &[record(json!(1))],
        )
        .expect("write");
        assert!(index.exported(&root, &users).expect("cached").is_empty());

        index.invalidate(&root, &users);
        assert_eq!(index.exported(&root, &users).expect("reloaded").len(), 1);
        let _ = std::fs::remove_dir_all(&root);
    }
}
