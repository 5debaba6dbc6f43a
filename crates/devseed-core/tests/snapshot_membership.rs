use std::path::PathBuf;

use devseed_core::{MembershipIndex, Record, SnapshotLayout, is_populated, write_records};
use serde_json::{Map, json};

fn temp_root(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("devseed_core_{label}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp root");
    dir
}

#[test]
fn empty_files_do_not_count_as_populated() {
    let root = temp_root("populated");
    let layout = SnapshotLayout::new(&root);
    let users = "auth.users".parse().expect("label");
    let path = layout.strategy_file(&users, "default");

    assert!(!is_populated(&path));
    write_records(&path, &[]).expect("write empty");
    assert!(!is_populated(&path));

    let record = Record {
        entity: "auth.users".to_string(),
        primary_key: json!(1),
        field_map: Map::new(),
    };
    write_records(&path, &[record]).expect("write one");
    assert!(is_populated(&path));
}

#[test]
fn index_is_scoped_per_snapshot_root() {
    let first = temp_root("first");
    let second = temp_root("second");
    let users = "auth.users".parse().expect("label");

    let record = Record {
        entity: "auth.users".to_string(),
        primary_key: json!(5),
        field_map: Map::new(),
    };
    write_records(
        &SnapshotLayout::new(&first).strategy_file(&users, "default"),
        &[record],
    )
    .expect("write");

    let mut index = MembershipIndex::new();
    assert_eq!(index.exported(&first, &users).expect("first").len(), 1);
    assert!(index.exported(&second, &users).expect("second").is_empty());
}

#[test]
fn corrupt_file_is_named_in_error() {
    let root = temp_root("corrupt");
    let users = "auth.users".parse().expect("label");
    let path = SnapshotLayout::new(&root).strategy_file(&users, "broken");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, b"{not json").expect("write");

    let err = MembershipIndex::new()
        .exported(&root, &users)
        .expect_err("corrupt file");
    assert!(err.to_string().contains("broken.json"));
}
