use devseed_core::{MigrationRecord, Record};
use schemars::schema_for;

fn main() {
    let records = schema_for!(Vec<Record>);
    let migrations = schema_for!(Vec<MigrationRecord>);
    let json = serde_json::json!({
        "entity_file": records,
        "migrations_file": migrations,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&json).expect("serialize json schema")
    );
}
