//! Core contracts for devseed.
//!
//! This crate defines the entity catalog, the dependency resolver that orders
//! export and import, the on-disk snapshot layout and the index of primary keys
//! already written to a snapshot.

pub mod atomic;
pub mod catalog;
pub mod error;
pub mod graph;
pub mod membership;
pub mod redaction;
pub mod snapshot;

pub use atomic::{discard_temp, temp_path_for, write_bytes_atomic};
pub use catalog::{EntityCatalog, EntityName, EntityType, ManyToMany, RelationField};
pub use error::{Error, Result};
pub use graph::{entity_dependencies, resolve_order};
pub use membership::{ExportedKeys, MembershipIndex, PkKey};
pub use redaction::{RedactedConnection, redact_connection_string};
pub use snapshot::{
    MigrationRecord, Record, SnapshotLayout, is_populated, read_json_list, read_records,
    write_json_list, write_records,
};

/// Name of the file holding the migration history inside a snapshot.
pub const MIGRATIONS_FILE: &str = "migrations.json";
