//! Entity catalog introspection adapters.

pub mod adapter;
pub mod options;
pub mod postgres;

pub use adapter::{Adapter, IntrospectedCatalog, SkippedEntity};
pub use options::IntrospectOptions;
pub use postgres::{PostgresAdapter, introspect_catalog};

pub use devseed_core::EntityCatalog;
