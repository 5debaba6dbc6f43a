//! Data that lives outside entity tables, exported next to them.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use devseed_core::SnapshotLayout;

use crate::backend::Backend;
use crate::errors::{Result, TransferError};

mod sequences;

pub use sequences::{DEFAULT_SEQUENCES_NAME, SequenceReplicator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtraOutcome {
    pub items: usize,
    pub skipped: bool,
}

/// Export/import pair writing `<root>/<name>.json`.
#[async_trait]
pub trait Extra: Send + Sync {
    fn name(&self) -> &str;

    async fn export(
        &self,
        backend: &dyn Backend,
        layout: &SnapshotLayout,
        no_update: bool,
    ) -> Result<ExtraOutcome>;

    async fn import(&self, backend: &dyn Backend, layout: &SnapshotLayout) -> Result<ExtraOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ExtraConfig {
    Sequences {
        #[serde(default)]
        name: Option<String>,
    },
}

impl ExtraConfig {
    pub fn build(&self) -> Box<dyn Extra> {
        match self {
            ExtraConfig::Sequences { name } => Box::new(SequenceReplicator::new(
                name.clone()
                    .unwrap_or_else(|| DEFAULT_SEQUENCES_NAME.to_string()),
            )),
        }
    }
}

/// Build configured extras, rejecting two that would share a file.
pub fn build_extras(configs: &[ExtraConfig]) -> Result<Vec<Box<dyn Extra>>> {
    let mut seen = HashSet::new();
    let mut extras = Vec::with_capacity(configs.len());
    for config in configs {
        let extra = config.build();
        if !seen.insert(extra.name().to_string()) {
            return Err(TransferError::configuration(format!(
                "extra names must be unique: '{}' is used twice",
                extra.name()
            )));
        }
        extras.push(extra);
    }
    Ok(extras)
}
