use async_trait::async_trait;
use tracing::{debug, info, warn};

use devseed_core::{SnapshotLayout, is_populated, read_json_list, write_json_list};

use super::{Extra, ExtraOutcome};
use crate::backend::{Backend, SequenceState, ensure_simple_value};
use crate::errors::Result;

pub const DEFAULT_SEQUENCES_NAME: &str = "postgres-sequences";

/// Replays free-standing counters so allocations continue where the source
/// left off.
///
/// On import any counter of the same name is dropped and recreated, which
/// works the same under every reset mode.
#[derive(Debug, Clone)]
pub struct SequenceReplicator {
    name: String,
}

impl SequenceReplicator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SequenceReplicator {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCES_NAME)
    }
}

#[async_trait]
impl Extra for SequenceReplicator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(
        &self,
        backend: &dyn Backend,
        layout: &SnapshotLayout,
        no_update: bool,
    ) -> Result<ExtraOutcome> {
        let path = layout.extra_file(&self.name);
        if no_update && is_populated(&path) {
            debug!(extra = %self.name, "keeping existing export");
            return Ok(ExtraOutcome {
                items: 0,
                skipped: true,
            });
        }

        let sequences = backend.list_sequences().await?;
        write_json_list(&path, &sequences)?;
        Ok(ExtraOutcome {
            items: sequences.len(),
            skipped: false,
        })
    }

    async fn import(&self, backend: &dyn Backend, layout: &SnapshotLayout) -> Result<ExtraOutcome> {
        let path = layout.extra_file(&self.name);
        if !path.exists() {
            warn!(extra = %self.name, "no exported sequences; nothing to import");
            return Ok(ExtraOutcome {
                items: 0,
                skipped: true,
            });
        }

        let sequences: Vec<SequenceState> = read_json_list(&path)?;
        for sequence in &sequences {
            let name = sequence.qualified_name()?;
            ensure_simple_value("data_type", &sequence.data_type)?;

            backend.drop_sequence(&name).await?;
            backend.create_sequence(sequence).await?;
            // The recorded value was already handed out in the source.
            let consumed = backend.next_value(&name).await?;
            info!(sequence = %name, value = consumed, "sequence restored");
        }

        Ok(ExtraOutcome {
            items: sequences.len(),
            skipped: false,
        })
    }
}
