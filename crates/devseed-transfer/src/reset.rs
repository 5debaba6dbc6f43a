//! One-shot guard that empties the target before an import.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::info;

use crate::backend::Backend;
use crate::errors::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Destroy and recreate the whole store.
    #[default]
    DropStore,
    /// Drop managed tables and the migration history, leaving other objects.
    DropTables,
    /// Leave the target untouched and merge into it.
    NoReset,
}

impl ResetMode {
    pub fn slug(self) -> &'static str {
        match self {
            Self::DropStore => "drop-store",
            Self::DropTables => "drop-tables",
            Self::NoReset => "none",
        }
    }

    /// Phrase used in the confirmation prompt.
    pub fn description(self) -> &'static str {
        match self {
            Self::DropStore => "delete the database",
            Self::DropTables => "delete all managed tables in the database",
            Self::NoReset => "merge into the existing database",
        }
    }

    pub fn requires_confirmation(self) -> bool {
        self != Self::NoReset
    }
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ResetMode {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "drop-store" => Ok(Self::DropStore),
            "drop-tables" => Ok(Self::DropTables),
            "none" => Ok(Self::NoReset),
            other => Err(TransferError::configuration(format!(
                "unknown reset mode '{other}' (expected drop-store, drop-tables or none)"
            ))),
        }
    }
}

/// Asks the operator before destructive work.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Accepts every prompt; used when confirmation is suppressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    Unclean,
    Clean(ResetMode),
}

/// `Unclean -> Clean(mode)`, exactly once per import.
#[derive(Debug)]
pub struct ResetOrchestrator {
    state: ResetState,
}

impl Default for ResetOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetOrchestrator {
    pub fn new() -> Self {
        Self {
            state: ResetState::Unclean,
        }
    }

    pub fn state(&self) -> ResetState {
        self.state
    }

    pub fn prompt(mode: ResetMode, target: &str) -> String {
        format!(
            "You're about to {} {target}. Are you sure you want to continue? [y/N]: ",
            mode.description()
        )
    }

    /// Apply `mode` to `backend`.
    ///
    /// `managed_tables` lists the tables `DropTables` removes; the migration
    /// history table is always part of it.
    pub async fn reset(
        &mut self,
        mode: ResetMode,
        backend: &dyn Backend,
        managed_tables: &[String],
        confirm: &dyn Confirm,
    ) -> Result<()> {
        if let ResetState::Clean(applied) = self.state {
            return Err(TransferError::ResetAlreadyApplied(applied.to_string()));
        }

        if mode.requires_confirmation() {
            let prompt = Self::prompt(mode, &backend.describe_target());
            if !confirm.confirm(&prompt).await {
                return Err(TransferError::Aborted);
            }
        }

        match mode {
            ResetMode::DropStore => backend.drop_store().await?,
            ResetMode::DropTables => backend.drop_tables(managed_tables).await?,
            ResetMode::NoReset => {}
        }

        info!(
            event = "reset_applied",
            mode = %mode,
            target = %backend.describe_target(),
            "target reset"
        );
        self.state = ResetState::Clean(mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use devseed_core::EntityCatalog;

    use super::*;
    use crate::backend::MemoryBackend;

    struct Decline {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Confirm for Decline {
        async fn confirm(&self, prompt: &str) -> bool {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            false
        }
    }

    #[test]
    fn parses_cli_slugs() {
        for mode in [ResetMode::DropStore, ResetMode::DropTables, ResetMode::NoReset] {
            assert_eq!(mode.slug().parse::<ResetMode>().expect("slug parses"), mode);
        }
        assert!("drop-database".parse::<ResetMode>().is_err());
    }

    #[tokio::test]
    async fn declined_confirmation_aborts_without_touching_the_store() {
        let backend = MemoryBackend::new(EntityCatalog::default());
        let decline = Decline {
            prompts: Mutex::new(Vec::new()),
        };
        let mut orchestrator = ResetOrchestrator::new();

        let err = orchestrator
            .reset(ResetMode::DropStore, &backend, &[], &decline)
            .await
            .expect_err("declined");

        assert!(matches!(err, TransferError::Aborted));
        assert_eq!(backend.store_drops(), 0);
        assert_eq!(orchestrator.state(), ResetState::Unclean);
        let prompts = decline.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("delete the database"));
        assert!(prompts[0].contains("in-memory store"));
    }

    #[tokio::test]
    async fn no_reset_skips_the_prompt_and_resets_only_once() {
        let backend = MemoryBackend::new(EntityCatalog::default());
        let decline = Decline {
            prompts: Mutex::new(Vec::new()),
        };
        let mut orchestrator = ResetOrchestrator::new();

        orchestrator
            .reset(ResetMode::NoReset, &backend, &[], &decline)
            .await
            .expect("none needs no confirmation");
        assert_eq!(orchestrator.state(), ResetState::Clean(ResetMode::NoReset));

        let err = orchestrator
            .reset(ResetMode::DropStore, &backend, &[], &AlwaysConfirm)
            .await
            .expect_err("second transition");
        assert!(matches!(err, TransferError::ResetAlreadyApplied(_)));
        assert_eq!(backend.store_drops(), 0);
    }

    #[tokio::test]
    async fn drop_tables_passes_the_managed_set() {
        let backend = MemoryBackend::new(EntityCatalog::default());
        let mut orchestrator = ResetOrchestrator::new();
        let managed = vec!["auth.users".to_string(), "schema_migrations".to_string()];

        orchestrator
            .reset(ResetMode::DropTables, &backend, &managed, &AlwaysConfirm)
            .await
            .expect("reset");

        assert_eq!(backend.dropped_tables(), managed);
    }
}
