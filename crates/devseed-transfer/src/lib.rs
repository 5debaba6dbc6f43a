//! Snapshot export and import for devseed.
//!
//! Strategies select rows per entity, the anonymiser scrubs them on the way
//! out, and the reset orchestrator guards the destructive part of an import.
//! `Transfer` drives both directions over any [`Backend`].

pub mod anonymise;
pub mod backend;
pub mod config;
pub mod errors;
pub mod extras;
pub mod pipeline;
pub mod report;
pub mod reset;
pub mod strategy;
pub mod worker;

pub use anonymise::{AnonymiseConfig, Anonymiser, AnonymiserRule, RuleConfig};
pub use backend::{Backend, MemoryBackend, PgBackend, Row};
pub use config::{Config, DEFAULT_CONFIG_FILE, DEFAULT_PROFILE, DatabaseProfile};
pub use errors::{Result, TransferError};
pub use extras::{Extra, ExtraConfig, SequenceReplicator};
pub use pipeline::{ExportOptions, ImportOptions, StrategyWorker, Transfer};
pub use report::{Direction, StrategyReport, TransferReport};
pub use reset::{AlwaysConfirm, Confirm, ResetMode, ResetOrchestrator};
pub use strategy::{Strategy, StrategyConfig, StrategyKind, StrategyRegistry};
pub use worker::{ExportRequest, RequestHandler, WorkerClient, serve};
