use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use devseed_core::EntityName;

use crate::extras::ExtraOutcome;
use crate::strategy::{ExportOutcome, ImportOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Export,
    Import,
}

/// Counters of one strategy run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyReport {
    pub entity: String,
    pub strategy: String,
    /// Rows written; unknown when a worker produced the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    pub bytes: u64,
    /// Export left an existing file alone, or import found no file.
    pub skipped: bool,
    pub inserted: u64,
    pub existing: usize,
    pub deleted: u64,
}

impl StrategyReport {
    pub fn exported(entity: &EntityName, strategy: &str, outcome: ExportOutcome) -> Self {
        Self {
            entity: entity.label(),
            strategy: strategy.to_string(),
            rows: outcome.rows,
            bytes: outcome.bytes,
            skipped: outcome.skipped,
            inserted: 0,
            existing: 0,
            deleted: 0,
        }
    }

    pub fn imported(entity: &EntityName, strategy: &str, outcome: ImportOutcome) -> Self {
        Self {
            entity: entity.label(),
            strategy: strategy.to_string(),
            rows: None,
            bytes: 0,
            skipped: outcome.missing,
            inserted: outcome.inserted,
            existing: outcome.existing,
            deleted: outcome.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraReport {
    pub name: String,
    pub items: usize,
    pub skipped: bool,
}

impl ExtraReport {
    pub fn new(name: &str, outcome: ExtraOutcome) -> Self {
        Self {
            name: name.to_string(),
            items: outcome.items,
            skipped: outcome.skipped,
        }
    }
}

/// Summary of one export or import run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub run_id: String,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub migrations: usize,
    pub strategies: Vec<StrategyReport>,
    pub extras: Vec<ExtraReport>,
    pub duration_ms: u64,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl TransferReport {
    pub fn start(direction: Direction) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            direction,
            started_at: Utc::now(),
            migrations: 0,
            strategies: Vec::new(),
            extras: Vec::new(),
            duration_ms: 0,
            clock: Some(Instant::now()),
        }
    }

    pub fn finish(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn strategy(&self, entity: &str, strategy: &str) -> Option<&StrategyReport> {
        self.strategies
            .iter()
            .find(|report| report.entity == entity && report.strategy == strategy)
    }

    pub fn total_rows(&self) -> usize {
        self.strategies
            .iter()
            .map(|report| match self.direction {
                Direction::Export => report.rows.unwrap_or(0),
                Direction::Import => usize::try_from(report.inserted).unwrap_or(usize::MAX),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_rows_per_direction() {
        let users = EntityName::new("auth", "users");
        let mut report = TransferReport::start(Direction::Export);
        report.strategies.push(StrategyReport::exported(
            &users,
            "internal",
            ExportOutcome {
                rows: Some(2),
                bytes: 120,
                skipped: false,
            },
        ));
        report.strategies.push(StrategyReport::exported(
            &users,
            "sample",
            ExportOutcome {
                rows: Some(3),
                bytes: 200,
                skipped: false,
            },
        ));
        report.finish();

        assert_eq!(report.total_rows(), 5);
        assert_eq!(report.strategy("auth.users", "sample").map(|r| r.bytes), Some(200));

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["direction"], "export");
        assert!(json.get("clock").is_none());
    }
}
