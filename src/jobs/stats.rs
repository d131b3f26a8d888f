use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-record outcome reported by the ingestion adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Created,
    Updated,
    Skipped,
    Merged,
    Invalid,
}

impl RecordAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordAction::Created => "created",
            RecordAction::Updated => "updated",
            RecordAction::Skipped => "skipped",
            RecordAction::Merged => "merged",
            RecordAction::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown record action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for RecordAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RecordAction::Created),
            "updated" => Ok(RecordAction::Updated),
            "skipped" => Ok(RecordAction::Skipped),
            "merged" => Ok(RecordAction::Merged),
            "invalid" => Ok(RecordAction::Invalid),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Outcome counters for one run of a job.
///
/// `total` always equals the sum of the five action counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub merged: u64,
    pub invalid: u64,
    pub total: u64,
    pub errors: Vec<String>,
    pub progress: u8,
    /// Milliseconds since the run started
    pub processing_time: u64,
}

impl JobStats {
    pub fn record(&mut self, action: RecordAction) {
        self.total += 1;
        match action {
            RecordAction::Created => self.created += 1,
            RecordAction::Updated => self.updated += 1,
            RecordAction::Skipped => self.skipped += 1,
            RecordAction::Merged => self.merged += 1,
            RecordAction::Invalid => self.invalid += 1,
        }
    }

    pub fn counted(&self) -> u64 {
        self.created + self.updated + self.skipped + self.merged + self.invalid
    }

    /// Recompute progress from `processed` out of `estimate` records.
    ///
    /// Capped at 99 until the run completes and never moves backwards.
    pub fn advance_progress(&mut self, processed: u64, estimate: u64) -> u8 {
        if estimate > 0 {
            let pct = ((processed as f64 / estimate as f64) * 100.0).round();
            let pct = pct.min(99.0) as u8;
            self.progress = self.progress.max(pct);
        }
        self.progress
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}
