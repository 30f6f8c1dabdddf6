//! Job model: one attempt to ingest one file for one supplier.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_kind::ErrorKind;
use crate::protocol::FileKind;

/// Lifecycle phase of a job.
///
/// Non-terminal phases are strictly ordered; a job never moves to a phase
/// with a lower order. The three terminal phases share the highest order
/// and accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Downloading,
    Analyzing,
    Extracting,
    Normalizing,
    Matching,
    Complete,
    CompletedWithErrors,
    Failed,
}

impl JobPhase {
    pub fn order(&self) -> u8 {
        match self {
            Self::Downloading => 0,
            Self::Analyzing => 1,
            Self::Extracting => 2,
            Self::Normalizing => 3,
            Self::Matching => 4,
            Self::Complete | Self::CompletedWithErrors | Self::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::CompletedWithErrors | Self::Failed)
    }

    /// Both success phases mean "data is available"; clients must not
    /// distinguish them for success semantics.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete | Self::CompletedWithErrors)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Analyzing => "analyzing",
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::Matching => "matching",
            Self::Complete => "complete",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloading" => Ok(Self::Downloading),
            "analyzing" => Ok(Self::Analyzing),
            "extracting" => Ok(Self::Extracting),
            "normalizing" => Ok(Self::Normalizing),
            "matching" => Ok(Self::Matching),
            "complete" => Ok(Self::Complete),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job phase '{}'", other)),
        }
    }
}

/// Row accounting for one job.
///
/// Invariant (checked at finalize time, surfaced in the status API):
/// `rows_seen = rows_persisted + duplicates_removed + row errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub rows_seen: u64,
    pub rows_extracted: u64,
    pub rows_deduped: u64,
    pub rows_persisted: u64,
    pub duplicates_removed: u64,
    #[serde(default)]
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
}

impl JobCounters {
    pub fn record_error(&mut self, kind: ErrorKind) {
        *self.errors_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_errors(&mut self, kind: ErrorKind, count: u64) {
        if count > 0 {
            *self.errors_by_kind.entry(kind).or_insert(0) += count;
        }
    }

    /// Total errors, excluding informational kinds.
    pub fn errors_total(&self) -> u64 {
        self.errors_by_kind
            .iter()
            .filter(|(kind, _)| !kind.is_informational())
            .map(|(_, count)| count)
            .sum()
    }

    /// Errors at row granularity only.
    pub fn row_errors_total(&self) -> u64 {
        self.errors_by_kind
            .iter()
            .filter(|(kind, _)| kind.is_row_error())
            .map(|(_, count)| count)
            .sum()
    }

    /// The row-conservation identity from the status contract.
    pub fn is_conserved(&self) -> bool {
        self.rows_seen == self.rows_persisted + self.duplicates_removed + self.row_errors_total()
    }
}

/// One attempt to ingest one file for one supplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub phase: JobPhase,
    pub progress: u8,
    pub counters: JobCounters,
    pub error_kind: Option<ErrorKind>,
    /// The source descriptor this job was enqueued with (`kind:location`).
    pub source: String,
    pub file_path: Option<String>,
    pub file_kind: Option<FileKind>,
    /// Intelligence-side sub-job id, set once analysis is accepted.
    pub analysis_id: Option<Uuid>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Merge-patch applied through the job store's compare-and-set update.
/// Absent fields leave the column untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub phase: Option<JobPhase>,
    pub progress: Option<u8>,
    pub counters: Option<JobCounters>,
    pub error_kind: Option<ErrorKind>,
    pub file_path: Option<String>,
    pub file_kind: Option<FileKind>,
    pub analysis_id: Option<Uuid>,
}

impl JobPatch {
    pub fn phase(phase: JobPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            phase: Some(JobPhase::Failed),
            error_kind: Some(kind),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_monotonic() {
        let sequence = [
            JobPhase::Downloading,
            JobPhase::Analyzing,
            JobPhase::Extracting,
            JobPhase::Normalizing,
            JobPhase::Matching,
            JobPhase::Complete,
        ];
        for pair in sequence.windows(2) {
            assert!(pair[0].order() < pair[1].order(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_phases() {
        assert!(JobPhase::Complete.is_terminal());
        assert!(JobPhase::CompletedWithErrors.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(!JobPhase::Matching.is_terminal());
        assert!(JobPhase::CompletedWithErrors.is_success());
        assert!(!JobPhase::Failed.is_success());
    }

    #[test]
    fn test_counters_conservation() {
        let mut counters = JobCounters {
            rows_seen: 500,
            rows_extracted: 410,
            rows_deduped: 410,
            rows_persisted: 410,
            duplicates_removed: 0,
            ..Default::default()
        };
        counters.record_errors(ErrorKind::RowPriceInvalid, 90);
        assert!(counters.is_conserved());
        assert_eq!(counters.errors_total(), 90);

        // Informational kinds do not count as errors and do not break
        // conservation.
        counters.record_error(ErrorKind::DuplicateCollapsed);
        assert_eq!(counters.errors_total(), 90);
    }

    #[test]
    fn test_counters_serde_shape() {
        let mut counters = JobCounters::default();
        counters.record_errors(ErrorKind::RowPriceInvalid, 2);
        let value = serde_json::to_value(&counters).unwrap();
        assert_eq!(value["errors_by_kind"]["row_price_invalid"], 2);
    }
}
