//! Closed error taxonomy shared by counters, parsing logs and job state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every way an ingestion can go wrong, at any granularity.
///
/// The set is closed: parsing logs, per-kind counters and the status API
/// all use these names, so adding a variant is a wire-format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Acquisition
    InvalidSource,
    SupplierDisabled,
    FileTooLarge,
    Unreadable,
    UnsupportedKind,
    // Sheet selection
    NoSuitableSheet,
    // Per-chunk extraction
    ExtractionMalformed,
    ExtractionTimeout,
    // Per-row validation
    RowSchemaInvalid,
    RowPriceInvalid,
    RowNameMissing,
    // Normalization
    CategoryUnresolved,
    // Dedup bookkeeping (informational, not an error)
    DuplicateCollapsed,
    // Persistence
    PersistConflict,
    // Job-level
    AnalysisUnreachable,
    Stalled,
    Cancelled,
    // Matcher
    EmbeddingFailed,
    AdjudicationFailed,
    // Escape hatch for exceptions caught at a stage boundary
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSource => "invalid_source",
            Self::SupplierDisabled => "supplier_disabled",
            Self::FileTooLarge => "file_too_large",
            Self::Unreadable => "unreadable",
            Self::UnsupportedKind => "unsupported_kind",
            Self::NoSuitableSheet => "no_suitable_sheet",
            Self::ExtractionMalformed => "extraction_malformed",
            Self::ExtractionTimeout => "extraction_timeout",
            Self::RowSchemaInvalid => "row_schema_invalid",
            Self::RowPriceInvalid => "row_price_invalid",
            Self::RowNameMissing => "row_name_missing",
            Self::CategoryUnresolved => "category_unresolved",
            Self::DuplicateCollapsed => "duplicate_collapsed",
            Self::PersistConflict => "persist_conflict",
            Self::AnalysisUnreachable => "analysis_unreachable",
            Self::Stalled => "stalled",
            Self::Cancelled => "cancelled",
            Self::EmbeddingFailed => "embedding_failed",
            Self::AdjudicationFailed => "adjudication_failed",
            Self::Unexpected => "unexpected",
        }
    }

    /// Row-granularity validation failures. These participate in the
    /// row-conservation identity: seen = persisted + collapsed + row errors.
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            Self::RowSchemaInvalid | Self::RowPriceInvalid | Self::RowNameMissing
        )
    }

    /// Failures that occur before any file content is interpreted.
    pub fn is_acquisition_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSource
                | Self::SupplierDisabled
                | Self::FileTooLarge
                | Self::Unreadable
                | Self::UnsupportedKind
        )
    }

    /// Informational kinds are counted but never push a job towards
    /// `completed_with_errors` or `failed`.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::DuplicateCollapsed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_source" => Ok(Self::InvalidSource),
            "supplier_disabled" => Ok(Self::SupplierDisabled),
            "file_too_large" => Ok(Self::FileTooLarge),
            "unreadable" => Ok(Self::Unreadable),
            "unsupported_kind" => Ok(Self::UnsupportedKind),
            "no_suitable_sheet" => Ok(Self::NoSuitableSheet),
            "extraction_malformed" => Ok(Self::ExtractionMalformed),
            "extraction_timeout" => Ok(Self::ExtractionTimeout),
            "row_schema_invalid" => Ok(Self::RowSchemaInvalid),
            "row_price_invalid" => Ok(Self::RowPriceInvalid),
            "row_name_missing" => Ok(Self::RowNameMissing),
            "category_unresolved" => Ok(Self::CategoryUnresolved),
            "duplicate_collapsed" => Ok(Self::DuplicateCollapsed),
            "persist_conflict" => Ok(Self::PersistConflict),
            "analysis_unreachable" => Ok(Self::AnalysisUnreachable),
            "stalled" => Ok(Self::Stalled),
            "cancelled" => Ok(Self::Cancelled),
            "embedding_failed" => Ok(Self::EmbeddingFailed),
            "adjudication_failed" => Ok(Self::AdjudicationFailed),
            "unexpected" => Ok(Self::Unexpected),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_kinds() {
        let kinds = [
            ErrorKind::InvalidSource,
            ErrorKind::SupplierDisabled,
            ErrorKind::FileTooLarge,
            ErrorKind::Unreadable,
            ErrorKind::UnsupportedKind,
            ErrorKind::NoSuitableSheet,
            ErrorKind::ExtractionMalformed,
            ErrorKind::ExtractionTimeout,
            ErrorKind::RowSchemaInvalid,
            ErrorKind::RowPriceInvalid,
            ErrorKind::RowNameMissing,
            ErrorKind::CategoryUnresolved,
            ErrorKind::DuplicateCollapsed,
            ErrorKind::PersistConflict,
            ErrorKind::AnalysisUnreachable,
            ErrorKind::Stalled,
            ErrorKind::Cancelled,
            ErrorKind::EmbeddingFailed,
            ErrorKind::AdjudicationFailed,
            ErrorKind::Unexpected,
        ];
        for kind in kinds {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&ErrorKind::RowPriceInvalid).unwrap();
        assert_eq!(json, "\"row_price_invalid\"");
    }

    #[test]
    fn test_row_error_classification() {
        assert!(ErrorKind::RowPriceInvalid.is_row_error());
        assert!(ErrorKind::RowNameMissing.is_row_error());
        assert!(!ErrorKind::ExtractionTimeout.is_row_error());
        assert!(!ErrorKind::DuplicateCollapsed.is_row_error());
    }
}
