//! Wire protocol between the courier and the intelligence service.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_kind::ErrorKind;
use crate::job::{JobCounters, JobPhase};

/// Kind of a staged file as handed to the intelligence service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Spreadsheet,
    Csv,
    Pdf,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }

    /// Default file extension used when staging.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "xlsx",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spreadsheet" => Ok(Self::Spreadsheet),
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown file kind '{}'", other)),
        }
    }
}

/// Kind of an upstream source as configured on a supplier.
///
/// `SheetExport` is a hosted-sheet source that the courier exports to a
/// spreadsheet before staging; after download it behaves like one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Spreadsheet,
    Csv,
    Pdf,
    SheetExport,
}

impl SourceKind {
    /// The staged-file kind this source produces.
    pub fn file_kind(&self) -> FileKind {
        match self {
            Self::Spreadsheet | Self::SheetExport => FileKind::Spreadsheet,
            Self::Csv => FileKind::Csv,
            Self::Pdf => FileKind::Pdf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::SheetExport => "sheet_export",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spreadsheet" => Ok(Self::Spreadsheet),
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            "sheet_export" | "sheet-export" => Ok(Self::SheetExport),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Body of `POST /analyze/file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeFileRequest {
    pub job_id: Uuid,
    pub supplier_id: Uuid,
    /// Absolute path on the shared filesystem.
    pub file_path: String,
    pub file_kind: FileKind,
}

/// `202 Accepted` body of `POST /analyze/file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeAccepted {
    pub analysis_id: Uuid,
}

/// Ids produced by a finished analysis, present once terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub supplier_item_ids: Vec<Uuid>,
    pub review_ids: Vec<Uuid>,
}

/// Body of `GET /analyze/status/{analysis_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStatusResponse {
    pub phase: JobPhase,
    pub progress: u8,
    pub counters: JobCounters,
    /// Terminal failure kind, present once the analysis failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    /// Latest parsing-log messages, grouped by kind, bounded per kind.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub recent_errors: BTreeMap<ErrorKind, Vec<String>>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub db: bool,
    pub llm: bool,
    pub vector: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_maps_to_file_kind() {
        assert_eq!(SourceKind::SheetExport.file_kind(), FileKind::Spreadsheet);
        assert_eq!(SourceKind::Pdf.file_kind(), FileKind::Pdf);
        assert_eq!(SourceKind::Csv.file_kind(), FileKind::Csv);
    }

    #[test]
    fn test_analyze_request_wire_shape() {
        let request = AnalyzeFileRequest {
            job_id: Uuid::nil(),
            supplier_id: Uuid::nil(),
            file_path: "/srv/staging/supplier_x_y.xlsx".into(),
            file_kind: FileKind::Spreadsheet,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["file_kind"], "spreadsheet");
        assert_eq!(value["file_path"], "/srv/staging/supplier_x_y.xlsx");
    }

    #[test]
    fn test_status_response_omits_empty_result() {
        let status = AnalysisStatusResponse {
            phase: JobPhase::Extracting,
            progress: 40,
            counters: JobCounters::default(),
            error_kind: None,
            result: None,
            recent_errors: BTreeMap::new(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("result").is_none());
        assert!(value.get("recent_errors").is_none());
        assert_eq!(value["phase"], "extracting");
    }

    #[test]
    fn test_sheet_export_accepts_both_spellings() {
        assert_eq!("sheet-export".parse::<SourceKind>(), Ok(SourceKind::SheetExport));
        assert_eq!("sheet_export".parse::<SourceKind>(), Ok(SourceKind::SheetExport));
    }
}
