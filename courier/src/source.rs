//! Source descriptors: where a supplier's price file comes from.
//!
//! Rendered as `kind:location`, e.g.
//! `pdf:https://supplier.example/prices.pdf` or
//! `sheet_export:https://sheets.example/d/abc123`. The courier never
//! inspects file contents; the descriptor is the whole contract.

use std::fmt;
use std::str::FromStr;

use pricedock_core::protocol::SourceKind;

use crate::error::CourierError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub location: String,
}

impl SourceDescriptor {
    pub fn new(kind: SourceKind, location: &str) -> Result<Self, CourierError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(CourierError::InvalidSource("empty location".into()));
        }
        if !(location.starts_with("http://") || location.starts_with("https://")) {
            return Err(CourierError::InvalidSource(format!(
                "location must be an http(s) URL, got '{}'",
                location
            )));
        }
        Ok(Self {
            kind,
            location: location.to_string(),
        })
    }

    /// The URL actually fetched. Hosted-sheet sources are exported to a
    /// spreadsheet; direct-file sources stream as-is.
    pub fn download_url(&self) -> String {
        match self.kind {
            SourceKind::SheetExport => {
                if self.location.contains("/export") {
                    self.location.clone()
                } else {
                    format!("{}/export?format=xlsx", self.location.trim_end_matches('/'))
                }
            }
            _ => self.location.clone(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.location)
    }
}

impl FromStr for SourceDescriptor {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, location) = s
            .split_once(':')
            .ok_or_else(|| CourierError::InvalidSource(format!("'{}' has no kind prefix", s)))?;
        let kind: SourceKind = kind
            .parse()
            .map_err(CourierError::InvalidSource)?;
        Self::new(kind, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let descriptor: SourceDescriptor = "pdf:https://supplier.example/prices.pdf"
            .parse()
            .unwrap();
        assert_eq!(descriptor.kind, SourceKind::Pdf);
        assert_eq!(descriptor.to_string(), "pdf:https://supplier.example/prices.pdf");
    }

    #[test]
    fn test_rejects_bad_descriptors() {
        assert!("ftp-something".parse::<SourceDescriptor>().is_err());
        assert!("carrier_pigeon:https://x.example/y".parse::<SourceDescriptor>().is_err());
        assert!("csv:not-a-url".parse::<SourceDescriptor>().is_err());
        assert!("csv:".parse::<SourceDescriptor>().is_err());
    }

    #[test]
    fn test_sheet_export_url() {
        let descriptor: SourceDescriptor = "sheet_export:https://sheets.example/d/abc123"
            .parse()
            .unwrap();
        assert_eq!(
            descriptor.download_url(),
            "https://sheets.example/d/abc123/export?format=xlsx"
        );

        let explicit: SourceDescriptor =
            "sheet_export:https://sheets.example/d/abc123/export?format=ods"
                .parse()
                .unwrap();
        assert_eq!(
            explicit.download_url(),
            "https://sheets.example/d/abc123/export?format=ods"
        );
    }

    #[test]
    fn test_direct_sources_download_verbatim() {
        let descriptor: SourceDescriptor = "csv:https://supplier.example/list.csv"
            .parse()
            .unwrap();
        assert_eq!(descriptor.download_url(), "https://supplier.example/list.csv");
    }
}
