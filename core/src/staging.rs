//! Staged-file layout and sidecar metadata.
//!
//! The courier is the sole writer under the shared root, intelligence the
//! sole reader, cleanup the sole deleter. Payload and sidecar are both
//! written under a `.part` suffix and atomically renamed, so a consumer
//! never observes a partial file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::FileKind;

/// Suffix for in-flight writes.
pub const PART_SUFFIX: &str = ".part";

/// Suffix for the metadata sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sidecar parse error: {0}")]
    Sidecar(#[from] serde_json::Error),
}

/// Metadata sidecar describing a staged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedFileMeta {
    pub job_id: Uuid,
    pub supplier_id: Uuid,
    pub size: u64,
    pub sha256: String,
    pub kind: FileKind,
    pub acquired_at: DateTime<Utc>,
}

/// File name for a staged payload: `supplier_{sid}_{job_id}.{ext}`.
///
/// The job id in the name makes collisions impossible without any
/// coordination between writers.
pub fn staged_file_name(supplier_id: Uuid, job_id: Uuid, kind: FileKind) -> String {
    format!("supplier_{}_{}.{}", supplier_id, job_id, kind.extension())
}

/// Sidecar path for a payload path.
pub fn sidecar_path(payload: &Path) -> PathBuf {
    let mut name = payload.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Hex sha256 of a byte slice.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `bytes` to `final_path` through the `.part` rename protocol.
pub async fn stage_bytes(final_path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
    let part = part_path(final_path);
    tokio::fs::write(&part, bytes).await?;
    tokio::fs::rename(&part, final_path).await?;
    Ok(())
}

impl StagedFileMeta {
    /// Write the sidecar next to `payload`, atomically.
    pub async fn write_beside(&self, payload: &Path) -> Result<PathBuf, StagingError> {
        let sidecar = sidecar_path(payload);
        let body = serde_json::to_vec_pretty(self)?;
        stage_bytes(&sidecar, &body).await?;
        Ok(sidecar)
    }

    /// Read the sidecar belonging to `payload`.
    pub async fn read_beside(payload: &Path) -> Result<Self, StagingError> {
        let body = tokio::fs::read(sidecar_path(payload)).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Remove a staged payload together with its sidecar. Missing files are
/// not an error: cleanup must be idempotent.
pub async fn remove_staged(payload: &Path) -> Result<(), StagingError> {
    for path in [payload.to_path_buf(), sidecar_path(payload)] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64) -> StagedFileMeta {
        StagedFileMeta {
            job_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            size,
            sha256: checksum(b"payload"),
            kind: FileKind::Spreadsheet,
            acquired_at: Utc::now(),
        }
    }

    #[test]
    fn test_staged_file_name_contains_both_ids() {
        let supplier = Uuid::new_v4();
        let job = Uuid::new_v4();
        let name = staged_file_name(supplier, job, FileKind::Pdf);
        assert!(name.contains(&supplier.to_string()));
        assert!(name.contains(&job.to_string()));
        assert!(name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("supplier_a_b.xlsx");
        tokio::fs::write(&payload, b"payload").await.unwrap();

        let original = meta(7);
        original.write_beside(&payload).await.unwrap();

        let loaded = StagedFileMeta::read_beside(&payload).await.unwrap();
        assert_eq!(loaded.job_id, original.job_id);
        assert_eq!(loaded.sha256, original.sha256);
        assert_eq!(loaded.kind, FileKind::Spreadsheet);
    }

    #[tokio::test]
    async fn test_stage_bytes_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("supplier_a_b.csv");
        stage_bytes(&target, b"a,b,c\n").await.unwrap();

        assert!(target.exists());
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_remove_staged_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("supplier_a_b.xlsx");
        tokio::fs::write(&payload, b"x").await.unwrap();
        meta(1).write_beside(&payload).await.unwrap();

        remove_staged(&payload).await.unwrap();
        assert!(!payload.exists());
        assert!(!sidecar_path(&payload).exists());

        // Second call on already-removed files succeeds.
        remove_staged(&payload).await.unwrap();
    }
}
