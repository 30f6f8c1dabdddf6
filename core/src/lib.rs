//! Shared domain for the PriceDock ingestion core.
//!
//! Both services link this crate: the courier for staging, job state and
//! the wire protocol; the intelligence service for job state, the error
//! taxonomy and the status documents it serves back.

pub mod error_kind;
pub mod job;
pub mod lifecycle;
pub mod protocol;
pub mod retry;
pub mod staging;
pub mod store;
pub mod supplier;

pub use error_kind::ErrorKind;
pub use job::{Job, JobCounters, JobPatch, JobPhase};
pub use lifecycle::{Lifecycle, StopSignal};
pub use protocol::{
    AnalysisResult, AnalysisStatusResponse, AnalyzeAccepted, AnalyzeFileRequest, FileKind,
    HealthResponse, SourceKind,
};
pub use retry::RetryPolicy;
pub use staging::StagedFileMeta;
pub use store::{JobStore, NewJob, StoreError};
pub use supplier::{Supplier, SupplierStore};
