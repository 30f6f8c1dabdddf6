//! PriceDock courier service: file acquisition and job lifecycle.
//!
//! Downloads supplier price files, stages them on the shared filesystem
//! with a metadata sidecar, asks the intelligence service to analyze
//! them, mirrors analysis progress into the job store, and retires
//! staged files once their jobs have been terminal long enough. It never
//! looks inside a file.

pub mod app;
pub mod cleanup;
pub mod client;
pub mod core;
pub mod download;
pub mod error;
pub mod poller;
pub mod queue;
pub mod service;
pub mod source;
pub mod worker;
