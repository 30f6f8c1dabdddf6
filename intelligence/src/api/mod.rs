//! HTTP API exposed to the courier.

pub mod routes;
pub mod server;
pub mod types;

pub use server::{ApiServer, ApiState};
