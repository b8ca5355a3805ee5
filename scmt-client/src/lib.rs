//! Library backing the `scmt-client-cli` daemon: a small HTTP client for
//! the generator's `key`/`cert` wire protocol, plus the per-service
//! load-and-trigger loop that drives a set of services to completion.

pub mod client;
pub mod error;
pub mod loader;

pub use client::{CertStatus, ScmtClient};
pub use error::{ClientError, Result};
pub use loader::{blocking_load, load_service_certs, OutForm, ServiceConfig};
