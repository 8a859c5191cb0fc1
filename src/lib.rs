//! Product catalog sync backend.
//!
//! Ingests product records from a Feishu multi-dimensional table,
//! normalizes them into the canonical product model, detects per-record
//! changes against the local store, mirrors attached images into an
//! S3-compatible object store, and records every sync attempt with
//! progress and error detail.
//!
//! The HTTP server and CLI layers live outside this crate; they consume
//! [`api::SyncService`] and the payload types in [`api`].

pub mod api;
pub mod config;
pub mod consistency;
pub mod error;
pub mod feishu;
pub mod images;
pub mod mapping;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transform;

pub use api::SyncService;
pub use config::AppConfig;
pub use error::{Result, SyncError};

/// Installs the global tracing subscriber. Binaries call this once at
/// startup; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
