//! # Snapsync - relational ⇄ SQLite snapshot synchronization
//!
//! Keeps a relational server database and a set of embedded SQLite files
//! eventually consistent, and serves the latest SQLite snapshot to clients.
//!
//! Snapsync provides:
//! - A static schema catalog describing how embedded tables map onto relational tables
//! - Dependency-ordered bulk import of SQLite files into the relational store
//! - Scheduled, atomic export of the relational store into a fresh SQLite snapshot
//! - Range-capable HTTP serving of the current snapshot

pub mod value;
pub mod catalog;
pub mod adapter;
pub mod resolver;
pub mod embedded;
pub mod relational;
pub mod import;
pub mod export;
pub mod service;
pub mod scheduler;
pub mod startup;
pub mod server;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{Row, Value};
pub use catalog::{Catalog, CatalogSet, EntityDescriptor};
pub use embedded::EmbeddedStore;
pub use relational::{MemoryStore, PgStore, RelationalStore};
pub use import::{ImportEngine, ImportReport, SourceFile};
pub use export::{ExportEngine, ExportReport, SnapshotPaths};
pub use service::{ExportOutcome, SyncService};
pub use config::SyncConfig;

use std::path::PathBuf;

/// Result type alias for Snapsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Snapsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cyclic or unsatisfiable dependency graph, or an inconsistent catalog
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No source file available (looked for {0:?})")]
    SourceUnavailable(Vec<PathBuf>),

    #[error("Conversion error in column '{column}': {reason}")]
    Conversion { column: String, reason: String },

    #[error("Embedded store error: {0}")]
    Embedded(#[from] rusqlite::Error),

    #[error("Relational store error: {0}")]
    Relational(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Range not satisfiable: {0}")]
    Range(String),

    #[error("Snapshot file not ready: {0}")]
    FileNotReady(PathBuf),

    #[error("Invalid config: {0}")]
    Config(String),
}

impl Error {
    pub fn conversion(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Conversion {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Whether the host's retry loop may reasonably try the operation again.
    ///
    /// Configuration and conversion failures come from static data and will
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_)
                | Error::Relational(_)
                | Error::Store(_)
                | Error::Io(_)
                | Error::Embedded(_)
        )
    }
}
