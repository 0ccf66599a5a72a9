//! Embedded store - SQLite files on both ends of the pipeline
//!
//! Import reads client-side SQLite files; export writes a fresh snapshot file
//! using the schema in [`schema`].

pub mod schema;
pub mod sqlite;

pub use sqlite::EmbeddedStore;

use crate::{Error, Result};

/// Run SQLite work on the blocking pool so it never stalls request handling.
pub async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Store(format!("embedded store task failed: {}", e)))?
}
