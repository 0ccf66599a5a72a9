//! Relational store - the server-side system of record
//!
//! The engines only need a handful of operations: type and table
//! introspection, conflict-skipping bulk insert, row counts and batched
//! reads. [`RelationalStore`] captures exactly those, so the PostgreSQL
//! implementation and the in-memory one are interchangeable.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::value::{Row, Value};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::{PgConnector, PgStore};

/// Operations the sync engines issue against the relational store.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Column name → reported data type (`information_schema` spelling)
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>>;

    /// Column names of a table in ordinal order
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// The subset of `candidates` that exist as tables, in candidate order
    async fn existing_tables(&self, candidates: &[&str]) -> Result<Vec<String>>;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Insert rows, silently skipping any that conflict with existing keys.
    ///
    /// All rows of one call commit together or not at all. Returns the number
    /// of rows actually inserted.
    async fn insert_skip_conflicts(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<u64>;

    /// Stream a table's rows in batches of at most `batch_size`
    fn select_batches<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [String],
        batch_size: usize,
    ) -> BoxStream<'a, Result<Vec<Row>>>;

    /// Release the underlying connection(s)
    async fn close(&self);
}

/// Opens a store scoped to a single import or export operation.
#[async_trait]
pub trait Connector: Send + Sync {
    type Store: RelationalStore;

    async fn connect(&self) -> Result<Self::Store>;
}
